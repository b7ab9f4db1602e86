//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying fleet state
//! to the user in text or JSON form.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::fleet::{FleetSnapshot, PodState};
use crate::runpod::PodSummary;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Managed pod row for table display.
#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Leased")]
    leased: String,
    #[tabled(rename = "Public IP")]
    public_ip: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Provider pod row for the status listing.
#[derive(Tabled)]
struct ListingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Managed")]
    managed: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a fleet snapshot for display.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &FleetSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => Self::format_snapshot_text(snapshot),
        }
    }

    fn format_snapshot_text(snapshot: &FleetSnapshot) -> String {
        let mut output = String::new();

        if snapshot.pods.is_empty() {
            let _ = writeln!(output, "No pods in the fleet.");
        } else {
            let rows: Vec<PodRow> = snapshot
                .pods
                .iter()
                .map(|pod| PodRow {
                    name: pod.name.clone(),
                    state: Self::colorize_state(pod.state),
                    leased: if pod.is_working { String::from("yes") } else { String::new() },
                    public_ip: pod.public_ip().unwrap_or_default().to_string(),
                    updated: pod.updated_at.format("%H:%M:%S").to_string(),
                    id: pod.pod_id.clone().unwrap_or_default(),
                })
                .collect();

            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "\nPrompts: {} queued, {} processing, {} completed",
            snapshot.prompts.queued.to_string().yellow(),
            snapshot.prompts.processing.to_string().cyan(),
            snapshot.prompts.completed.to_string().green(),
        );

        output
    }

    /// Formats the provider pod listing for the status command.
    #[must_use]
    pub fn format_listing(&self, pods: &[PodSummary], pre_name: &str) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(pods).unwrap_or_default(),
            OutputFormat::Text => {
                if pods.is_empty() {
                    return String::from("No pods on the provider account.\n");
                }

                let rows: Vec<ListingRow> = pods
                    .iter()
                    .map(|pod| ListingRow {
                        name: pod.name.clone(),
                        id: pod.id.clone(),
                        image: pod.image_name.clone().unwrap_or_default(),
                        managed: if pod.name.starts_with(pre_name) {
                            String::from("yes")
                        } else {
                            String::new()
                        },
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats a validation result for display.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        let mut output = String::new();

        if result.errors.is_empty() {
            let _ = writeln!(output, "{} Configuration is valid.", "ok".green());
        } else {
            let _ = writeln!(output, "{} Configuration has errors:", "error".red());
            for error in &result.errors {
                let _ = writeln!(output, "   {} - {}", error.field.bold(), error.message);
            }
        }

        if show_warnings && !result.warnings.is_empty() {
            let _ = writeln!(output, "\n{}:", "Warnings".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        output
    }

    fn colorize_state(state: PodState) -> String {
        let label = state.to_string();
        match state {
            PodState::Free => label.green().to_string(),
            PodState::Processing => label.cyan().to_string(),
            PodState::Creating | PodState::Starting => label.yellow().to_string(),
            PodState::Stopped => label.dimmed().to_string(),
            PodState::Terminated => label.red().to_string(),
        }
    }
}
