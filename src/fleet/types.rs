//! Shared fleet types: pod lifecycle states, prompts, and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::runpod::INFERENCE_PORT;

/// GPU types the fleet can request, in the provider's catalog.
///
/// Each variant carries the provider's opaque `gpuTypeIds` string and a
/// short human label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuType {
    /// NVIDIA GeForce RTX 4090.
    #[serde(rename = "RTX4090")]
    Rtx4090,
    /// NVIDIA RTX A6000.
    #[serde(rename = "RTXA6000")]
    RtxA6000,
    /// NVIDIA RTX A5000.
    #[serde(rename = "RTXA5000")]
    RtxA5000,
    /// NVIDIA A40.
    #[serde(rename = "A40")]
    A40,
}

impl GpuType {
    /// The provider's identifier for this GPU type.
    #[must_use]
    pub const fn provider_id(self) -> &'static str {
        match self {
            Self::Rtx4090 => "NVIDIA GeForce RTX 4090",
            Self::RtxA6000 => "NVIDIA RTX A6000",
            Self::RtxA5000 => "NVIDIA RTX A5000",
            Self::A40 => "NVIDIA A40",
        }
    }

    /// Short human label for this GPU type.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Rtx4090 => "RTX4090",
            Self::RtxA6000 => "RTXA6000",
            Self::RtxA5000 => "RTXA5000",
            Self::A40 => "A40",
        }
    }
}

impl std::fmt::Display for GpuType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Lifecycle state of a managed pod.
///
/// ```text
/// Creating -> Starting -> Free <-> Processing
///     |          |         |
///     v          v         v
/// Terminated Terminated  Stopped -> (resume) -> Creating
///                           |
///                           v
///                       Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PodState {
    /// Provisioning requested; no network identity yet.
    Creating,
    /// Public IP and port mapping allocated; health not yet confirmed.
    Starting,
    /// Health endpoint reports ready; idle and eligible for work.
    Free,
    /// Serving one prompt.
    Processing,
    /// Paused on the provider, id retained; resumable.
    Stopped,
    /// Unrecoverable or scheduled for destruction; terminal.
    Terminated,
}

impl PodState {
    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true if the pod counts toward active capacity.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Starting | Self::Free | Self::Processing
        )
    }
}

impl std::fmt::Display for PodState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::Free => "free",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        };
        write!(f, "{state}")
    }
}

/// Network identity of a started pod.
///
/// Set once per `Starting` transition, cleared on stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Public IP allocated by the provider.
    pub public_ip: String,
    /// Service-port to host-port mappings.
    pub port_mappings: HashMap<String, u16>,
}

impl PodInfo {
    /// Host port mapped to the inference service port, if present.
    #[must_use]
    pub fn inference_port(&self) -> Option<u16> {
        self.port_mappings.get(INFERENCE_PORT).copied()
    }

    /// Base URL of the pod's inference endpoint, if reachable.
    #[must_use]
    pub fn inference_url(&self) -> Option<String> {
        self.inference_port()
            .map(|port| format!("http://{}:{port}", self.public_ip))
    }
}

/// A user request flowing through the fleet.
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Source URL the workflow operates on.
    pub url: String,
    /// Workflow to run against the URL.
    pub workflow_id: i64,
    /// Wall-clock submission time.
    pub submitted_at: DateTime<Utc>,
    /// Monotonic submission time; drives expiry.
    pub queued_at: Instant,
    /// Outcome, attached by the dispatcher once the pod answers.
    pub result: Option<PromptResult>,
}

impl Prompt {
    /// Creates a prompt stamped with the current time.
    #[must_use]
    pub fn new(url: impl Into<String>, workflow_id: i64) -> Self {
        Self {
            url: url.into(),
            workflow_id,
            submitted_at: Utc::now(),
            queued_at: Instant::now(),
            result: None,
        }
    }
}

/// Outcome of a dispatched prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResult {
    /// The pod answered with a payload.
    Success {
        /// Raw response body.
        content: Vec<u8>,
        /// Content type reported by the pod.
        media_type: String,
    },
    /// The prompt failed; the message is caller-facing.
    Error {
        /// Caller-facing failure description.
        message: String,
    },
}

impl PromptResult {
    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Returns true for successful results.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Point-in-time view of one managed pod.
#[derive(Debug, Clone, Serialize)]
pub struct PodSnapshot {
    /// Pod name within the fleet.
    pub name: String,
    /// Provider-assigned pod id, if created.
    pub pod_id: Option<String>,
    /// Lifecycle state.
    pub state: PodState,
    /// Whether the dispatcher currently holds the lease.
    pub is_working: bool,
    /// Wall-clock time of the last state progress or request completion.
    pub updated_at: DateTime<Utc>,
    /// Network identity, if the pod has one.
    pub pod_info: Option<PodInfo>,
}

impl PodSnapshot {
    /// Public IP, if the pod has a network identity.
    #[must_use]
    pub fn public_ip(&self) -> Option<&str> {
        self.pod_info.as_ref().map(|i| i.public_ip.as_str())
    }
}

/// Prompt counts by pipeline stage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PromptCounts {
    /// Prompts waiting for a pod.
    pub queued: usize,
    /// Prompts currently on a pod.
    pub processing: usize,
    /// Prompts finished and awaiting pickup.
    pub completed: usize,
}

/// Point-in-time view of the whole fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    /// Snapshot capture time.
    pub captured_at: DateTime<Utc>,
    /// One row per managed pod.
    pub pods: Vec<PodSnapshot>,
    /// Pod counts keyed by lifecycle state.
    pub pods_by_state: BTreeMap<PodState, usize>,
    /// Prompt counts by pipeline stage.
    pub prompts: PromptCounts,
}

impl FleetSnapshot {
    /// Builds a snapshot from pod rows and prompt counts.
    #[must_use]
    pub fn new(pods: Vec<PodSnapshot>, prompts: PromptCounts) -> Self {
        let mut pods_by_state = BTreeMap::new();
        for pod in &pods {
            *pods_by_state.entry(pod.state).or_insert(0) += 1;
        }

        Self {
            captured_at: Utc::now(),
            pods,
            pods_by_state,
            prompts,
        }
    }

    /// Number of pods in the given state.
    #[must_use]
    pub fn count(&self, state: PodState) -> usize {
        self.pods_by_state.get(&state).copied().unwrap_or(0)
    }
}
