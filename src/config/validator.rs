//! Configuration validation for fleet specs.
//!
//! This module checks a parsed configuration for values that would make
//! the controller misbehave, before any provider call is made.

use crate::error::{ConfigError, FleetError, Result};
use tracing::debug;

use super::spec::FleetConfig;

/// Validator for fleet configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a fleet configuration.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the first validation failure.
    pub fn validate(&self, config: &FleetConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_pool(config, &mut result);
        Self::validate_scaling(config, &mut result);
        Self::validate_timing(config, &mut result);
        Self::validate_dispatch(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(FleetError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_pool(config: &FleetConfig, result: &mut ValidationResult) {
        let pool = &config.fleet;

        if pool.pre_name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("fleet.pre_name"),
                message: String::from("Pod name prefix cannot be empty"),
            });
        } else if !is_valid_name(&pool.pre_name) {
            result.errors.push(ValidationError {
                field: String::from("fleet.pre_name"),
                message: format!(
                    "Prefix '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    pool.pre_name
                ),
            });
        }

        for (field, value) in [
            ("fleet.template_id", &pool.template_id),
            ("fleet.volume_id", &pool.volume_id),
            ("fleet.image_name", &pool.image_name),
        ] {
            if value.is_empty() {
                result.errors.push(ValidationError {
                    field: String::from(field),
                    message: format!("{field} cannot be empty"),
                });
            }
        }

        if pool.gpu_types.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("fleet.gpu_types"),
                message: String::from("At least one GPU type is required"),
            });
        }
    }

    fn validate_scaling(config: &FleetConfig, result: &mut ValidationResult) {
        let scaling = &config.scaling;

        if scaling.max_pods == 0 {
            result.errors.push(ValidationError {
                field: String::from("scaling.max_pods"),
                message: String::from("max_pods must be at least 1"),
            });
        }

        if scaling.min_pods > scaling.max_pods {
            result.errors.push(ValidationError {
                field: String::from("scaling.min_pods"),
                message: format!(
                    "min_pods ({}) cannot exceed max_pods ({})",
                    scaling.min_pods, scaling.max_pods
                ),
            });
        }

        if scaling.sensitivity > 100 {
            result.errors.push(ValidationError {
                field: String::from("scaling.sensitivity"),
                message: format!("sensitivity ({}) must be within 0-100", scaling.sensitivity),
            });
        }

        if scaling.max_pods > 10 {
            result.warnings.push(format!(
                "max_pods is {}; every active pod bills GPU time",
                scaling.max_pods
            ));
        }
    }

    fn validate_timing(config: &FleetConfig, result: &mut ValidationResult) {
        let timing = &config.timing;

        for (field, value) in [
            ("timing.create_retry_max", timing.create_retry_max),
            ("timing.start_retry_max", timing.start_retry_max),
            ("timing.health_retry_max", timing.health_retry_max),
        ] {
            if value == 0 {
                result.errors.push(ValidationError {
                    field: String::from(field),
                    message: format!("{field} must be at least 1"),
                });
            }
        }

        if timing.request_timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("timing.request_timeout_secs"),
                message: String::from("request_timeout_secs must be at least 1"),
            });
        }

        if timing.retry_delay_ms < 50 {
            result.warnings.push(format!(
                "retry_delay_ms is {}ms; polling this fast hammers the provider API",
                timing.retry_delay_ms
            ));
        }

        if timing.request_timeout_secs < 30 {
            result.warnings.push(format!(
                "request_timeout_secs is {}s; cold pods rarely come up that fast",
                timing.request_timeout_secs
            ));
        }
    }

    fn validate_dispatch(config: &FleetConfig, result: &mut ValidationResult) {
        let dispatch = &config.dispatch;

        if dispatch.workers == 0 {
            result.errors.push(ValidationError {
                field: String::from("dispatch.workers"),
                message: String::from("At least one dispatch worker is required"),
            });
        }

        if dispatch.queue_depth == 0 {
            result.errors.push(ValidationError {
                field: String::from("dispatch.queue_depth"),
                message: String::from("queue_depth must be at least 1"),
            });
        }
    }
}

/// Names must be lowercase alphanumeric with hyphens, starting with a
/// letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn base_config() -> FleetConfig {
        let yaml = r"
fleet:
  pre_name: easel
  template_id: tpl-1
  volume_id: vol-1
  image_name: ghcr.io/halldyll/easel:latest
";
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    #[test]
    fn test_valid_config_passes() {
        let config = base_config();
        let result = ConfigValidator::new().validate(&config).expect("validate");
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let mut config = base_config();
        config.fleet.pre_name = String::new();
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_uppercase_prefix_rejected() {
        let mut config = base_config();
        config.fleet.pre_name = String::from("Easel");
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = base_config();
        config.scaling.min_pods = 5;
        config.scaling.max_pods = 2;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_sensitivity_over_100_rejected() {
        let mut config = base_config();
        config.scaling.sensitivity = 150;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let mut config = base_config();
        config.timing.create_retry_max = 0;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = base_config();
        config.dispatch.workers = 0;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_large_fleet_warns() {
        let mut config = base_config();
        config.scaling.max_pods = 20;
        let result = ConfigValidator::new().validate(&config).expect("validate");
        assert!(!result.warnings.is_empty());
    }
}
