//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, FleetError, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use super::spec::FleetConfig;

/// Default configuration file names, in lookup order.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["fleet.yaml", "fleet.yml"];

/// Configuration parser for loading fleet configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<FleetConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(FleetError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<FleetConfig> {
        debug!("Parsing YAML configuration");

        let config: FleetConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            FleetError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed configuration for fleet: {}",
            config.fleet.pre_name
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `FLEET_<SECTION>_<KEY>` (e.g., `FLEET_SCALING_MAX_PODS`), plus
    /// `RUNPOD_API_KEY` for the provider credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<FleetConfig> {
        let mut config = self.load_file(path)?;

        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut FleetConfig) {
        // Credential always comes from the environment when present.
        if let Ok(key) = std::env::var("RUNPOD_API_KEY") {
            debug!("Overriding provider.api_key from environment");
            config.provider.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("FLEET_PROVIDER_BASE_URL") {
            debug!("Overriding provider.base_url from environment");
            config.provider.base_url = url;
        }

        if let Ok(name) = std::env::var("FLEET_PRE_NAME") {
            debug!("Overriding fleet.pre_name from environment");
            config.fleet.pre_name = name;
        }

        if let Ok(image) = std::env::var("FLEET_IMAGE_NAME") {
            debug!("Overriding fleet.image_name from environment");
            config.fleet.image_name = image;
        }

        Self::apply_numeric_override("FLEET_SCALING_MIN_PODS", &mut config.scaling.min_pods);
        Self::apply_numeric_override("FLEET_SCALING_MAX_PODS", &mut config.scaling.max_pods);
        Self::apply_numeric_override("FLEET_SCALING_SENSITIVITY", &mut config.scaling.sensitivity);
        Self::apply_numeric_override(
            "FLEET_TIMING_REQUEST_TIMEOUT_SECS",
            &mut config.timing.request_timeout_secs,
        );
    }

    /// Overrides one numeric field from the environment, warning on
    /// unparseable values instead of failing.
    fn apply_numeric_override<T: std::str::FromStr>(name: &str, field: &mut T) {
        if let Ok(raw) = std::env::var(name) {
            match raw.parse() {
                Ok(value) => {
                    debug!("Overriding {name} from environment");
                    *field = value;
                }
                Err(_) => warn!("Ignoring unparseable {name}={raw}"),
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                FleetError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Searches for a configuration file from the given directory upward.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(FleetError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::GpuType;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
fleet:
  pre_name: easel
  template_id: tpl-1
  volume_id: vol-1
  image_name: ghcr.io/halldyll/easel:latest
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.fleet.pre_name, "easel");
        assert_eq!(config.fleet.gpu_types, vec![GpuType::RtxA6000]);
        assert_eq!(config.scaling.min_pods, 1);
        assert_eq!(config.scaling.max_pods, 3);
        assert_eq!(config.timing.request_timeout_secs, 300);
        assert_eq!(config.provider.base_url, "https://rest.runpod.io/v1");
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
fleet:
  pre_name: easel-prod
  template_id: tpl-9
  volume_id: vol-9
  image_name: ghcr.io/halldyll/easel:1.4
  gpu_types: [RTX4090, RTXA6000]

scaling:
  min_pods: 2
  max_pods: 8
  sensitivity: 80

timing:
  retry_delay_ms: 250
  create_retry_max: 5
  start_retry_max: 60
  health_retry_max: 90
  request_timeout_secs: 120

dispatch:
  workers: 4
  queue_depth: 16

provider:
  base_url: http://localhost:9090/v1
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("parse");

        assert_eq!(
            config.fleet.gpu_types,
            vec![GpuType::Rtx4090, GpuType::RtxA6000]
        );
        assert_eq!(config.scaling.sensitivity, 80);
        assert_eq!(config.timing.retry_delay_ms, 250);
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.provider.base_url, "http://localhost:9090/v1");
    }

    #[test]
    fn test_load_file_missing() {
        let parser = ConfigParser::new();
        let result = parser.load_file("/nonexistent/fleet.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fleet.yaml");
        std::fs::write(
            &path,
            "fleet:\n  pre_name: easel\n  template_id: t\n  volume_id: v\n  image_name: i\n",
        )
        .expect("write");

        let parser = ConfigParser::new();
        let config = parser.load_file(&path).expect("load");
        assert_eq!(config.fleet.template_id, "t");

        let found = find_config_file(dir.path()).expect("find");
        assert_eq!(found, path);
    }

    #[test]
    fn test_parse_rejects_bad_gpu_type() {
        let yaml = r"
fleet:
  pre_name: easel
  template_id: t
  volume_id: v
  image_name: i
  gpu_types: [TPU9000]
";
        let parser = ConfigParser::new();
        assert!(parser.parse_yaml(yaml, None).is_err());
    }
}
