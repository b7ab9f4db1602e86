//! Configuration loading, specification, and validation.
//!
//! The fleet is configured from a `fleet.yaml` file with environment
//! variable overrides; the provider credential comes from
//! `RUNPOD_API_KEY`.

pub mod parser;
pub mod spec;
pub mod validator;

pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{
    DispatchConfig, FleetConfig, PoolConfig, ProviderConfig, ScalingConfig, TimingConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
