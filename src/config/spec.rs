//! Configuration specification types for the fleet.
//!
//! This module defines the structs that map to the `fleet.yaml` file.
//! Every tunable the controller consumes lives here with its default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, FleetError, Result};
use crate::fleet::{FleetSettings, GpuType, PodSpec, RetryPolicy};
use crate::runpod::{RunPodClient, RUNPOD_REST_URL};

/// The root configuration structure for a fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    /// Pool identity: what pods to create and how to recognize ours.
    pub fleet: PoolConfig,
    /// Autoscaling bounds and sensitivity.
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Retry budgets and pacing.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Dispatch worker pool sizing.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Provider endpoint and credentials.
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Pool identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Name prefix for new pods; also the adoption filter for
    /// pre-existing ones.
    pub pre_name: String,
    /// Provider template pods are created from.
    pub template_id: String,
    /// Network volume attached to every pod.
    pub volume_id: String,
    /// Container image.
    pub image_name: String,
    /// GPU types in preference order.
    #[serde(default = "default_gpu_types")]
    pub gpu_types: Vec<GpuType>,
}

/// Autoscaling configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingConfig {
    /// Lower pool bound.
    #[serde(default = "default_min_pods")]
    pub min_pods: usize,
    /// Upper pool bound.
    #[serde(default = "default_max_pods")]
    pub max_pods: usize,
    /// Peak-weighting sensitivity, 0 (pure average) to 100 (pure peak).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
}

/// Retry budgets and pacing configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    /// Delay between polling attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Attempts allowed for the pod create call.
    #[serde(default = "default_create_retry_max")]
    pub create_retry_max: u32,
    /// Attempts allowed while waiting for a network identity.
    #[serde(default = "default_start_retry_max")]
    pub start_retry_max: u32,
    /// Attempts allowed while waiting for the pod server to report
    /// ready.
    #[serde(default = "default_health_retry_max")]
    pub health_retry_max: u32,
    /// End-to-end prompt budget and idle cutoff, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Dispatch worker pool configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Number of dispatch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the dispatch channel.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Provider endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// REST API base URL. Point at a mock server in tests.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Usually injected via `RUNPOD_API_KEY` rather than
    /// written into the file.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_gpu_types() -> Vec<GpuType> {
    vec![GpuType::RtxA6000]
}

const fn default_min_pods() -> usize {
    1
}

const fn default_max_pods() -> usize {
    3
}

const fn default_sensitivity() -> u8 {
    50
}

const fn default_retry_delay_ms() -> u64 {
    500
}

const fn default_create_retry_max() -> u32 {
    10
}

const fn default_start_retry_max() -> u32 {
    120
}

const fn default_health_retry_max() -> u32 {
    240
}

const fn default_request_timeout_secs() -> u64 {
    300
}

const fn default_workers() -> usize {
    8
}

const fn default_queue_depth() -> usize {
    64
}

fn default_base_url() -> String {
    String::from(RUNPOD_REST_URL)
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_pods: default_min_pods(),
            max_pods: default_max_pods(),
            sensitivity: default_sensitivity(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            create_retry_max: default_create_retry_max(),
            start_retry_max: default_start_retry_max(),
            health_retry_max: default_health_retry_max(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

impl TimingConfig {
    /// Converts the file-level timing knobs into the pod retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            create_retry_max: self.create_retry_max,
            start_retry_max: self.start_retry_max,
            health_retry_max: self.health_retry_max,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl FleetConfig {
    /// Builds the manager settings from this configuration.
    #[must_use]
    pub fn fleet_settings(&self) -> FleetSettings {
        FleetSettings {
            pre_name: self.fleet.pre_name.clone(),
            spec: PodSpec {
                template_id: self.fleet.template_id.clone(),
                volume_id: self.fleet.volume_id.clone(),
                image_name: self.fleet.image_name.clone(),
                gpu_types: self.fleet.gpu_types.clone(),
            },
            min_pods: self.scaling.min_pods,
            max_pods: self.scaling.max_pods,
            scaling_sensitivity: self.scaling.sensitivity,
            policy: self.timing.retry_policy(),
            dispatch_workers: self.dispatch.workers,
            dispatch_queue_depth: self.dispatch.queue_depth,
        }
    }

    /// Builds the provider API client from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured or the HTTP client
    /// cannot be created.
    pub fn client(&self) -> Result<RunPodClient> {
        let api_key = self.provider.api_key.as_deref().ok_or_else(|| {
            FleetError::Config(ConfigError::MissingEnvVar {
                name: String::from("RUNPOD_API_KEY"),
            })
        })?;

        RunPodClient::with_base_url(api_key, &self.provider.base_url)
    }
}
