//! The fleet core: pod lifecycle control and autoscaling dispatch.
//!
//! [`pod::ManagedPod`] drives one remote pod; [`manager::PodManager`]
//! owns the pool and runs the control loop; [`scaler::Autoscaler`]
//! turns observed load into a pool target.

pub mod manager;
pub mod pod;
pub mod scaler;
pub mod types;

pub use manager::{FleetSettings, PodManager};
pub use pod::{ManagedPod, PodSpec, RetryPolicy};
pub use scaler::Autoscaler;
pub use types::{
    FleetSnapshot, GpuType, PodInfo, PodSnapshot, PodState, Prompt, PromptCounts, PromptResult,
};
