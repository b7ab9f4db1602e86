// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Fleet
//!
//! An autoscaling GPU pod fleet manager and request dispatcher for `RunPod`.
//!
//! ## Overview
//!
//! Halldyll Fleet keeps a pool of GPU pods sized to observed demand and
//! routes inference prompts onto them:
//!
//! - Drive each pod through its lifecycle (create, start, health-check,
//!   serve, stop, destroy) over the `RunPod` REST API
//! - Scale the pool between configured bounds from a rolling load history
//! - Dispatch queued prompts to idle pods with retry and timeout
//! - Reap stopped, timed-out, and failed pods
//!
//! ## Architecture
//!
//! Two layers compose the core:
//!
//! 1. **[`fleet::ManagedPod`]**: one remote pod as a concurrent state
//!    machine (`Creating -> Starting -> Free <-> Processing`, with
//!    `Stopped` and `Terminated` off-ramps)
//! 2. **[`fleet::PodManager`]**: owns the pod set and runs the control
//!    loop (scale, dispatch, reap), a dispatch worker pool, and an
//!    expiry reaper
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`runpod`]: `RunPod` REST API client and wire types
//! - [`fleet`]: Pod lifecycle control and autoscaling dispatch
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! fleet:
//!   pre_name: easel
//!   template_id: tpl-1a2b3c
//!   volume_id: vol-4d5e6f
//!   image_name: ghcr.io/halldyll/easel:latest
//!   gpu_types: [RTXA6000, RTX4090]
//!
//! scaling:
//!   min_pods: 1
//!   max_pods: 3
//!   sensitivity: 50
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod runpod;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, FleetConfig};
pub use error::{FleetError, Result};
pub use fleet::{
    Autoscaler, FleetSettings, FleetSnapshot, GpuType, ManagedPod, PodInfo, PodManager,
    PodSnapshot, PodSpec, PodState, Prompt, PromptCounts, PromptResult, RetryPolicy,
};
pub use runpod::{RunPodClient, RUNPOD_REST_URL};
