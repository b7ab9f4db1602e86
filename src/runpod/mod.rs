//! `RunPod` REST API integration.
//!
//! This module contains the HTTP client and wire types for the
//! `RunPod` REST API consumed by the fleet.

pub mod client;
pub mod types;

pub use client::{RunPodClient, RUNPOD_REST_URL};
pub use types::{CreatePodRequest, CreatedPod, PodDetails, PodSummary, INFERENCE_PORT};
