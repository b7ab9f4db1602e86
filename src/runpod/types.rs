//! `RunPod` REST API types and data structures.
//!
//! This module defines the wire types used for communication with the
//! `RunPod` REST API (`https://rest.runpod.io/v1`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Service port every fleet pod exposes for inference traffic.
pub const INFERENCE_PORT: &str = "8188";

/// Request to create a new pod.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodRequest {
    /// GPU type identifiers, in preference order.
    pub gpu_type_ids: Vec<String>,
    /// Pod name.
    pub name: String,
    /// Number of GPUs.
    pub gpu_count: u32,
    /// Network volume ID.
    pub network_volume_id: String,
    /// Container image.
    pub image_name: String,
    /// Template ID.
    pub template_id: String,
    /// Whether the pod gets a public IP.
    pub support_public_ip: bool,
    /// Ports to expose (e.g., "8188/tcp").
    pub ports: Vec<String>,
}

/// Response to a pod creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPod {
    /// Provider-assigned pod identifier.
    pub id: String,
}

/// A pod entry as returned by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    /// Unique pod identifier.
    pub id: String,
    /// Pod name.
    #[serde(default)]
    pub name: String,
    /// Template ID the pod was created from.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Attached network volume ID.
    #[serde(default)]
    pub network_volume_id: Option<String>,
    /// Container image.
    #[serde(default)]
    pub image_name: Option<String>,
}

/// Detailed pod information from the inspect endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDetails {
    /// Unique pod identifier.
    #[serde(default)]
    pub id: String,
    /// Pod name.
    #[serde(default)]
    pub name: String,
    /// Public IP, empty until the provider allocates one.
    #[serde(default)]
    pub public_ip: String,
    /// Service-port to host-port mappings, absent until allocated.
    #[serde(default)]
    pub port_mappings: Option<HashMap<String, u16>>,
    /// Template ID the pod was created from.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Attached network volume ID.
    #[serde(default)]
    pub network_volume_id: Option<String>,
    /// Container image.
    #[serde(default)]
    pub image_name: Option<String>,
}

impl PodDetails {
    /// Returns true once the provider has allocated a public network
    /// identity (non-empty IP and at least one port mapping).
    ///
    /// An empty `publicIp` or missing `portMappings` means "not ready
    /// yet", never failure.
    #[must_use]
    pub fn has_network_identity(&self) -> bool {
        !self.public_ip.is_empty()
            && self.port_mappings.as_ref().is_some_and(|m| !m.is_empty())
    }
}

impl PodSummary {
    /// Returns true if this pod was created from exactly the given
    /// template, volume, and image.
    ///
    /// Used at adoption time to decide whether a pre-existing pod
    /// belongs to this fleet.
    #[must_use]
    pub fn matches_spec(&self, template_id: &str, volume_id: &str, image_name: &str) -> bool {
        self.template_id.as_deref() == Some(template_id)
            && self.network_volume_id.as_deref() == Some(volume_id)
            && self.image_name.as_deref() == Some(image_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_serializes_camel_case() {
        let request = CreatePodRequest {
            gpu_type_ids: vec![String::from("NVIDIA RTX A6000")],
            name: String::from("fleet-abc"),
            gpu_count: 1,
            network_volume_id: String::from("vol-1"),
            image_name: String::from("ghcr.io/halldyll/easel:latest"),
            template_id: String::from("tpl-1"),
            support_public_ip: true,
            ports: vec![String::from("8188/tcp")],
        };

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["gpuTypeIds"][0], "NVIDIA RTX A6000");
        assert_eq!(value["networkVolumeId"], "vol-1");
        assert_eq!(value["templateId"], "tpl-1");
        assert_eq!(value["supportPublicIp"], true);
        assert_eq!(value["ports"][0], "8188/tcp");
    }

    #[test]
    fn test_pod_details_network_identity() {
        let json = r#"{
            "id": "p1",
            "name": "fleet-abc",
            "publicIp": "1.2.3.4",
            "portMappings": { "8188": 30000 },
            "templateId": "tpl-1",
            "networkVolumeId": "vol-1",
            "imageName": "img"
        }"#;
        let details: PodDetails = serde_json::from_str(json).expect("deserialize");
        assert!(details.has_network_identity());
        assert_eq!(
            details.port_mappings.and_then(|m| m.get(INFERENCE_PORT).copied()),
            Some(30000)
        );
    }

    #[test]
    fn test_pod_details_pending_identity() {
        let json = r#"{ "id": "p1", "publicIp": "", "portMappings": null }"#;
        let details: PodDetails = serde_json::from_str(json).expect("deserialize");
        assert!(!details.has_network_identity());

        let json = r#"{ "id": "p1" }"#;
        let details: PodDetails = serde_json::from_str(json).expect("deserialize");
        assert!(!details.has_network_identity());
    }

    #[test]
    fn test_summary_spec_matching() {
        let summary = PodSummary {
            id: String::from("p1"),
            name: String::from("fleet-a"),
            template_id: Some(String::from("tpl-1")),
            network_volume_id: Some(String::from("vol-1")),
            image_name: Some(String::from("img")),
        };

        assert!(summary.matches_spec("tpl-1", "vol-1", "img"));
        assert!(!summary.matches_spec("tpl-2", "vol-1", "img"));
        assert!(!summary.matches_spec("tpl-1", "vol-1", "other"));
    }
}
