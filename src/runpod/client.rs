//! `RunPod` REST API client implementation.
//!
//! This module provides the HTTP client for the `RunPod` REST API. The
//! base URL is injected configuration so tests can point the fleet at a
//! mock provider.
//!
//! Every method issues exactly one request; retry budgets belong to the
//! pod lifecycle phases that call them, not to the transport layer.

use reqwest::{header, Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{FleetError, Result, RunPodError};

use super::types::{CreatePodRequest, CreatedPod, PodDetails, PodSummary};

/// `RunPod` REST API base URL.
pub const RUNPOD_REST_URL: &str = "https://rest.runpod.io/v1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// `RunPod` REST API client.
#[derive(Debug, Clone)]
pub struct RunPodClient {
    /// HTTP client carrying the bearer token as a default header.
    client: Client,
    /// API base URL, without a trailing slash.
    base_url: String,
}

impl RunPodClient {
    /// Creates a new `RunPod` API client against the production API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(api_key, RUNPOD_REST_URL)
    }

    /// Creates a client against a custom base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is not a valid header value or
    /// the HTTP client cannot be created.
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| RunPodError::network(format!("Invalid API key header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RunPodError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a new pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod cannot be created.
    pub async fn create_pod(&self, request: &CreatePodRequest) -> Result<CreatedPod> {
        trace!("Creating pod: {}", request.name);

        let response = self
            .client
            .post(format!("{}/pods", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("Create request failed: {e}")))?;

        let response = Self::check_status(response, None).await?;
        Self::parse_json(response).await
    }

    /// Lists all pods owned by the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list_pods(&self) -> Result<Vec<PodSummary>> {
        let response = self
            .client
            .get(format!("{}/pods", self.base_url))
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("List request failed: {e}")))?;

        let response = Self::check_status(response, None).await?;
        Self::parse_json(response).await
    }

    /// Inspects a pod by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod is not found or the API call fails.
    pub async fn get_pod(&self, pod_id: &str) -> Result<PodDetails> {
        let response = self
            .client
            .get(format!("{}/pods/{pod_id}", self.base_url))
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("Inspect request failed: {e}")))?;

        let response = Self::check_status(response, Some(pod_id)).await?;
        Self::parse_json(response).await
    }

    /// Stops a pod, reclaiming its compute while keeping its identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod cannot be stopped.
    pub async fn stop_pod(&self, pod_id: &str) -> Result<()> {
        debug!("Stopping pod: {pod_id}");

        let response = self
            .client
            .post(format!("{}/pods/{pod_id}/stop", self.base_url))
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("Stop request failed: {e}")))?;

        Self::check_status(response, Some(pod_id)).await?;
        Ok(())
    }

    /// Starts (resumes) a stopped pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod cannot be started.
    pub async fn start_pod(&self, pod_id: &str) -> Result<()> {
        debug!("Starting pod: {pod_id}");

        let response = self
            .client
            .post(format!("{}/pods/{pod_id}/start", self.base_url))
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("Start request failed: {e}")))?;

        Self::check_status(response, Some(pod_id)).await?;
        Ok(())
    }

    /// Deletes a pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod cannot be deleted. A missing pod
    /// surfaces as [`RunPodError::PodNotFound`], which callers absorb
    /// when treating destroy as idempotent.
    pub async fn delete_pod(&self, pod_id: &str) -> Result<()> {
        debug!("Deleting pod: {pod_id}");

        let response = self
            .client
            .delete(format!("{}/pods/{pod_id}", self.base_url))
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("Delete request failed: {e}")))?;

        Self::check_status(response, Some(pod_id)).await?;
        Ok(())
    }

    /// Maps HTTP status codes onto the error taxonomy, passing 2xx
    /// responses through.
    async fn check_status(response: Response, pod_id: Option<&str>) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(FleetError::RunPod(RunPodError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FleetError::RunPod(RunPodError::AuthenticationFailed {
                message: String::from("Invalid API key"),
            }));
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(pod_id) = pod_id {
                return Err(FleetError::RunPod(RunPodError::PodNotFound {
                    pod_id: pod_id.to_string(),
                }));
            }
        }

        let body = response.text().await.unwrap_or_default();
        Err(FleetError::RunPod(RunPodError::api_error(
            status.as_u16(),
            body,
        )))
    }

    /// Deserializes a JSON response body.
    async fn parse_json<T: for<'de> serde::Deserialize<'de>>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| {
            FleetError::RunPod(RunPodError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })
    }
}
