//! A single managed pod: remote lifecycle, health, and prompt serving.
//!
//! [`ManagedPod`] drives one remote pod through
//! `Creating -> Starting -> Free <-> Processing`, with `Stopped` and
//! `Terminated` off-ramps. A background initializer task walks the
//! provisioning phases (create, network identity, server health); the
//! manager's dispatcher calls [`ManagedPod::submit`] once the pod is
//! leased.
//!
//! All mutable state lives behind one per-pod mutex so compound
//! transitions (clear info + set state, read endpoint + take
//! `Processing`) are atomic to readers. The lock is never held across
//! an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result, RunPodError};
use crate::fleet::types::{GpuType, PodInfo, PodSnapshot, PodState, Prompt, PromptResult};
use crate::runpod::{CreatePodRequest, RunPodClient, INFERENCE_PORT};

/// Timeout for health probes against the pod's own endpoint.
const HEALTH_TIMEOUT_SECS: u64 = 10;

/// Connection timeout for the inference client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Immutable description of the pods a fleet provisions.
#[derive(Debug, Clone)]
pub struct PodSpec {
    /// Provider template the pod is created from.
    pub template_id: String,
    /// Network volume attached to the pod.
    pub volume_id: String,
    /// Container image.
    pub image_name: String,
    /// GPU types in preference order.
    pub gpu_types: Vec<GpuType>,
}

/// Per-phase retry budgets and pacing for the pod lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay between polling attempts in every retry loop.
    pub retry_delay: Duration,
    /// Attempts allowed for the create call.
    pub create_retry_max: u32,
    /// Attempts allowed while waiting for a network identity.
    pub start_retry_max: u32,
    /// Attempts allowed while waiting for the server to report ready.
    pub health_retry_max: u32,
    /// End-to-end budget for one prompt, and the idle cutoff for
    /// scale-down.
    pub request_timeout: Duration,
}

/// Mutable pod state, guarded by one mutex.
struct PodShared {
    state: PodState,
    pod_id: Option<String>,
    pod_info: Option<PodInfo>,
    /// Monotonic time of last state progress or request completion.
    last_progress: Instant,
    /// Wall-clock twin of `last_progress`, for snapshots.
    updated_at: DateTime<Utc>,
    /// Dispatcher lease flag.
    is_working: bool,
    init_task: Option<JoinHandle<()>>,
}

impl PodShared {
    fn touch(&mut self) {
        self.last_progress = Instant::now();
        self.updated_at = Utc::now();
    }
}

/// Body of the `/process` call to the pod's inference endpoint.
#[derive(Serialize)]
struct ProcessRequest {
    url: String,
    workflow_id: i64,
}

/// Body of the pod's `/health` response.
#[derive(Deserialize)]
struct HealthResponse {
    status: Option<String>,
}

/// One remote pod under fleet management.
pub struct ManagedPod {
    name: String,
    spec: PodSpec,
    policy: RetryPolicy,
    /// Provider API client, bearer token as default header.
    client: RunPodClient,
    /// Unauthenticated client for the pod's own HTTP endpoint.
    http: reqwest::Client,
    shared: Mutex<PodShared>,
}

impl ManagedPod {
    /// Constructs a fresh pod and starts its background initializer.
    ///
    /// Returns immediately; the pod begins in `Creating`.
    ///
    /// # Errors
    ///
    /// Returns an error if the inference HTTP client cannot be built.
    pub fn launch(
        name: impl Into<String>,
        spec: PodSpec,
        policy: RetryPolicy,
        client: RunPodClient,
    ) -> Result<Arc<Self>> {
        Self::spawn(name.into(), spec, policy, client, None)
    }

    /// Adopts a pre-existing provider pod and starts the initializer.
    ///
    /// The provider id is retained, so stop/resume cycles keep the same
    /// remote pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the inference HTTP client cannot be built.
    pub fn adopt(
        name: impl Into<String>,
        spec: PodSpec,
        policy: RetryPolicy,
        client: RunPodClient,
        pod_id: impl Into<String>,
    ) -> Result<Arc<Self>> {
        Self::spawn(name.into(), spec, policy, client, Some(pod_id.into()))
    }

    fn spawn(
        name: String,
        spec: PodSpec,
        policy: RetryPolicy,
        client: RunPodClient,
        pod_id: Option<String>,
    ) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                FleetError::RunPod(RunPodError::network(format!(
                    "Failed to create inference client: {e}"
                )))
            })?;

        let pod = Arc::new(Self {
            name,
            spec,
            policy,
            client,
            http,
            shared: Mutex::new(PodShared {
                state: PodState::Creating,
                pod_id,
                pod_info: None,
                last_progress: Instant::now(),
                updated_at: Utc::now(),
                is_working: false,
                init_task: None,
            }),
        });

        pod.spawn_initializer();
        Ok(pod)
    }

    /// Spawns the initializer task and records its handle.
    fn spawn_initializer(self: &Arc<Self>) {
        let pod = Arc::clone(self);
        let handle = tokio::spawn(async move {
            pod.initialize().await;
        });
        self.lock().init_task = Some(handle);
    }

    fn lock(&self) -> MutexGuard<'_, PodShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pod name within the fleet.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PodState {
        self.lock().state
    }

    /// Provider-assigned pod id, if the create call has succeeded.
    #[must_use]
    pub fn pod_id(&self) -> Option<String> {
        self.lock().pod_id.clone()
    }

    /// Whether the dispatcher currently holds the lease.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.lock().is_working
    }

    /// Monotonic time of last state progress or request completion.
    #[must_use]
    pub fn last_progress(&self) -> Instant {
        self.lock().last_progress
    }

    /// Takes the dispatch lease if it is not already held.
    ///
    /// Only the control loop acquires the lease; the dispatch task that
    /// owns it releases it. This keeps at most one submit in flight per
    /// pod.
    #[must_use]
    pub fn try_lease(&self) -> bool {
        let mut shared = self.lock();
        if shared.is_working {
            false
        } else {
            shared.is_working = true;
            true
        }
    }

    /// Releases the dispatch lease.
    pub fn release_lease(&self) {
        self.lock().is_working = false;
    }

    /// Marks the pod for destruction. The manager's reaper will delete
    /// it on a following tick.
    pub fn mark_terminated(&self) {
        self.lock().state = PodState::Terminated;
    }

    /// Atomic point-in-time view of the pod.
    #[must_use]
    pub fn snapshot(&self) -> PodSnapshot {
        let shared = self.lock();
        PodSnapshot {
            name: self.name.clone(),
            pod_id: shared.pod_id.clone(),
            state: shared.state,
            is_working: shared.is_working,
            updated_at: shared.updated_at,
            pod_info: shared.pod_info.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Initializer
    // ------------------------------------------------------------------

    /// Walks the provisioning phases until the pod is `Free` or a phase
    /// budget runs out.
    async fn initialize(self: Arc<Self>) {
        let preexisting = self.lock().pod_id.is_some();

        if preexisting {
            if !self.await_network_identity(true).await {
                return;
            }
        } else {
            if !self.create_remote_pod().await {
                return;
            }
            if !self.await_network_identity(false).await {
                return;
            }
        }

        self.await_server_ready().await;
    }

    /// Create phase: requests a new pod from the provider.
    async fn create_remote_pod(&self) -> bool {
        let request = CreatePodRequest {
            gpu_type_ids: self
                .spec
                .gpu_types
                .iter()
                .map(|g| g.provider_id().to_string())
                .collect(),
            name: self.name.clone(),
            gpu_count: 1,
            network_volume_id: self.spec.volume_id.clone(),
            image_name: self.spec.image_name.clone(),
            template_id: self.spec.template_id.clone(),
            support_public_ip: true,
            ports: vec![format!("{INFERENCE_PORT}/tcp")],
        };

        for attempt in 1..=self.policy.create_retry_max {
            match self.client.create_pod(&request).await {
                Ok(created) => {
                    info!("Created pod {} (id: {})", self.name, created.id);
                    self.lock().pod_id = Some(created.id);
                    return true;
                }
                Err(e) => {
                    debug!(
                        "Create attempt {attempt}/{} failed for {}: {e}",
                        self.policy.create_retry_max, self.name
                    );
                }
            }
            tokio::time::sleep(self.policy.retry_delay).await;
        }

        warn!("Pod {} exhausted its create budget", self.name);
        self.lock().state = PodState::Terminated;
        false
    }

    /// Network phase: polls the inspect endpoint until the provider has
    /// allocated a public IP and port mappings.
    ///
    /// For an adopted pod, the first poll that shows no network
    /// identity issues the provider `start` call once; the pod may have
    /// been sitting stopped.
    async fn await_network_identity(&self, resume_once: bool) -> bool {
        let Some(pod_id) = self.pod_id() else {
            self.lock().state = PodState::Terminated;
            return false;
        };

        let mut resume_available = resume_once;

        for _ in 0..self.policy.start_retry_max {
            match self.client.get_pod(&pod_id).await {
                Ok(details) if details.has_network_identity() => {
                    let info = PodInfo {
                        public_ip: details.public_ip,
                        port_mappings: details.port_mappings.unwrap_or_default(),
                    };
                    let mut shared = self.lock();
                    if shared.state.is_terminal() {
                        return false;
                    }
                    shared.pod_info = Some(info);
                    shared.state = PodState::Starting;
                    shared.touch();
                    drop(shared);
                    info!("Pod {} is starting (id: {pod_id})", self.name);
                    return true;
                }
                Ok(_) => {
                    if resume_available {
                        resume_available = false;
                        debug!("Pod {} has no network identity, issuing start", self.name);
                        if let Err(e) = self.client.start_pod(&pod_id).await {
                            debug!("Start call for {} failed: {e}", self.name);
                        }
                    }
                }
                Err(e) => {
                    debug!("Inspect attempt failed for {}: {e}", self.name);
                }
            }
            tokio::time::sleep(self.policy.retry_delay).await;
        }

        warn!("Pod {} never acquired a network identity", self.name);
        self.lock().state = PodState::Terminated;
        false
    }

    /// Health phase: polls the pod's own `/health` endpoint until it
    /// reports ready.
    async fn await_server_ready(&self) {
        let endpoint = {
            let shared = self.lock();
            shared.pod_info.as_ref().and_then(PodInfo::inference_url)
        };

        let Some(base) = endpoint else {
            warn!("Pod {} has no inference port mapping", self.name);
            self.lock().state = PodState::Terminated;
            return;
        };

        let url = format!("{base}/health");

        for _ in 0..self.policy.health_retry_max {
            if self.probe_health(&url).await {
                let mut shared = self.lock();
                if shared.state.is_terminal() {
                    return;
                }
                shared.state = PodState::Free;
                shared.touch();
                drop(shared);
                info!("Pod {} is ready at {base}", self.name);
                return;
            }
            tokio::time::sleep(self.policy.retry_delay).await;
        }

        warn!("Pod {} never became healthy", self.name);
        self.lock().state = PodState::Terminated;
    }

    /// One health probe. Any transport error, non-2xx status, or body
    /// other than `{"status": "ready"}` counts as not ready.
    async fn probe_health(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthResponse>().await {
                    Ok(body) => body.status.as_deref() == Some("ready"),
                    Err(_) => false,
                }
            }
            Ok(_) | Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Prompt serving
    // ------------------------------------------------------------------

    /// Serves one prompt on this pod.
    ///
    /// Waits until the pod is `Free` with a network identity, posts the
    /// prompt to the inference endpoint, and returns the outcome
    /// in-band. The manager guarantees at most one concurrent call per
    /// pod via the lease.
    pub async fn submit(&self, prompt: &Prompt) -> PromptResult {
        {
            let mut shared = self.lock();
            shared.is_working = true;
            shared.touch();
        }

        let endpoint = loop {
            {
                let mut shared = self.lock();
                match shared.state {
                    PodState::Free => {
                        if let Some(url) =
                            shared.pod_info.as_ref().and_then(PodInfo::inference_url)
                        {
                            shared.state = PodState::Processing;
                            break url;
                        }
                    }
                    PodState::Terminated | PodState::Stopped => {
                        shared.is_working = false;
                        shared.touch();
                        return PromptResult::error("Pod is not working.");
                    }
                    PodState::Creating | PodState::Starting | PodState::Processing => {}
                }

                if shared.last_progress.elapsed() > self.policy.request_timeout {
                    shared.is_working = false;
                    shared.touch();
                    return PromptResult::error("Processing timeout.");
                }
            }
            tokio::time::sleep(self.policy.retry_delay).await;
        };

        debug!("Pod {} processing workflow {}", self.name, prompt.workflow_id);

        let response = self
            .http
            .post(format!("{endpoint}/process"))
            .json(&ProcessRequest {
                url: prompt.url.clone(),
                workflow_id: prompt.workflow_id,
            })
            .timeout(self.policy.request_timeout)
            .send()
            .await;

        let result = match response {
            Ok(response) if response.status().is_success() => {
                let media_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("image/jpeg")
                    .to_string();

                match response.bytes().await {
                    Ok(content) => PromptResult::Success {
                        content: content.to_vec(),
                        media_type,
                    },
                    Err(e) => {
                        debug!("Pod {} response read failed: {e}", self.name);
                        PromptResult::error("Unknown error occurred.")
                    }
                }
            }
            Ok(response) => {
                debug!(
                    "Pod {} returned {} from /process",
                    self.name,
                    response.status()
                );
                PromptResult::error("Unknown error occurred.")
            }
            Err(e) => {
                debug!("Pod {} /process call failed: {e}", self.name);
                PromptResult::error("Unknown error occurred.")
            }
        };

        let mut shared = self.lock();
        shared.is_working = false;
        shared.touch();
        if !matches!(shared.state, PodState::Terminated | PodState::Stopped) {
            shared.state = PodState::Free;
        }
        drop(shared);

        result
    }

    // ------------------------------------------------------------------
    // Remote lifecycle
    // ------------------------------------------------------------------

    /// Pauses the pod on the provider, keeping its identity.
    ///
    /// On success the initializer is aborted, the network identity is
    /// cleared, and the pod is `Stopped`. Returns false if the provider
    /// call fails or the pod was never created.
    pub async fn stop(&self) -> bool {
        let Some(pod_id) = self.pod_id() else {
            return false;
        };

        match self.client.stop_pod(&pod_id).await {
            Ok(()) => {
                let handle = {
                    let mut shared = self.lock();
                    shared.pod_info = None;
                    shared.state = PodState::Stopped;
                    shared.init_task.take()
                };
                if let Some(handle) = handle {
                    handle.abort();
                }
                info!("Pod {} stopped (id: {pod_id})", self.name);
                true
            }
            Err(e) => {
                debug!("Stop failed for {}: {e}", self.name);
                false
            }
        }
    }

    /// Resumes a stopped pod and restarts the initializer.
    ///
    /// Returns false if the provider call fails or the pod was never
    /// created.
    pub async fn resume(self: &Arc<Self>) -> bool {
        let Some(pod_id) = self.pod_id() else {
            return false;
        };

        match self.client.start_pod(&pod_id).await {
            Ok(()) => {
                let handle = {
                    let mut shared = self.lock();
                    shared.pod_info = None;
                    shared.state = PodState::Creating;
                    shared.init_task.take()
                };
                if let Some(handle) = handle {
                    handle.abort();
                }
                self.spawn_initializer();
                info!("Pod {} resuming (id: {pod_id})", self.name);
                true
            }
            Err(e) => {
                debug!("Resume failed for {}: {e}", self.name);
                false
            }
        }
    }

    /// Deletes the pod on the provider and aborts the initializer.
    ///
    /// Idempotent: a pod that was never created, or is already gone on
    /// the provider, reports success.
    pub async fn destroy(&self) -> bool {
        let handle = self.lock().init_task.take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let Some(pod_id) = self.pod_id() else {
            self.lock().state = PodState::Terminated;
            return true;
        };

        match self.client.delete_pod(&pod_id).await {
            Ok(()) => {
                self.lock().state = PodState::Terminated;
                info!("Pod {} destroyed (id: {pod_id})", self.name);
                true
            }
            Err(FleetError::RunPod(e)) if e.is_gone() => {
                self.lock().state = PodState::Terminated;
                debug!("Pod {} already gone on the provider", self.name);
                true
            }
            Err(e) => {
                debug!("Destroy failed for {}: {e}", self.name);
                false
            }
        }
    }
}

impl std::fmt::Debug for ManagedPod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("ManagedPod")
            .field("name", &self.name)
            .field("pod_id", &shared.pod_id)
            .field("state", &shared.state)
            .field("is_working", &shared.is_working)
            .finish_non_exhaustive()
    }
}
