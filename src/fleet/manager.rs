//! Fleet manager: pod pool ownership, autoscaling, and prompt dispatch.
//!
//! [`PodManager`] owns the set of [`ManagedPod`]s and runs three kinds
//! of background work:
//!
//! - a **control loop** ticking every 50 ms: record load, provision up
//!   to the autoscaler target, trim over the ceiling, dispatch queued
//!   prompts, stop/resume pods toward the target, reap terminated pods;
//! - a **dispatch worker pool** consuming `(pod, id, prompt)` jobs from
//!   a bounded channel (a full channel pushes back on the queued map);
//! - an **expiry reaper** dropping prompt entries older than the
//!   request timeout from all three pipeline maps.
//!
//! The three prompt maps live behind a single mutex so a prompt id is
//! always in exactly one of them. Pods never reference the manager;
//! dispatch jobs hold short-lived `Arc` clones.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fleet::pod::{ManagedPod, PodSpec, RetryPolicy};
use crate::fleet::scaler::Autoscaler;
use crate::fleet::types::{FleetSnapshot, PodState, Prompt, PromptCounts, PromptResult};
use crate::runpod::RunPodClient;

/// Control loop tick interval.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Everything the manager needs to run a fleet.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Name prefix for new pods, and the adoption filter for existing
    /// ones.
    pub pre_name: String,
    /// Description of the pods this fleet provisions.
    pub spec: PodSpec,
    /// Lower pool bound.
    pub min_pods: usize,
    /// Upper pool bound.
    pub max_pods: usize,
    /// Autoscaler peak-weighting sensitivity, 0-100.
    pub scaling_sensitivity: u8,
    /// Retry budgets and pacing shared with every pod.
    pub policy: RetryPolicy,
    /// Number of dispatch workers.
    pub dispatch_workers: usize,
    /// Capacity of the dispatch channel.
    pub dispatch_queue_depth: usize,
}

/// One prompt travelling from the queue to a pod.
struct DispatchJob {
    pod: Arc<ManagedPod>,
    id: Uuid,
    prompt: Prompt,
}

/// The three prompt pipeline maps, guarded by one mutex.
///
/// A prompt id inhabits exactly one map until the caller consumes it or
/// the reaper expires it.
#[derive(Default)]
struct PromptLedger {
    /// Waiting prompts in enqueue order.
    queued: VecDeque<(Uuid, Prompt)>,
    /// Prompts currently on a pod.
    processing: HashMap<Uuid, Prompt>,
    /// Finished prompts awaiting pickup by their caller.
    completed: HashMap<Uuid, Prompt>,
}

impl PromptLedger {
    fn enqueue(&mut self, id: Uuid, prompt: Prompt) {
        self.queued.push_back((id, prompt));
    }

    fn queued_len(&self) -> usize {
        self.queued.len()
    }

    fn in_flight(&self) -> usize {
        self.queued.len() + self.processing.len()
    }

    /// Moves the oldest queued prompt into `processing`.
    fn pop_to_processing(&mut self) -> Option<(Uuid, Prompt)> {
        let (id, prompt) = self.queued.pop_front()?;
        self.processing.insert(id, prompt.clone());
        Some((id, prompt))
    }

    /// Returns a prompt to the front of the queue after a failed hand-off.
    fn requeue_front(&mut self, id: Uuid, prompt: Prompt) {
        self.processing.remove(&id);
        self.queued.push_front((id, prompt));
    }

    /// Attaches a result and moves the prompt to `completed`.
    ///
    /// A prompt the reaper already expired is silently dropped.
    fn complete(&mut self, id: Uuid, result: PromptResult) {
        if let Some(mut prompt) = self.processing.remove(&id) {
            prompt.result = Some(result);
            self.completed.insert(id, prompt);
        }
    }

    fn take_completed(&mut self, id: &Uuid) -> Option<Prompt> {
        self.completed.remove(id)
    }

    /// Drops entries older than the timeout from all three maps.
    fn expire(&mut self, timeout: std::time::Duration) -> usize {
        let before = self.queued.len() + self.processing.len() + self.completed.len();

        self.queued.retain(|(_, p)| p.queued_at.elapsed() <= timeout);
        self.processing.retain(|_, p| p.queued_at.elapsed() <= timeout);
        self.completed.retain(|_, p| p.queued_at.elapsed() <= timeout);

        before - (self.queued.len() + self.processing.len() + self.completed.len())
    }

    fn counts(&self) -> PromptCounts {
        PromptCounts {
            queued: self.queued.len(),
            processing: self.processing.len(),
            completed: self.completed.len(),
        }
    }
}

struct ManagerInner {
    settings: FleetSettings,
    client: RunPodClient,
    pods: Mutex<Vec<Arc<ManagedPod>>>,
    ledger: Mutex<PromptLedger>,
    /// Dispatch channel sender; taken (closed) at manager stop so the
    /// workers drain and exit.
    job_tx: Mutex<Option<mpsc::Sender<DispatchJob>>>,
    stopped: AtomicBool,
}

/// Handle to a running fleet. Cheap to clone.
#[derive(Clone)]
pub struct PodManager {
    inner: Arc<ManagerInner>,
}

impl PodManager {
    /// Adopts matching pre-existing pods, then starts the control loop,
    /// the dispatch workers, and the expiry reaper.
    ///
    /// Never fails: adoption errors are logged and the fleet starts
    /// with fewer pods.
    pub async fn start(settings: FleetSettings, client: RunPodClient) -> Self {
        let (job_tx, job_rx) = mpsc::channel(settings.dispatch_queue_depth);
        let workers = settings.dispatch_workers;

        let inner = Arc::new(ManagerInner {
            settings,
            client,
            pods: Mutex::new(Vec::new()),
            ledger: Mutex::new(PromptLedger::default()),
            job_tx: Mutex::new(Some(job_tx)),
            stopped: AtomicBool::new(false),
        });

        inner.adopt_existing_pods().await;

        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        for worker in 0..workers {
            let inner = Arc::clone(&inner);
            let job_rx = Arc::clone(&job_rx);
            tokio::spawn(async move {
                ManagerInner::dispatch_worker(inner, job_rx, worker).await;
            });
        }

        {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner.control_loop().await;
            });
        }
        {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner.expiry_reaper().await;
            });
        }

        Self { inner }
    }

    /// Queues a prompt and waits for its result.
    ///
    /// Blocks the caller until the prompt completes or the request
    /// timeout elapses, in which case `Error{"request timeout."}` is
    /// returned and the expiry reaper garbage-collects the entry.
    pub async fn enqueue(&self, prompt: Prompt) -> PromptResult {
        let id = Uuid::new_v4();
        debug!("Enqueued prompt {id} for workflow {}", prompt.workflow_id);
        self.inner.ledger_lock().enqueue(id, prompt);

        let deadline = Instant::now() + self.inner.settings.policy.request_timeout;
        loop {
            if let Some(done) = self.inner.ledger_lock().take_completed(&id) {
                return done
                    .result
                    .unwrap_or_else(|| PromptResult::error("unknown error occurred."));
            }
            if Instant::now() >= deadline {
                debug!("Prompt {id} timed out waiting for completion");
                return PromptResult::error("request timeout.");
            }
            tokio::time::sleep(self.inner.settings.policy.retry_delay).await;
        }
    }

    /// Stops the fleet: background tasks exit at their next sleep
    /// boundary, then every pod is destroyed, retrying each destroy
    /// until it reports success.
    pub async fn stop(&self) {
        info!("Stopping fleet manager");
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.tx_lock().take();

        let pods: Vec<Arc<ManagedPod>> = self.inner.pods_lock().clone();
        for pod in &pods {
            while !pod.destroy().await {
                tokio::time::sleep(self.inner.settings.policy.retry_delay).await;
            }
        }
        self.inner.pods_lock().clear();

        info!("Fleet manager stopped, {} pods destroyed", pods.len());
    }

    /// Atomic point-in-time view of the fleet.
    #[must_use]
    pub fn snapshot(&self) -> FleetSnapshot {
        let pods = self
            .inner
            .pods_lock()
            .iter()
            .map(|p| p.snapshot())
            .collect();
        let prompts = self.inner.ledger_lock().counts();
        FleetSnapshot::new(pods, prompts)
    }
}

impl ManagerInner {
    fn pods_lock(&self) -> MutexGuard<'_, Vec<Arc<ManagedPod>>> {
        self.pods.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ledger_lock(&self) -> MutexGuard<'_, PromptLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tx_lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<DispatchJob>>> {
        self.job_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Adopts provider pods whose name carries the fleet prefix and
    /// whose template, volume, and image match the fleet spec exactly.
    /// Unmatched pods are not the fleet's and are left alone.
    async fn adopt_existing_pods(&self) {
        let summaries = match self.client.list_pods().await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!("Could not list existing pods: {e}; starting with an empty fleet");
                return;
            }
        };

        let spec = &self.settings.spec;
        for summary in summaries {
            if !summary.name.starts_with(&self.settings.pre_name) {
                continue;
            }
            if !summary.matches_spec(&spec.template_id, &spec.volume_id, &spec.image_name) {
                debug!("Ignoring pod {} with a different spec", summary.name);
                continue;
            }

            match ManagedPod::adopt(
                summary.name.clone(),
                spec.clone(),
                self.settings.policy,
                self.client.clone(),
                summary.id.clone(),
            ) {
                Ok(pod) => {
                    info!("Adopted pod {} (id: {})", summary.name, summary.id);
                    self.pods_lock().push(pod);
                }
                Err(e) => warn!("Could not adopt pod {}: {e}", summary.name),
            }
        }
    }

    /// The control loop: one tick every 50 ms until the manager stops.
    async fn control_loop(self: Arc<Self>) {
        info!(
            "Control loop started (pool {}..={}, sensitivity {})",
            self.settings.min_pods, self.settings.max_pods, self.settings.scaling_sensitivity
        );

        let mut scaler = Autoscaler::new(
            self.settings.min_pods,
            self.settings.max_pods,
            self.settings.scaling_sensitivity,
        );

        while !self.is_stopped() {
            let target = {
                let ledger = self.ledger_lock();
                scaler.record_and_target(ledger.in_flight())
            };

            self.fill_to_target(target);
            self.trim_over_ceiling();
            self.dispatch_queued().await;
            self.balance_active(target).await;
            self.reap_terminated().await;

            tokio::time::sleep(TICK_INTERVAL).await;
        }

        debug!("Control loop exiting");
    }

    /// Provisions fresh pods while the non-terminated pool is below the
    /// autoscaler target.
    fn fill_to_target(&self, target: usize) {
        let mut pods = self.pods_lock();
        let mut provisionable = pods.iter().filter(|p| !p.state().is_terminal()).count();

        while provisionable < target {
            let name = format!("{}-{}", self.settings.pre_name, Uuid::new_v4());
            match ManagedPod::launch(
                name.clone(),
                self.settings.spec.clone(),
                self.settings.policy,
                self.client.clone(),
            ) {
                Ok(pod) => {
                    info!("Provisioning pod {name} ({provisionable} -> {target})");
                    pods.push(pod);
                    provisionable += 1;
                }
                Err(e) => {
                    warn!("Could not construct pod {name}: {e}");
                    break;
                }
            }
        }
    }

    /// Marks surplus pods above the hard ceiling as terminated,
    /// preferring stopped, then creating, then starting, then the
    /// longest-idle. Pods that are processing, already terminated, or
    /// leased are skipped.
    fn trim_over_ceiling(&self) {
        let pods: Vec<Arc<ManagedPod>> = self.pods_lock().clone();

        let mut candidates: Vec<(Arc<ManagedPod>, PodState, bool, Instant)> = pods
            .into_iter()
            .filter(|p| !p.state().is_terminal())
            .map(|p| {
                let state = p.state();
                let working = p.is_working();
                let progress = p.last_progress();
                (p, state, working, progress)
            })
            .collect();

        if candidates.len() <= self.settings.max_pods {
            return;
        }
        let excess = candidates.len() - self.settings.max_pods;

        candidates.sort_by_key(|(_, state, _, progress)| {
            (
                *state != PodState::Stopped,
                *state != PodState::Creating,
                *state != PodState::Starting,
                *progress,
            )
        });

        let mut terminated = 0;
        for (pod, state, working, _) in candidates {
            if terminated >= excess {
                break;
            }
            if matches!(state, PodState::Processing | PodState::Terminated) || working {
                continue;
            }
            info!("Trimming pod {} over pool ceiling", pod.name());
            pod.mark_terminated();
            terminated += 1;
        }
    }

    /// Hands queued prompts to the best available pods.
    ///
    /// Pod preference: unleased first, then `Free > Starting > Creating`,
    /// then most recently updated. A stopped pod is resumed on the spot
    /// and skipped if the resume fails. Backpressure from a full
    /// dispatch channel returns the prompt to the queue front and ends
    /// the scan for this tick.
    async fn dispatch_queued(&self) {
        let attempts = self.ledger_lock().queued_len();

        for _ in 0..attempts {
            let pods: Vec<Arc<ManagedPod>> = self.pods_lock().clone();

            let mut candidates: Vec<(Arc<ManagedPod>, PodState, bool, Instant)> = pods
                .into_iter()
                .map(|p| {
                    let state = p.state();
                    let working = p.is_working();
                    let progress = p.last_progress();
                    (p, state, working, progress)
                })
                .collect();

            candidates.sort_by_key(|(_, state, working, progress)| {
                (
                    *working,
                    *state != PodState::Free,
                    *state != PodState::Starting,
                    *state != PodState::Creating,
                    Reverse(*progress),
                )
            });

            let mut dispatched = false;
            for (pod, state, working, _) in candidates {
                if working || state.is_terminal() {
                    continue;
                }
                if state == PodState::Stopped && !pod.resume().await {
                    continue;
                }
                if !pod.try_lease() {
                    continue;
                }

                let Some((id, prompt)) = self.ledger_lock().pop_to_processing() else {
                    pod.release_lease();
                    return;
                };

                let sender = self.tx_lock().clone();
                let Some(sender) = sender else {
                    self.ledger_lock().requeue_front(id, prompt);
                    pod.release_lease();
                    return;
                };

                let job = DispatchJob {
                    pod: Arc::clone(&pod),
                    id,
                    prompt,
                };
                match sender.try_send(job) {
                    Ok(()) => {
                        debug!("Dispatched prompt {id} to pod {}", pod.name());
                        dispatched = true;
                    }
                    Err(e) => {
                        let job = match e {
                            mpsc::error::TrySendError::Full(job)
                            | mpsc::error::TrySendError::Closed(job) => job,
                        };
                        self.ledger_lock().requeue_front(job.id, job.prompt);
                        job.pod.release_lease();
                        return;
                    }
                }
                break;
            }

            if !dispatched {
                break;
            }
        }
    }

    /// Converges the active pod count toward the autoscaler target:
    /// stops long-idle surplus pods, resumes stopped pods under load.
    async fn balance_active(&self, target: usize) {
        let pods: Vec<Arc<ManagedPod>> = self.pods_lock().clone();
        let active = pods.iter().filter(|p| p.state().is_active()).count();

        if active > target {
            let surplus = active - target;

            let mut candidates: Vec<(Arc<ManagedPod>, PodState, bool, Instant)> = pods
                .into_iter()
                .map(|p| {
                    let state = p.state();
                    let working = p.is_working();
                    let progress = p.last_progress();
                    (p, state, working, progress)
                })
                .collect();
            candidates.sort_by_key(|(_, _, _, progress)| *progress);

            let mut stopped = 0;
            for (pod, state, working, progress) in candidates {
                if stopped >= surplus {
                    break;
                }
                if matches!(state, PodState::Stopped | PodState::Terminated) || working {
                    continue;
                }
                if progress.elapsed() <= self.settings.policy.request_timeout {
                    continue;
                }
                if pod.stop().await {
                    info!("Scaled down pod {} (active {active} > target {target})", pod.name());
                    stopped += 1;
                }
            }
        } else if active < target {
            let wanted = target - active;
            let mut resumed = 0;

            for pod in pods {
                if resumed >= wanted {
                    break;
                }
                if pod.state() == PodState::Stopped && pod.resume().await {
                    info!("Scaled up pod {} (active {active} < target {target})", pod.name());
                    resumed += 1;
                }
            }
        }
    }

    /// Destroys terminated pods and removes them from the pool.
    async fn reap_terminated(&self) {
        let pods: Vec<Arc<ManagedPod>> = self.pods_lock().clone();

        for pod in pods {
            if pod.state().is_terminal() && pod.destroy().await {
                debug!("Reaped pod {}", pod.name());
                self.pods_lock().retain(|p| !Arc::ptr_eq(p, &pod));
            }
        }
    }

    /// Drops expired prompt entries on a fixed cadence.
    async fn expiry_reaper(self: Arc<Self>) {
        while !self.is_stopped() {
            let dropped = self
                .ledger_lock()
                .expire(self.settings.policy.request_timeout);
            if dropped > 0 {
                debug!("Expired {dropped} prompt entries");
            }
            tokio::time::sleep(self.settings.policy.retry_delay).await;
        }
        debug!("Expiry reaper exiting");
    }

    /// One dispatch worker: pulls jobs until the channel closes.
    async fn dispatch_worker(
        inner: Arc<Self>,
        job_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchJob>>>,
        worker: usize,
    ) {
        loop {
            let job = {
                let mut rx = job_rx.lock().await;
                rx.recv().await
            };
            let Some(job) = job else {
                break;
            };
            inner.run_dispatch(job).await;
        }
        debug!("Dispatch worker {worker} exiting");
    }

    /// Carries one prompt through a pod and records the outcome.
    ///
    /// The prompt is already in `processing` (moved there when the pod
    /// was leased). The submit runs in its own task so a panic cannot
    /// leak the lease or lose the completion.
    async fn run_dispatch(&self, job: DispatchJob) {
        let pod = Arc::clone(&job.pod);
        let prompt = job.prompt.clone();

        let outcome = tokio::spawn(async move { pod.submit(&prompt).await }).await;
        let result =
            outcome.unwrap_or_else(|_| PromptResult::error("unknown error occurred."));

        job.pod.release_lease();
        self.ledger_lock().complete(job.id, result);
    }
}

impl std::fmt::Debug for PodManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodManager")
            .field("pre_name", &self.inner.settings.pre_name)
            .field("stopped", &self.inner.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn prompt(url: &str) -> Prompt {
        Prompt::new(url, 1)
    }

    #[test]
    fn test_ledger_moves_prompts_in_enqueue_order() {
        let mut ledger = PromptLedger::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        ledger.enqueue(first, prompt("a"));
        ledger.enqueue(second, prompt("b"));

        let (id, taken) = ledger.pop_to_processing().expect("pop");
        assert_eq!(id, first);
        assert_eq!(taken.url, "a");
        assert_eq!(ledger.queued_len(), 1);
        assert_eq!(ledger.counts().processing, 1);
    }

    #[test]
    fn test_ledger_prompt_lives_in_exactly_one_map() {
        let mut ledger = PromptLedger::default();
        let id = Uuid::new_v4();
        ledger.enqueue(id, prompt("a"));
        assert_eq!(ledger.in_flight(), 1);

        let (popped, _) = ledger.pop_to_processing().expect("pop");
        assert_eq!(popped, id);
        let counts = ledger.counts();
        assert_eq!((counts.queued, counts.processing, counts.completed), (0, 1, 0));

        ledger.complete(id, PromptResult::error("x"));
        let counts = ledger.counts();
        assert_eq!((counts.queued, counts.processing, counts.completed), (0, 0, 1));

        let done = ledger.take_completed(&id).expect("completed");
        assert_eq!(
            done.result,
            Some(PromptResult::error("x"))
        );
        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn test_ledger_requeue_returns_prompt_to_front() {
        let mut ledger = PromptLedger::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        ledger.enqueue(first, prompt("a"));
        ledger.enqueue(second, prompt("b"));

        let (id, taken) = ledger.pop_to_processing().expect("pop");
        ledger.requeue_front(id, taken);

        // The returned prompt is next in line again.
        let (again, _) = ledger.pop_to_processing().expect("pop");
        assert_eq!(again, first);
    }

    #[test]
    fn test_ledger_complete_after_expiry_is_dropped() {
        let mut ledger = PromptLedger::default();
        let id = Uuid::new_v4();
        ledger.enqueue(id, prompt("a"));
        let _ = ledger.pop_to_processing();

        // Everything is older than a zero timeout.
        std::thread::sleep(Duration::from_millis(2));
        let dropped = ledger.expire(Duration::from_secs(0));
        assert_eq!(dropped, 1);

        ledger.complete(id, PromptResult::error("late"));
        assert_eq!(ledger.counts().completed, 0);
        assert!(ledger.take_completed(&id).is_none());
    }

    #[test]
    fn test_ledger_expire_keeps_fresh_entries() {
        let mut ledger = PromptLedger::default();
        ledger.enqueue(Uuid::new_v4(), prompt("a"));
        ledger.enqueue(Uuid::new_v4(), prompt("b"));

        let dropped = ledger.expire(Duration::from_secs(60));
        assert_eq!(dropped, 0);
        assert_eq!(ledger.queued_len(), 2);
    }
}
