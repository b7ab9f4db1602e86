//! Integration tests for the fleet manager and managed pods.
//!
//! These tests verify the BEHAVIOR of the pod lifecycle controller by
//! mocking the `RunPod` REST API and the pod inference endpoint with
//! `wiremock`, then driving the real types against them.
//!
//! # Test Organization
//!
//! 1. Provider client wire format
//! 2. Pod lifecycle: provisioning, exhaustion, health
//! 3. Pod lifecycle: stop / resume / destroy
//! 4. Manager: adoption
//! 5. Manager: dispatch and end-to-end prompts
//! 6. Manager: autoscaling gate and timeouts
//! 7. Manager: autoscale down

use std::time::{Duration, Instant};

use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use halldyll_fleet::fleet::{
    FleetSettings, GpuType, ManagedPod, PodManager, PodSpec, PodState, Prompt, PromptResult,
    RetryPolicy,
};
use halldyll_fleet::runpod::RunPodClient;

/// Helper: fleet spec used across the tests.
fn test_spec() -> PodSpec {
    PodSpec {
        template_id: String::from("tpl-1"),
        volume_id: String::from("vol-1"),
        image_name: String::from("ghcr.io/halldyll/easel:test"),
        gpu_types: vec![GpuType::RtxA6000],
    }
}

/// Helper: fast retry policy so tests run in milliseconds.
fn test_policy(request_timeout: Duration) -> RetryPolicy {
    RetryPolicy {
        retry_delay: Duration::from_millis(20),
        create_retry_max: 3,
        start_retry_max: 50,
        health_retry_max: 50,
        request_timeout,
    }
}

/// Helper: manager settings against the given bounds.
fn test_settings(min_pods: usize, max_pods: usize, request_timeout: Duration) -> FleetSettings {
    FleetSettings {
        pre_name: String::from("fleet"),
        spec: test_spec(),
        min_pods,
        max_pods,
        scaling_sensitivity: 50,
        policy: test_policy(request_timeout),
        dispatch_workers: 2,
        dispatch_queue_depth: 8,
    }
}

/// Helper: client pointed at a wiremock provider.
fn mock_client(provider: &MockServer) -> RunPodClient {
    assert_ok!(RunPodClient::with_base_url("test-key", &provider.uri()))
}

/// Helper: polls a condition until it holds or the timeout elapses.
async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Helper: mounts an empty pod listing (no pods to adopt).
async fn mount_empty_listing(provider: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(provider)
        .await;
}

/// Helper: mounts create/inspect/delete for a pod that comes up with
/// the given inference host port.
async fn mount_healthy_provisioning(provider: &MockServer, pod_id: &str, inference_port: u16) {
    Mock::given(method("POST"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": pod_id })))
        .mount(provider)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/pods/{pod_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": pod_id,
            "name": "fleet-test",
            "publicIp": "127.0.0.1",
            "portMappings": { "8188": inference_port },
            "templateId": "tpl-1",
            "networkVolumeId": "vol-1",
            "imageName": "ghcr.io/halldyll/easel:test"
        })))
        .mount(provider)
        .await;

    Mock::given(method("DELETE"))
        .and(path_regex("^/pods/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(provider)
        .await;
}

/// Helper: mounts a pod inference server that is ready and answers
/// `/process` with the given body and content type.
async fn mount_ready_pod_server(pod_server: &MockServer, body: &[u8], content_type: &str) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ready" })))
        .mount(pod_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/process"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type))
        .mount(pod_server)
        .await;
}

// =============================================================================
// 1. Provider Client Wire Format
// =============================================================================

#[tokio::test]
async fn create_pod_sends_rest_payload() {
    let provider = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pods"))
        .and(body_partial_json(json!({
            "gpuTypeIds": ["NVIDIA RTX A6000"],
            "gpuCount": 1,
            "networkVolumeId": "vol-1",
            "templateId": "tpl-1",
            "supportPublicIp": true,
            "ports": ["8188/tcp"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p1" })))
        .expect(1)
        .mount(&provider)
        .await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-wire",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));

    assert!(
        wait_for(|| pod.pod_id().is_some(), Duration::from_secs(2)).await,
        "create call never succeeded"
    );
    assert_eq!(pod.pod_id().as_deref(), Some("p1"));
}

#[tokio::test]
async fn list_pods_maps_summaries() {
    let provider = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "a1",
                "name": "fleet-a",
                "templateId": "tpl-1",
                "networkVolumeId": "vol-1",
                "imageName": "img"
            }
        ])))
        .mount(&provider)
        .await;

    let client = mock_client(&provider);
    let pods = client.list_pods().await.expect("list");
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].id, "a1");
    assert!(pods[0].matches_spec("tpl-1", "vol-1", "img"));
}

// =============================================================================
// 2. Pod Lifecycle: Provisioning, Exhaustion, Health
// =============================================================================

#[tokio::test]
async fn pod_reaches_free_when_provider_and_server_are_healthy() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;
    mount_ready_pod_server(&pod_server, b"ok", "image/png").await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-happy",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));

    assert!(
        wait_for(|| pod.state() == PodState::Free, Duration::from_secs(3)).await,
        "pod never became free, stuck in {:?}",
        pod.state()
    );

    let snapshot = pod.snapshot();
    assert_eq!(snapshot.pod_id.as_deref(), Some("p1"));
    assert_eq!(snapshot.public_ip(), Some("127.0.0.1"));
    assert!(!snapshot.is_working);
}

#[tokio::test]
async fn create_exhaustion_terminates_pod() {
    let provider = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&provider)
        .await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-exhausted",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));

    assert!(
        wait_for(|| pod.state() == PodState::Terminated, Duration::from_secs(2)).await,
        "pod never terminated after create exhaustion"
    );
    assert_eq!(pod.pod_id(), None);
}

#[tokio::test]
async fn health_exhaustion_terminates_pod() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;

    // The server provisions but never reports ready.
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "starting" })))
        .mount(&pod_server)
        .await;

    let mut policy = test_policy(Duration::from_secs(5));
    policy.health_retry_max = 5;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-unhealthy",
        test_spec(),
        policy,
        mock_client(&provider),
    ));

    assert!(
        wait_for(|| pod.state() == PodState::Terminated, Duration::from_secs(3)).await,
        "pod never terminated after health exhaustion"
    );
}

// =============================================================================
// 3. Pod Lifecycle: Stop / Resume / Destroy
// =============================================================================

#[tokio::test]
async fn stop_then_resume_returns_to_free_with_same_pod_id() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;
    mount_ready_pod_server(&pod_server, b"ok", "image/png").await;

    Mock::given(method("POST"))
        .and(path("/pods/p1/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/pods/p1/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&provider)
        .await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-cycle",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));

    assert!(wait_for(|| pod.state() == PodState::Free, Duration::from_secs(3)).await);

    assert!(pod.stop().await, "stop should succeed");
    let stopped = pod.snapshot();
    assert_eq!(stopped.state, PodState::Stopped);
    assert_eq!(stopped.pod_info, None, "stop must clear the network identity");

    assert!(pod.resume().await, "resume should succeed");
    assert!(
        wait_for(|| pod.state() == PodState::Free, Duration::from_secs(3)).await,
        "resumed pod never became free"
    );
    assert_eq!(pod.pod_id().as_deref(), Some("p1"), "resume must keep the pod id");
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;
    mount_ready_pod_server(&pod_server, b"ok", "image/png").await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-doomed",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));
    assert!(wait_for(|| pod.pod_id().is_some(), Duration::from_secs(2)).await);

    assert!(pod.destroy().await, "first destroy should succeed");
    assert!(pod.destroy().await, "repeat destroy should also succeed");
    assert_eq!(pod.state(), PodState::Terminated);
}

#[tokio::test]
async fn destroy_absorbs_provider_not_found() {
    let provider = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p9" })))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/pods/p9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "publicIp": "" })))
        .mount(&provider)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/pods/p9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&provider)
        .await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-ghost",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));
    assert!(wait_for(|| pod.pod_id().is_some(), Duration::from_secs(2)).await);

    assert!(pod.destroy().await, "404 on delete counts as destroyed");
}

#[tokio::test]
async fn destroy_without_pod_id_succeeds_locally() {
    let provider = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&provider)
        .await;

    let pod = assert_ok!(ManagedPod::launch(
        "fleet-stillborn",
        test_spec(),
        test_policy(Duration::from_secs(5)),
        mock_client(&provider),
    ));

    assert!(pod.destroy().await, "a pod that was never created has nothing to delete");
    assert_eq!(pod.state(), PodState::Terminated);
}

// =============================================================================
// 4. Manager: Adoption
// =============================================================================

#[tokio::test]
async fn adoption_takes_matching_pods_only() {
    let provider = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "a1",
                "name": "fleet-adopted",
                "templateId": "tpl-1",
                "networkVolumeId": "vol-1",
                "imageName": "ghcr.io/halldyll/easel:test"
            },
            {
                "id": "x1",
                "name": "other-x",
                "templateId": "tpl-1",
                "networkVolumeId": "vol-1",
                "imageName": "ghcr.io/halldyll/easel:test"
            },
            {
                "id": "a2",
                "name": "fleet-drifted",
                "templateId": "tpl-2",
                "networkVolumeId": "vol-1",
                "imageName": "ghcr.io/halldyll/easel:test"
            }
        ])))
        .mount(&provider)
        .await;

    // The adopted pod has no network identity yet; adoption must issue
    // the start call once and keep polling.
    Mock::given(method("GET"))
        .and(path("/pods/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "publicIp": "" })))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/pods/a1/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&provider)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex("^/pods/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&provider)
        .await;

    let manager = PodManager::start(
        test_settings(0, 1, Duration::from_secs(5)),
        mock_client(&provider),
    )
    .await;

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.pods.len(), 1, "exactly one pod matches prefix and spec");
    assert_eq!(snapshot.pods[0].pod_id.as_deref(), Some("a1"));
    assert_eq!(snapshot.pods[0].name, "fleet-adopted");

    manager.stop().await;
}

// =============================================================================
// 5. Manager: Dispatch and End-to-End Prompts
// =============================================================================

#[tokio::test]
async fn happy_path_prompt_roundtrip() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_empty_listing(&provider).await;
    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;
    mount_ready_pod_server(&pod_server, b"ok", "image/png").await;

    let manager = PodManager::start(
        test_settings(1, 2, Duration::from_secs(10)),
        mock_client(&provider),
    )
    .await;

    let result = manager.enqueue(Prompt::new("u", 1)).await;
    match result {
        PromptResult::Success {
            content,
            media_type,
        } => {
            assert_eq!(content, b"ok");
            assert_eq!(media_type, "image/png");
        }
        PromptResult::Error { message } => panic!("expected success, got error: {message}"),
    }

    // The pod returns to Free after serving.
    assert!(
        wait_for(
            || {
                let snapshot = manager.snapshot();
                snapshot.count(PodState::Free) >= 1
                    && snapshot.pods.iter().all(|p| !p.is_working)
            },
            Duration::from_secs(3),
        )
        .await,
        "pod did not return to free after serving"
    );

    manager.stop().await;
    assert!(manager.snapshot().pods.is_empty(), "stop destroys every pod");
}

#[tokio::test]
async fn inference_error_surfaces_in_band() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_empty_listing(&provider).await;
    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ready" })))
        .mount(&pod_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/process"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&pod_server)
        .await;

    let manager = PodManager::start(
        test_settings(1, 1, Duration::from_secs(10)),
        mock_client(&provider),
    )
    .await;

    let result = manager.enqueue(Prompt::new("u", 7)).await;
    assert_eq!(
        result,
        PromptResult::Error {
            message: String::from("Unknown error occurred.")
        }
    );

    manager.stop().await;
}

#[tokio::test]
async fn enqueue_times_out_when_no_pod_becomes_free() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_empty_listing(&provider).await;
    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;

    // The pod provisions but never reports ready, so the prompt is
    // dispatched onto a pod that never serves it. The caller's budget
    // expires first.
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "starting" })))
        .mount(&pod_server)
        .await;

    let mut settings = test_settings(0, 1, Duration::from_secs(1));
    settings.policy.health_retry_max = 500;

    let manager = PodManager::start(settings, mock_client(&provider)).await;

    let started = Instant::now();
    let result = manager.enqueue(Prompt::new("u", 1)).await;
    assert_eq!(
        result,
        PromptResult::Error {
            message: String::from("request timeout.")
        }
    );
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "timeout must fire near the request budget"
    );

    manager.stop().await;
}

// =============================================================================
// 6. Manager: Autoscaling Gate
// =============================================================================

#[tokio::test]
async fn provisioning_is_gated_by_load() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_empty_listing(&provider).await;
    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;
    mount_ready_pod_server(&pod_server, b"ok", "image/png").await;

    let manager = PodManager::start(
        test_settings(0, 2, Duration::from_secs(10)),
        mock_client(&provider),
    )
    .await;

    // With min_pods = 0 and no load, nothing is provisioned.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        manager.snapshot().pods.is_empty(),
        "an idle fleet with min_pods=0 must not provision pods"
    );

    // Load arrives: the scaler raises the target and a pod appears.
    let result = manager.enqueue(Prompt::new("u", 1)).await;
    assert!(result.is_success(), "prompt should be served once a pod comes up");
    assert!(!manager.snapshot().pods.is_empty());

    manager.stop().await;
}

// =============================================================================
// 7. Manager: Autoscale Down
// =============================================================================

#[tokio::test]
async fn surplus_pods_are_stopped_when_load_drops() {
    let provider = MockServer::start().await;
    let pod_server = MockServer::start().await;

    mount_empty_listing(&provider).await;
    mount_healthy_provisioning(&provider, "p1", pod_server.address().port()).await;
    mount_ready_pod_server(&pod_server, b"ok", "image/png").await;

    Mock::given(method("POST"))
        .and(path("/pods/p1/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&provider)
        .await;

    // Pure-average scaling so the burst ages out of the sample window
    // within a few dozen ticks; the short request timeout doubles as a
    // short idle cutoff for scale-down.
    let mut settings = test_settings(1, 2, Duration::from_secs(1));
    settings.scaling_sensitivity = 0;

    let manager = PodManager::start(settings, mock_client(&provider)).await;

    // Two concurrent prompts push the target to the ceiling and a
    // second pod comes up.
    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.enqueue(Prompt::new("a", 1)).await }
    });
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.enqueue(Prompt::new("b", 2)).await }
    });
    assert!(first.await.expect("join").is_success());
    assert!(second.await.expect("join").is_success());

    assert!(
        wait_for(|| manager.snapshot().pods.len() == 2, Duration::from_secs(3)).await,
        "burst load never raised the fleet to two pods"
    );

    // Load is gone: once the average decays and the surplus pod has
    // idled past the request timeout, it is stopped. The floor pod
    // keeps serving capacity.
    assert!(
        wait_for(
            || {
                let snapshot = manager.snapshot();
                snapshot.count(PodState::Stopped) == 1 && snapshot.count(PodState::Free) == 1
            },
            Duration::from_secs(10),
        )
        .await,
        "surplus pod was never stopped after load dropped"
    );

    // Stopped pods are parked, not destroyed: the pool keeps both pods
    // and nothing ever reaches Terminated.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = manager.snapshot();
    assert_eq!(settled.pods.len(), 2, "stopped pods are kept, not reaped");
    assert_eq!(settled.count(PodState::Terminated), 0);
    assert_eq!(settled.count(PodState::Stopped), 1);
    assert_eq!(settled.count(PodState::Free), 1);

    manager.stop().await;
}
