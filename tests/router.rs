mod common;

use async_trait::async_trait;
use challenge_orchestrator::{
    backend::{DisabledVmBackend, LegacyVmBackend, VmResponse},
    types::{Action, ChallengeMetadata, InstanceRequest, Status},
    BackendRouter,
};
use common::{challenge, orchestrator, request, FakeCluster, NAMESPACE};
use std::sync::Arc;

struct StubVm;

#[async_trait]
impl LegacyVmBackend for StubVm {
    async fn handle(&self, request: &InstanceRequest) -> anyhow::Result<VmResponse> {
        Ok(VmResponse {
            status: Some("active".to_string()),
            ip: Some("198.51.100.20".to_string()),
            instance_id: Some(format!("vm-{}", request.candidate_id)),
            ..Default::default()
        })
    }
}

fn router(cluster: &Arc<FakeCluster>) -> BackendRouter {
    BackendRouter::new(
        Arc::new(orchestrator(cluster.clone())),
        Arc::new(DisabledVmBackend),
    )
}

#[tokio::test(start_paused = true)]
async fn challenge_without_infrastructure_is_not_supported() {
    let cluster = FakeCluster::new();
    let metadata = ChallengeMetadata {
        id: "quiz-1".to_string(),
        category: Some("web".to_string()),
        ..Default::default()
    };

    let result = router(&cluster).dispatch(request(Action::Start, metadata)).await;
    assert_eq!(result.status, Status::NotSupported);
    assert!(result.error.is_none());
    assert_eq!(cluster.namespace_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn kubernetes_lifecycle_through_dispatch() {
    let cluster = FakeCluster::new();
    let router = router(&cluster);

    let started = router.dispatch(request(Action::Start, challenge())).await;
    assert_eq!(started.status, Status::Running);
    assert_eq!(started.instance_id.as_deref(), Some(NAMESPACE));
    assert_eq!(started.ip.as_deref(), Some("10.0.0.10"));
    assert!(started.expiry.is_some());

    let stopped = router.dispatch(request(Action::Stop, challenge())).await;
    assert_eq!(stopped.status, Status::Stopping);

    let status = router.dispatch(request(Action::GetStatus, challenge())).await;
    assert_eq!(status.status, Status::Stopped);

    let restarted = router.dispatch(request(Action::Restart, challenge())).await;
    assert_eq!(restarted.status, Status::Running);

    let deleted = router.dispatch(request(Action::Delete, challenge())).await;
    assert_eq!(deleted.status, Status::NotFound);
    assert_eq!(deleted.message.as_deref(), Some("instance deleted"));

    let status = router.dispatch(request(Action::GetStatus, challenge())).await;
    assert_eq!(status.status, Status::NotFound);
    assert!(status.instance_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn failures_are_normalized_to_error_results() {
    let cluster = FakeCluster::new();
    let router = router(&cluster);

    let stop = router.dispatch(request(Action::Stop, challenge())).await;
    assert_eq!(stop.status, Status::Error);
    assert!(stop.error.unwrap().contains(NAMESPACE));

    let mut metadata = challenge();
    metadata.docker_image = Some("bad image".to_string());
    let start = router.dispatch(request(Action::Start, metadata)).await;
    assert_eq!(start.status, Status::Error);
    assert!(start.error.unwrap().contains("whitespace"));
}

#[tokio::test(start_paused = true)]
async fn legacy_challenges_go_to_the_vm_backend() {
    let cluster = FakeCluster::new();
    let router = BackendRouter::new(Arc::new(orchestrator(cluster.clone())), Arc::new(StubVm));
    let metadata = ChallengeMetadata {
        id: "legacy-1".to_string(),
        legacy_vm: true,
        ..Default::default()
    };

    let result = router.dispatch(request(Action::Start, metadata.clone())).await;
    assert_eq!(result.status, Status::Running);
    assert_eq!(result.ip.as_deref(), Some("198.51.100.20"));
    assert_eq!(result.instance_id.as_deref(), Some("vm-candidate-7"));
    assert_eq!(cluster.namespace_count(), 0);

    let disabled = BackendRouter::new(
        Arc::new(orchestrator(cluster.clone())),
        Arc::new(DisabledVmBackend),
    );
    let result = disabled.dispatch(request(Action::Start, metadata)).await;
    assert_eq!(result.status, Status::Error);
    assert!(result.error.unwrap().contains("not configured"));
}
