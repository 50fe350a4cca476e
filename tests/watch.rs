mod common;

use challenge_orchestrator::{
    cluster::{ClusterEvent, EventType, ObjectKind},
    orchestrator::WatchEnd,
};
use common::{orchestrator, FakeCluster, NAMESPACE};
use std::time::Duration;
use tokio::sync::mpsc;

fn pod_event(name: &str) -> ClusterEvent {
    ClusterEvent {
        kind: ObjectKind::Pod,
        event_type: EventType::Applied,
        name: name.to_string(),
        detail: Some("Running".to_string()),
        ready: true,
    }
}

#[tokio::test]
async fn delivers_events_until_cancelled() {
    let cluster = FakeCluster::new();
    let orchestrator = orchestrator(cluster.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = orchestrator.watch(
        NAMESPACE,
        move |event| {
            let _ = tx.send(event);
        },
        None,
    );
    assert_eq!(handle.namespace(), NAMESPACE);
    assert_eq!(cluster.open_watchers(), 1);

    cluster.emit(pod_event("challenge-0"));
    cluster.emit(pod_event("challenge-1"));
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name, "challenge-0");
    assert_eq!(second.name, "challenge-1");

    handle.cancel();
    assert_eq!(handle.join().await, WatchEnd::Cancelled);
    assert_eq!(cluster.open_watchers(), 0);
}

#[tokio::test]
async fn dropping_the_handle_releases_the_watch() {
    let cluster = FakeCluster::new();
    let orchestrator = orchestrator(cluster.clone());

    let handle = orchestrator.watch(NAMESPACE, |_| {}, None);
    assert_eq!(cluster.open_watchers(), 1);
    drop(handle);

    for _ in 0..100 {
        if cluster.open_watchers() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cluster.open_watchers(), 0);
}

#[tokio::test(start_paused = true)]
async fn watch_ends_after_its_duration() {
    let cluster = FakeCluster::new();
    let orchestrator = orchestrator(cluster.clone());

    let handle = orchestrator.watch(NAMESPACE, |_| {}, Some(Duration::from_secs(30)));
    assert_eq!(handle.join().await, WatchEnd::Elapsed);
    assert_eq!(cluster.open_watchers(), 0);
}
