mod common;

use challenge_orchestrator::{record::MemoryRecordSink, resources::labels, types::Status};
use common::{orchestrator, orchestrator_with_sink, FakeCluster};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{atomic::Ordering, Arc};

fn namespace(name: &str, managed: bool, expires_at: &str) -> Namespace {
    let mut ns_labels = BTreeMap::new();
    if managed {
        ns_labels.insert(labels::MANAGED_BY.to_string(), labels::MANAGER.to_string());
    }
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(ns_labels),
            annotations: Some(BTreeMap::from([(
                labels::EXPIRES_AT_ANNOTATION.to_string(),
                expires_at.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn reaps_only_expired_managed_namespaces() {
    let cluster = FakeCluster::new();
    cluster.insert_namespace(namespace("ctf-old-11111111", true, "2020-01-01T00:00:00Z"));
    cluster.insert_namespace(namespace("ctf-new-22222222", true, "2999-01-01T00:00:00Z"));
    cluster.insert_namespace(namespace("ctf-broken-33333333", true, "whenever"));
    cluster.insert_namespace(namespace("kube-system", false, "2020-01-01T00:00:00Z"));
    let orchestrator = orchestrator(cluster.clone());

    assert_eq!(orchestrator.reap_expired().await.unwrap(), 1);
    assert!(cluster.namespace("ctf-old-11111111").is_none());
    assert!(cluster.namespace("ctf-new-22222222").is_some());
    assert!(cluster.namespace("ctf-broken-33333333").is_some());
    assert!(cluster.namespace("kube-system").is_some());
    assert_eq!(
        orchestrator.counters().instances_reaped.load(Ordering::Relaxed),
        1
    );

    assert_eq!(orchestrator.reap_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn reaped_instances_are_recorded_as_gone() {
    let cluster = FakeCluster::new();
    let mut expired = namespace("ctf-carol-75762039", true, "2020-01-01T00:00:00Z");
    if let Some(annotations) = expired.metadata.annotations.as_mut() {
        annotations.insert(
            labels::CANDIDATE_ID_ANNOTATION.to_string(),
            "candidate-9".to_string(),
        );
        annotations.insert(
            labels::CHALLENGE_ID_ANNOTATION.to_string(),
            "11111111-aaaa".to_string(),
        );
    }
    cluster.insert_namespace(expired);
    let sink = Arc::new(MemoryRecordSink::default());
    let orchestrator = orchestrator_with_sink(cluster.clone(), sink.clone());

    assert_eq!(orchestrator.reap_expired().await.unwrap(), 1);
    let record = sink.get("candidate-9", "11111111-aaaa").unwrap();
    assert_eq!(record.status, Status::NotFound);
    assert_eq!(record.instance_id, "ctf-carol-75762039");
}
