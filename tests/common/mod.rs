//! In-memory cluster for integration tests.
//!
//! Deployments schedule synthetic pods named `challenge-<n>`, one per replica. Pods
//! turn ready once `list_pods` has been called `ready_after` times, which lets tests
//! step an instance from pending to running by polling it.

#![allow(dead_code)]

use async_trait::async_trait;
use challenge_orchestrator::{
    cluster::{Applied, ClusterApi, ClusterEvent, ContainerUsage},
    config::OrchestratorConfig,
    error::{Error, Result},
    record::{InstanceRecord, InstanceRecordSink, MemoryRecordSink},
    resources::WORKLOAD_NAME,
    telemetry::Metrics,
    types::{Action, ChallengeMetadata, InstanceRequest},
    InstanceOrchestrator,
};
use futures::{channel::mpsc, stream::BoxStream, StreamExt};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, LoadBalancerIngress,
        LoadBalancerStatus, Namespace, Pod, PodCondition, PodStatus, Service, ServiceStatus,
    },
};
use kube::api::ObjectMeta;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    deployments: BTreeMap<String, Deployment>,
    services: BTreeMap<String, Service>,
    applied: Vec<(&'static str, Applied)>,
    scale_calls: Vec<i32>,
    pod_lists: usize,
    ready_after: usize,
    wait_reason: Option<String>,
    load_balancer: Option<String>,
    usage: BTreeMap<String, Vec<ContainerUsage>>,
    failing_metrics: BTreeSet<String>,
    failing_logs: BTreeSet<String>,
    failing_namespace_gets: usize,
    pod_list_delay: Option<Duration>,
    watchers: Vec<mpsc::UnboundedSender<Result<ClusterEvent>>>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Pods become ready after this many pod listings
    pub fn set_ready_after(&self, lists: usize) {
        self.state().ready_after = lists;
    }

    /// Keep every container waiting with this reason
    pub fn set_wait_reason(&self, reason: &str) {
        self.state().wait_reason = Some(reason.to_string());
    }

    pub fn set_load_balancer(&self, address: &str) {
        self.state().load_balancer = Some(address.to_string());
    }

    pub fn set_usage(&self, pod: &str, cpu: &str, memory: &str) {
        self.state().usage.insert(
            pod.to_string(),
            vec![ContainerUsage {
                name: WORKLOAD_NAME.to_string(),
                usage: BTreeMap::from([
                    ("cpu".to_string(), cpu.to_string()),
                    ("memory".to_string(), memory.to_string()),
                ]),
            }],
        );
    }

    pub fn fail_metrics_for(&self, pod: &str) {
        self.state().failing_metrics.insert(pod.to_string());
    }

    pub fn fail_logs_for(&self, pod: &str) {
        self.state().failing_logs.insert(pod.to_string());
    }

    /// The next `count` namespace reads time out
    pub fn fail_namespace_gets(&self, count: usize) {
        self.state().failing_namespace_gets = count;
    }

    /// Every pod listing takes this long
    pub fn set_pod_list_delay(&self, delay: Duration) {
        self.state().pod_list_delay = Some(delay);
    }

    pub fn insert_namespace(&self, namespace: Namespace) {
        let name = namespace.metadata.name.clone().unwrap();
        self.state().namespaces.insert(name, namespace);
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.state().namespaces.get(name).cloned()
    }

    pub fn namespace_count(&self) -> usize {
        self.state().namespaces.len()
    }

    pub fn deployment_count(&self) -> usize {
        self.state().deployments.len()
    }

    pub fn service_count(&self) -> usize {
        self.state().services.len()
    }

    /// Every apply of a kind ("Namespace", "Deployment", "Service") in order
    pub fn applied(&self, kind: &str) -> Vec<Applied> {
        self.state()
            .applied
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, applied)| *applied)
            .collect()
    }

    pub fn replicas(&self, namespace: &str) -> Option<i32> {
        self.state()
            .deployments
            .get(namespace)
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.replicas)
    }

    pub fn scale_calls(&self) -> Vec<i32> {
        self.state().scale_calls.clone()
    }

    pub fn emit(&self, event: ClusterEvent) {
        for watcher in &self.state().watchers {
            let _ = watcher.unbounded_send(Ok(event.clone()));
        }
    }

    /// Watch streams whose receiving side is still alive
    pub fn open_watchers(&self) -> usize {
        self.state()
            .watchers
            .iter()
            .filter(|w| !w.is_closed())
            .count()
    }

    fn pods(state: &State, namespace: &str) -> Vec<Pod> {
        let replicas = state
            .deployments
            .get(namespace)
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.replicas)
            .unwrap_or(0);
        let ready = state.wait_reason.is_none() && state.pod_lists >= state.ready_after;

        (0..replicas)
            .map(|i| {
                let container_statuses = state.wait_reason.as_ref().map(|reason| {
                    vec![ContainerStatus {
                        name: WORKLOAD_NAME.to_string(),
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.clone()),
                                message: Some("simulated".to_string()),
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]
                });
                Pod {
                    metadata: ObjectMeta {
                        name: Some(format!("challenge-{i}")),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    spec: None,
                    status: Some(PodStatus {
                        phase: Some(
                            if state.wait_reason.is_some() { "Pending" } else { "Running" }
                                .to_string(),
                        ),
                        pod_ip: Some(format!("10.0.0.{}", 10 + i)),
                        conditions: Some(vec![PodCondition {
                            type_: "Ready".to_string(),
                            status: if ready { "True" } else { "False" }.to_string(),
                            ..Default::default()
                        }]),
                        container_statuses,
                        ..Default::default()
                    }),
                }
            })
            .collect()
    }
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value)
            }
            None => false,
        })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let mut state = self.state();
        if state.failing_namespace_gets > 0 {
            state.failing_namespace_gets -= 1;
            return Err(Error::Timeout {
                operation: format!("get namespace {name}"),
            });
        }
        Ok(state.namespaces.get(name).cloned())
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>> {
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| matches_selector(ns.metadata.labels.as_ref(), label_selector))
            .cloned()
            .collect())
    }

    async fn apply_namespace(&self, namespace: &Namespace) -> Result<Applied> {
        let name = namespace.metadata.name.clone().unwrap();
        let mut state = self.state();
        let applied = match state.namespaces.insert(name, namespace.clone()) {
            Some(_) => Applied::Patched,
            None => Applied::Created,
        };
        state.applied.push(("Namespace", applied));
        Ok(applied)
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let mut state = self.state();
        let existed = state.namespaces.remove(name).is_some();
        state.deployments.remove(name);
        state.services.remove(name);
        Ok(existed)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        assert_eq!(name, WORKLOAD_NAME);
        Ok(self.state().deployments.get(namespace).cloned())
    }

    async fn apply_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Applied> {
        let mut state = self.state();
        if !state.namespaces.contains_key(namespace) {
            return Err(Error::ResourceCreationError {
                resource_type: "Deployment".to_string(),
                reason: format!("namespace {namespace} not found"),
            });
        }
        let applied = match state
            .deployments
            .insert(namespace.to_string(), deployment.clone())
        {
            Some(_) => Applied::Patched,
            None => Applied::Created,
        };
        state.applied.push(("Deployment", applied));
        Ok(applied)
    }

    async fn scale_deployment(&self, namespace: &str, _name: &str, replicas: i32) -> Result<()> {
        let mut state = self.state();
        state.scale_calls.push(replicas);
        let deployment =
            state
                .deployments
                .get_mut(namespace)
                .ok_or_else(|| Error::InstanceNotFound {
                    namespace: namespace.to_string(),
                })?;
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
        Ok(())
    }

    async fn get_service(&self, namespace: &str, _name: &str) -> Result<Option<Service>> {
        let state = self.state();
        Ok(state.services.get(namespace).cloned().map(|mut service| {
            if let Some(address) = &state.load_balancer {
                service.status = Some(ServiceStatus {
                    load_balancer: Some(LoadBalancerStatus {
                        ingress: Some(vec![LoadBalancerIngress {
                            ip: Some(address.clone()),
                            ..Default::default()
                        }]),
                    }),
                    ..Default::default()
                });
            }
            service
        }))
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<Applied> {
        let mut state = self.state();
        if !state.namespaces.contains_key(namespace) {
            return Err(Error::ResourceCreationError {
                resource_type: "Service".to_string(),
                reason: format!("namespace {namespace} not found"),
            });
        }
        let applied = match state.services.insert(namespace.to_string(), service.clone()) {
            Some(_) => Applied::Patched,
            None => Applied::Created,
        };
        state.applied.push(("Service", applied));
        Ok(applied)
    }

    async fn list_pods(&self, namespace: &str, _label_selector: &str) -> Result<Vec<Pod>> {
        let delay = self.state().pod_list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.pod_lists += 1;
        Ok(Self::pods(&state, namespace))
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String> {
        if self.state().failing_logs.contains(pod) {
            return Err(Error::Timeout {
                operation: format!("logs of {namespace}/{pod}"),
            });
        }
        Ok(format!("last {tail_lines} lines of {pod}"))
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<Vec<ContainerUsage>> {
        let state = self.state();
        if state.failing_metrics.contains(pod) {
            return Err(Error::Timeout {
                operation: format!("metrics of {namespace}/{pod}"),
            });
        }
        Ok(state.usage.get(pod).cloned().unwrap_or_default())
    }

    fn watch_events(&self, _namespace: &str) -> BoxStream<'static, Result<ClusterEvent>> {
        let (tx, rx) = mpsc::unbounded();
        self.state().watchers.push(tx);
        rx.boxed()
    }
}

/// Sink whose every write fails
pub struct FailingSink;

#[async_trait]
impl InstanceRecordSink for FailingSink {
    async fn upsert(&self, _record: InstanceRecord) -> anyhow::Result<()> {
        anyhow::bail!("instance table is gone")
    }
}

pub fn orchestrator(cluster: Arc<FakeCluster>) -> InstanceOrchestrator {
    orchestrator_with_sink(cluster, Arc::new(MemoryRecordSink::default()))
}

pub fn orchestrator_with_sink(
    cluster: Arc<FakeCluster>,
    sink: Arc<dyn InstanceRecordSink>,
) -> InstanceOrchestrator {
    InstanceOrchestrator::new(
        cluster,
        sink,
        Arc::new(OrchestratorConfig::default()),
        Arc::new(Metrics::default()),
    )
}

pub fn challenge() -> ChallengeMetadata {
    ChallengeMetadata {
        id: "a1b2c3d4-e5f6-7890-abcd-ef1234567890".to_string(),
        name: Some("Juice Shop".to_string()),
        category: Some("web".to_string()),
        docker_image: Some("bkimminich/juice-shop:latest".to_string()),
        ..Default::default()
    }
}

pub fn request(action: Action, challenge: ChallengeMetadata) -> InstanceRequest {
    InstanceRequest {
        action,
        challenge_id: challenge.id.clone(),
        candidate_id: "candidate-7".to_string(),
        username: "Alice".to_string(),
        challenge,
    }
}

/// Namespace of `request(..)` with the default prefix
pub const NAMESPACE: &str = "ctf-alice-a447ee15";
