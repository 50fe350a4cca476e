//! Cluster access used by the orchestrator.
//!
//! [`ClusterApi`] is the seam between orchestration logic and the Kubernetes API:
//! [`KubeCluster`] talks to a real cluster through `kube`, tests plug in a simulated
//! cluster.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Pod, Service},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod kube_cluster;

pub use kube_cluster::KubeCluster;

/// How an idempotent apply was carried out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Patched,
}

/// Kind of object a watch event refers to
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Pod,
    Service,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Applied,
    Deleted,
}

/// Change to a pod or service inside an instance namespace
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEvent {
    pub kind: ObjectKind,
    pub event_type: EventType,
    pub name: String,
    /// Pod phase, or the service load balancer address
    pub detail: Option<String>,
    pub ready: bool,
}

impl ClusterEvent {
    pub fn from_pod(pod: &Pod, event_type: EventType) -> Self {
        Self {
            kind: ObjectKind::Pod,
            event_type,
            name: pod.metadata.name.clone().unwrap_or_default(),
            detail: pod.status.as_ref().and_then(|s| s.phase.clone()),
            ready: crate::status::is_ready(pod),
        }
    }

    pub fn from_service(service: &Service, event_type: EventType) -> Self {
        let address = crate::resources::service::load_balancer_address(service);
        Self {
            kind: ObjectKind::Service,
            event_type,
            name: service.metadata.name.clone().unwrap_or_default(),
            ready: address.is_some(),
            detail: address,
        }
    }
}

/// Per-container usage as reported by the `metrics.k8s.io` API
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ContainerUsage {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, String>,
}

/// Body of a `metrics.k8s.io/v1beta1` PodMetrics object, metadata aside
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PodMetricsData {
    #[serde(default)]
    pub containers: Vec<ContainerUsage>,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// List namespaces matching a label selector
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>>;

    /// Create the namespace, or apply it over the existing one
    async fn apply_namespace(&self, namespace: &Namespace) -> Result<Applied>;

    /// Delete a namespace and everything in it. Returns false if it did not exist.
    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn apply_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Applied>;

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<Applied>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// Last `tail_lines` lines of a pod's log
    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String>;

    /// Current usage of every container of a pod
    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<Vec<ContainerUsage>>;

    /// Pod and service events in one namespace. Dropping the stream closes the watch.
    fn watch_events(&self, namespace: &str) -> BoxStream<'static, Result<ClusterEvent>>;
}
