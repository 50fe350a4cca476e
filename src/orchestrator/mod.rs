//! Lifecycle of challenge instances on the cluster.
//!
//! An [`InstanceOrchestrator`] holds nothing but shared, read-only handles, so every
//! operation is an independent call and instances of different pairs never wait on
//! each other.

use crate::{
    cluster::{ClusterApi, KubeCluster},
    config::OrchestratorConfig,
    connector::ClusterConnector,
    error::Result,
    image,
    naming::namespace_name,
    record::{InstanceRecord, InstanceRecordSink},
    resources::{labels, namespace, WORKLOAD_NAME},
    status::Snapshot,
    telemetry::Metrics,
    types::{ChallengeConfig, ChallengeMetadata, InstanceRequest, ResourceConfig, Status},
};
use std::sync::Arc;
use tracing::{info, warn};

pub mod expiry;
mod lifecycle;
pub mod metrics;
mod observe;
pub mod watch;

pub use watch::{WatchEnd, WatchHandle};

#[derive(Clone)]
pub struct InstanceOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    sink: Arc<dyn InstanceRecordSink>,
    config: Arc<OrchestratorConfig>,
    metrics: Arc<Metrics>,
}

impl InstanceOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        sink: Arc<dyn InstanceRecordSink>,
        config: Arc<OrchestratorConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            sink,
            config,
            metrics,
        }
    }

    /// Connect to the configured cluster and build an orchestrator on top of it
    pub async fn connect(
        config: OrchestratorConfig,
        sink: Arc<dyn InstanceRecordSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        config.validate()?;
        let client = ClusterConnector::connect(&config.cluster).await?;
        let cluster = KubeCluster::new(client, config.call_timeout());
        Ok(Self::new(
            Arc::new(cluster),
            sink,
            Arc::new(config),
            metrics,
        ))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn counters(&self) -> &Metrics {
        &self.metrics
    }

    /// Namespace of the instance `username` gets for `challenge_id`
    pub fn namespace_for(&self, username: &str, challenge_id: &str) -> String {
        namespace_name(&self.config.namespace_prefix, username, challenge_id)
    }

    /// Resolve and validate the workload of a challenge, before any cluster call
    pub fn challenge_config(
        &self,
        challenge_id: &str,
        challenge: &ChallengeMetadata,
    ) -> Result<ChallengeConfig> {
        let resolved = if challenge.id.is_empty() {
            image::resolve(&ChallengeMetadata {
                id: challenge_id.to_string(),
                ..challenge.clone()
            })
        } else {
            image::resolve(challenge)
        };
        let resources =
            ResourceConfig::resolve(challenge.resources.as_ref(), &self.config.default_resources);
        resolved.into_config(resources, challenge.replicas.unwrap_or(1))
    }

    /// Best-effort write of the instance state to the record sink. Failures are logged
    /// and counted, never returned.
    pub async fn record(&self, request: &InstanceRequest, namespace: &str, status: Status) {
        self.record_pair(
            &request.candidate_id,
            &request.challenge_id,
            namespace,
            status,
        )
        .await;
    }

    async fn record_pair(
        &self,
        candidate_id: &str,
        challenge_id: &str,
        namespace: &str,
        status: Status,
    ) {
        let record = InstanceRecord::new(candidate_id, challenge_id, namespace, status);
        if let Err(e) = self.sink.upsert(record).await {
            self.metrics.record_sink_failure();
            warn!(%namespace, %status, error = %e, "Failed to write instance record");
        }
    }

    /// Read every live resource of an instance namespace
    async fn snapshot(&self, ns: &str) -> Result<Snapshot> {
        let Some(found) = self.cluster.get_namespace(ns).await? else {
            return Ok(Snapshot::default());
        };
        if namespace::is_terminating(&found) {
            info!(namespace = %ns, "Namespace is terminating");
            return Ok(Snapshot {
                namespace: Some(found),
                ..Default::default()
            });
        }

        let selector = labels::pod_selector(ns);
        let (deployment, service, pods) = tokio::try_join!(
            self.cluster.get_deployment(ns, WORKLOAD_NAME),
            self.cluster.get_service(ns, WORKLOAD_NAME),
            self.cluster.list_pods(ns, &selector),
        )?;

        Ok(Snapshot {
            namespace: Some(found),
            deployment,
            service,
            pods,
        })
    }
}
