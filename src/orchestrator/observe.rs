use super::InstanceOrchestrator;
use crate::{
    error::Result,
    resources::{labels, namespace::expires_at},
    status,
    types::{InstanceState, InstanceStatus, PodLog, ResourceUsage, StatusOptions},
};
use futures::future::join_all;
use tracing::{debug, instrument, warn};

impl InstanceOrchestrator {
    /// Current state of an instance, projected from the live resources.
    ///
    /// A missing namespace is `not_found`, not an error. Unreachable metrics are
    /// reported as zero.
    #[instrument(skip(self))]
    pub async fn get_status(
        &self,
        namespace: &str,
        options: StatusOptions,
    ) -> Result<InstanceStatus> {
        let snapshot = self.snapshot(namespace).await?;
        let projection = status::project(&snapshot);
        if projection.state == InstanceState::NotFound {
            return Ok(InstanceStatus::not_found(namespace));
        }

        let metrics = if options.include_metrics {
            Some(self.metrics(namespace).await.unwrap_or_else(|e| {
                warn!(%namespace, error = %e, "Metrics unavailable");
                ResourceUsage::default()
            }))
        } else {
            None
        };

        let logs = if options.include_logs {
            self.logs(namespace, None).await.unwrap_or_else(|e| {
                warn!(%namespace, error = %e, "Logs unavailable");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        debug!(%namespace, state = %projection.state, "Projected instance state");
        Ok(InstanceStatus {
            namespace: namespace.to_string(),
            state: projection.state,
            ip: projection.ip,
            ready: projection.ready,
            message: projection.message,
            expiry: snapshot.namespace.as_ref().and_then(expires_at),
            metrics,
            logs,
        })
    }

    /// Recent log lines of every running or completed pod, or of one pod.
    ///
    /// A pod whose log cannot be fetched is reported with its error, the others are
    /// still returned.
    #[instrument(skip(self))]
    pub async fn logs(&self, namespace: &str, pod: Option<&str>) -> Result<Vec<PodLog>> {
        let pods = self
            .cluster
            .list_pods(namespace, &labels::pod_selector(namespace))
            .await?;

        let names: Vec<String> = pods
            .iter()
            .filter(|p| matches!(status::phase(p), "Running" | "Succeeded"))
            .filter_map(|p| p.metadata.name.clone())
            .filter(|name| pod.map_or(true, |wanted| wanted == name.as_str()))
            .collect();

        let tail = self.config.log_tail_lines;
        let fetched = join_all(
            names
                .iter()
                .map(|name| self.cluster.pod_logs(namespace, name, tail)),
        )
        .await;

        Ok(names
            .into_iter()
            .zip(fetched)
            .map(|(name, result)| match result {
                Ok(lines) => PodLog {
                    pod: name,
                    lines: Some(lines),
                    error: None,
                },
                Err(e) => {
                    warn!(%namespace, pod = %name, error = %e, "Failed to fetch pod logs");
                    PodLog {
                        pod: name,
                        lines: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect())
    }
}
