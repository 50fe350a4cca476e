//! Event subscription on one instance namespace.

use super::InstanceOrchestrator;
use crate::cluster::ClusterEvent;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a watch ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEnd {
    Cancelled,
    /// The watch duration elapsed
    Elapsed,
    /// The cluster closed the event stream
    Closed,
}

/// Running watch. Cancelling or dropping the handle stops the task and closes the
/// underlying watch connection.
pub struct WatchHandle {
    namespace: String,
    token: CancellationToken,
    task: Option<JoinHandle<WatchEnd>>,
}

impl WatchHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the watch to end
    pub async fn join(mut self) -> WatchEnd {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(WatchEnd::Cancelled),
            None => WatchEnd::Cancelled,
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl InstanceOrchestrator {
    /// Subscribe to pod and service events of an instance.
    ///
    /// `on_event` runs on a background task until `duration` (default
    /// `watch_timeout_secs`) elapses, the stream ends, or the handle is cancelled.
    pub fn watch<F>(
        &self,
        namespace: &str,
        mut on_event: F,
        duration: Option<Duration>,
    ) -> WatchHandle
    where
        F: FnMut(ClusterEvent) + Send + 'static,
    {
        let duration = duration.unwrap_or_else(|| self.config.watch_timeout());
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut events = self.cluster.watch_events(namespace);
        let ns = namespace.to_string();

        info!(namespace = %ns, ?duration, "Starting instance watch");
        let task = tokio::spawn(async move {
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            let end = loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break WatchEnd::Cancelled,
                    _ = &mut deadline => break WatchEnd::Elapsed,
                    event = events.next() => match event {
                        Some(Ok(event)) => on_event(event),
                        Some(Err(e)) => warn!(namespace = %ns, error = %e, "Watch error"),
                        None => break WatchEnd::Closed,
                    },
                }
            };
            // release the watch connection before reporting
            drop(events);
            debug!(namespace = %ns, ?end, "Instance watch ended");
            end
        });

        WatchHandle {
            namespace: namespace.to_string(),
            token,
            task: Some(task),
        }
    }
}
