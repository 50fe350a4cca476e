//! Instance lifetimes and removal of expired instances.

use super::InstanceOrchestrator;
use crate::{
    error::{Error, Result},
    resources::{
        labels,
        namespace::{expires_at, instance_pair, is_terminating},
    },
    types::Status,
};
use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Parse a lifetime like "2h", "30m" or "1h30m15s"
pub fn parse_lifetime(lifetime: &str) -> Result<Duration> {
    let mut total_seconds = 0i64;
    let mut current_num = String::new();

    for ch in lifetime.trim().chars() {
        if ch.is_ascii_digit() {
            current_num.push(ch);
            continue;
        }
        if current_num.is_empty() {
            return Err(Error::LifetimeParseError(format!(
                "expected a number before {ch:?} in {lifetime:?}"
            )));
        }

        let num: i64 = current_num
            .parse()
            .map_err(|_| Error::LifetimeParseError(format!("invalid number: {current_num}")))?;
        let unit = match ch {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => {
                return Err(Error::LifetimeParseError(format!(
                    "invalid time unit: {ch}"
                )))
            }
        };
        total_seconds = num
            .checked_mul(unit)
            .and_then(|s| total_seconds.checked_add(s))
            .ok_or_else(|| Error::LifetimeParseError(format!("{lifetime:?} is too long")))?;
        current_num.clear();
    }

    if !current_num.is_empty() {
        return Err(Error::LifetimeParseError(
            "lifetime must end with a unit (h/m/s)".to_string(),
        ));
    }
    if total_seconds <= 0 {
        return Err(Error::LifetimeParseError(format!(
            "lifetime {lifetime:?} must be positive"
        )));
    }

    Duration::try_seconds(total_seconds).ok_or_else(|| {
        Error::LifetimeParseError(format!("invalid duration: {total_seconds} seconds"))
    })
}

impl InstanceOrchestrator {
    /// Delete every managed instance whose expiry has passed.
    ///
    /// Returns how many were deleted. A failed deletion is logged and retried on the
    /// next pass.
    #[instrument(skip(self))]
    pub async fn reap_expired(&self) -> Result<u64> {
        let namespaces = self
            .cluster
            .list_namespaces(&labels::managed_selector())
            .await?;

        let mut reaped = 0;
        for ns in namespaces {
            let Some(name) = ns.metadata.name.as_deref() else {
                continue;
            };
            if is_terminating(&ns) {
                continue;
            }
            let Some(expiry) = expires_at(&ns) else {
                continue;
            };
            if !expiry.is_past() {
                continue;
            }

            match self.cluster.delete_namespace(name).await {
                Ok(true) => {
                    info!(namespace = %name, %expiry, "Instance expired, deleted");
                    reaped += 1;
                    if let Some((candidate_id, challenge_id)) = instance_pair(&ns) {
                        self.record_pair(&candidate_id, &challenge_id, name, Status::NotFound)
                            .await;
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(namespace = %name, error = %e, "Failed to delete expired instance"),
            }
        }

        self.metrics.record_reaped(reaped);
        Ok(reaped)
    }

    /// Run [`reap_expired`](Self::reap_expired) every `reap_interval_secs` until
    /// `shutdown` is cancelled
    pub async fn reap_until_cancelled(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.reap_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reaper stopped");
                    return;
                }
                _ = interval.tick() => {
                    match self.reap_expired().await {
                        Ok(0) => {}
                        Ok(count) => info!(count, "Reaped expired instances"),
                        Err(e) => error!(error = %e, "Reaper pass failed"),
                    }
                }
            }
        }
    }
}
