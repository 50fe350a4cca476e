use super::{expiry::parse_lifetime, InstanceOrchestrator};
use crate::{
    date_time::DateTime,
    error::{Error, Result},
    resources::{
        deployment::{build_deployment, desired_replicas},
        namespace::{build_namespace, expires_at, is_terminating},
        service::build_service,
        InstanceSpec, WORKLOAD_NAME,
    },
    status::{self, Projection},
    types::{InstanceRequest, InstanceState, StartOutcome, Status, PENDING_IP},
};
use k8s_openapi::api::apps::v1::Deployment;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

impl InstanceOrchestrator {
    /// Create or update the namespace, workload and service of an instance.
    ///
    /// Returns as soon as everything is submitted, the instance is `pending` then.
    #[instrument(
        skip(self, request),
        fields(challenge = %request.challenge_id, candidate = %request.candidate_id)
    )]
    pub async fn submit(&self, request: &InstanceRequest) -> Result<StartOutcome> {
        let namespace = self.namespace_for(&request.username, &request.challenge_id);
        let config = self.challenge_config(&request.challenge_id, &request.challenge)?;
        let expiry = self.expiry_for(&namespace).await?;

        let spec = InstanceSpec {
            namespace: namespace.clone(),
            challenge_id: request.challenge_id.clone(),
            candidate_id: request.candidate_id.clone(),
            username: request.username.clone(),
            expires_at: expiry,
            config,
            service_type: self.config.service_type.clone(),
        };

        self.record(request, &namespace, Status::Creating).await;

        let applied = self.cluster.apply_namespace(&build_namespace(&spec)).await?;
        debug!(%namespace, ?applied, "Namespace applied");

        let deployment = build_deployment(&spec);
        let service = build_service(&spec);
        tokio::try_join!(
            self.cluster.apply_deployment(&namespace, &deployment),
            self.cluster.apply_service(&namespace, &service),
        )?;

        self.metrics.record_start();
        info!(%namespace, image = %spec.config.image(), %expiry, "Instance submitted");
        self.record(request, &namespace, Status::Pending).await;

        Ok(StartOutcome {
            status: Status::Pending,
            ip: PENDING_IP.to_string(),
            namespace,
            expiry: Some(expiry),
            message: None,
        })
    }

    /// Submit the instance and wait for it to become ready
    pub async fn start(&self, request: &InstanceRequest) -> Result<StartOutcome> {
        let submitted = match self.submit(request).await {
            Ok(submitted) => submitted,
            Err(e) => {
                self.metrics.record_failure();
                let namespace = self.namespace_for(&request.username, &request.challenge_id);
                self.record(request, &namespace, Status::Error).await;
                return Err(e);
            }
        };

        let mut outcome = self.await_ready(&submitted.namespace).await?;
        if outcome.expiry.is_none() {
            outcome.expiry = submitted.expiry;
        }
        self.record(request, &outcome.namespace, outcome.status).await;
        Ok(outcome)
    }

    /// Poll the instance until a pod is ready, a pod failed, or the readiness timeout
    /// runs out.
    ///
    /// Two bounds apply: at most `ready_timeout / poll_interval` polls, and a
    /// `ready_timeout` deadline that also cuts short a poll stuck in a slow cluster call.
    /// Transient cluster errors only cost an attempt. A slow pod yields a `timeout`
    /// outcome, not an error.
    #[instrument(skip(self))]
    pub async fn await_ready(&self, namespace: &str) -> Result<StartOutcome> {
        let attempts = self.config.ready_attempts();
        let interval = self.config.poll_interval();
        let started = Instant::now();
        let deadline = started + self.config.ready_timeout();
        let mut expiry = None;
        let mut last: Option<Projection> = None;

        for attempt in 1..=attempts {
            let Ok(polled) = tokio::time::timeout_at(deadline, self.snapshot(namespace)).await
            else {
                debug!(%namespace, attempt, "Readiness deadline hit during a poll");
                break;
            };
            match polled {
                Ok(snapshot) => {
                    expiry = snapshot.namespace.as_ref().and_then(expires_at).or(expiry);
                    let projection = status::project(&snapshot);
                    match projection.state {
                        InstanceState::Running => {
                            self.metrics.record_ready();
                            info!(%namespace, attempt, ip = ?projection.ip, "Instance is ready");
                            return Ok(StartOutcome {
                                status: Status::Running,
                                ip: projection.ip.unwrap_or_else(|| PENDING_IP.to_string()),
                                namespace: namespace.to_string(),
                                expiry,
                                message: None,
                            });
                        }
                        InstanceState::Error => {
                            self.metrics.record_failure();
                            warn!(
                                %namespace,
                                reason = ?projection.message,
                                "Instance failed to start"
                            );
                            return Ok(StartOutcome {
                                status: Status::Error,
                                ip: PENDING_IP.to_string(),
                                namespace: namespace.to_string(),
                                expiry,
                                message: projection.message,
                            });
                        }
                        InstanceState::NotFound => {
                            warn!(%namespace, "Instance disappeared while waiting for readiness");
                            return Ok(StartOutcome {
                                status: Status::NotFound,
                                ip: PENDING_IP.to_string(),
                                namespace: namespace.to_string(),
                                expiry: None,
                                message: Some("namespace was deleted".to_string()),
                            });
                        }
                        state => {
                            debug!(%namespace, attempt, %state, "Waiting for instance");
                            last = Some(projection);
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        %namespace,
                        attempt,
                        error = %e,
                        "Transient error while waiting for readiness"
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt == attempts || Instant::now() + interval >= deadline {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        self.metrics.record_timeout();
        let waited = started.elapsed().as_secs();
        warn!(%namespace, attempts, waited, "Instance not ready before the readiness timeout");
        let detail = last
            .and_then(|p| p.message)
            .unwrap_or_else(|| "no status observed".to_string());
        Ok(StartOutcome {
            status: Status::Timeout,
            ip: PENDING_IP.to_string(),
            namespace: namespace.to_string(),
            expiry,
            message: Some(format!(
                "not ready after {waited}s ({detail}), poll the status later"
            )),
        })
    }

    /// Scale the workload to zero, keeping namespace and service for a fast restart
    #[instrument(skip(self))]
    pub async fn stop(&self, namespace: &str) -> Result<()> {
        self.scale(namespace, 0).await
    }

    /// Scale to zero, pause, then scale back to the desired replica count
    #[instrument(skip(self))]
    pub async fn restart(&self, namespace: &str) -> Result<()> {
        let deployment = self.workload(namespace).await?;
        let replicas = desired_replicas(&deployment);

        self.cluster
            .scale_deployment(namespace, WORKLOAD_NAME, 0)
            .await?;
        tokio::time::sleep(self.config.restart_pause()).await;
        self.cluster
            .scale_deployment(namespace, WORKLOAD_NAME, replicas)
            .await?;

        info!(%namespace, replicas, "Instance restarted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn scale(&self, namespace: &str, replicas: i32) -> Result<()> {
        if replicas < 0 {
            return Err(Error::InvalidReplicas(replicas));
        }
        self.workload(namespace).await?;
        self.cluster
            .scale_deployment(namespace, WORKLOAD_NAME, replicas)
            .await
    }

    /// Delete the instance namespace and everything in it.
    ///
    /// Returns false when there was nothing to delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str) -> Result<bool> {
        let deleted = self.cluster.delete_namespace(namespace).await?;
        if deleted {
            self.metrics.record_delete();
            info!(%namespace, "Instance deleted");
        } else {
            debug!(%namespace, "Nothing to delete");
        }
        Ok(deleted)
    }

    async fn workload(&self, namespace: &str) -> Result<Deployment> {
        self.cluster
            .get_deployment(namespace, WORKLOAD_NAME)
            .await?
            .ok_or_else(|| Error::InstanceNotFound {
                namespace: namespace.to_string(),
            })
    }

    /// Keep an unexpired expiry of an existing instance, else start a new lifetime
    async fn expiry_for(&self, namespace: &str) -> Result<DateTime> {
        if let Some(existing) = self.cluster.get_namespace(namespace).await? {
            if is_terminating(&existing) {
                return Err(Error::ResourceCreationError {
                    resource_type: "Namespace".to_string(),
                    reason: format!("{namespace} is still terminating, retry shortly"),
                });
            }
            if let Some(expiry) = expires_at(&existing).filter(|e| !e.is_past()) {
                return Ok(expiry);
            }
        }
        let lifetime = parse_lifetime(&self.config.instance_lifetime)?;
        Ok(DateTime::now().plus(lifetime))
    }
}
