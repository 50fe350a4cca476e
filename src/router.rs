//! Chooses the backend of a request and normalizes whatever it answers into one
//! [`InstanceResult`].

use crate::{
    backend::LegacyVmBackend,
    error::{Error, Result},
    orchestrator::InstanceOrchestrator,
    types::{
        Action, ChallengeMetadata, InstanceRequest, InstanceResult, InstanceState, StartOutcome,
        Status, StatusOptions,
    },
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Kubernetes,
    LegacyVm,
    /// The challenge needs no infrastructure
    Unsupported,
}

#[derive(Clone)]
pub struct BackendRouter {
    orchestrator: Arc<InstanceOrchestrator>,
    legacy: Arc<dyn LegacyVmBackend>,
}

impl BackendRouter {
    pub fn new(orchestrator: Arc<InstanceOrchestrator>, legacy: Arc<dyn LegacyVmBackend>) -> Self {
        Self {
            orchestrator,
            legacy,
        }
    }

    /// The legacy flag forces the VM backend. Otherwise any declared image, template or
    /// deployment type selects kubernetes.
    pub fn route(challenge: &ChallengeMetadata) -> BackendKind {
        let declared =
            |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        if challenge.legacy_vm {
            BackendKind::LegacyVm
        } else if declared(&challenge.docker_image)
            || declared(&challenge.template_id)
            || declared(&challenge.legacy_instance_id)
            || declared(&challenge.deployment_type)
        {
            BackendKind::Kubernetes
        } else {
            BackendKind::Unsupported
        }
    }

    /// Run a request on its backend. Never fails: errors come back as `status: error`.
    #[instrument(
        skip(self, request),
        fields(action = ?request.action, challenge = %request.challenge_id)
    )]
    pub async fn dispatch(&self, request: InstanceRequest) -> InstanceResult {
        match Self::route(&request.challenge) {
            BackendKind::Unsupported => {
                info!("Challenge declares no infrastructure");
                InstanceResult::not_supported()
            }
            BackendKind::LegacyVm => match self.legacy.handle(&request).await {
                Ok(response) => response.normalize(),
                Err(e) => {
                    warn!(error = %e, "Legacy backend failed");
                    InstanceResult::failed(Error::LegacyBackend(e.to_string()))
                }
            },
            BackendKind::Kubernetes => {
                let namespace = self
                    .orchestrator
                    .namespace_for(&request.username, &request.challenge_id);
                match self.dispatch_kubernetes(&request, &namespace).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(%namespace, error = %e, "Instance request failed");
                        InstanceResult {
                            instance_id: Some(namespace),
                            ..InstanceResult::failed(e)
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_kubernetes(
        &self,
        request: &InstanceRequest,
        namespace: &str,
    ) -> Result<InstanceResult> {
        let orchestrator = &self.orchestrator;
        match request.action {
            Action::Start => Ok(started(orchestrator.start(request).await?)),
            Action::Stop => {
                orchestrator.stop(namespace).await?;
                orchestrator
                    .record(request, namespace, Status::Stopping)
                    .await;
                Ok(InstanceResult {
                    instance_id: Some(namespace.to_string()),
                    message: Some("instance is stopping".to_string()),
                    ..InstanceResult::with_status(Status::Stopping)
                })
            }
            Action::Restart => {
                orchestrator.restart(namespace).await?;
                let result = self.status(namespace).await?;
                orchestrator.record(request, namespace, result.status).await;
                Ok(result)
            }
            Action::GetStatus => self.status(namespace).await,
            Action::Delete => {
                let deleted = orchestrator.delete(namespace).await?;
                orchestrator
                    .record(request, namespace, Status::NotFound)
                    .await;
                let message = if deleted {
                    "instance deleted"
                } else {
                    "instance did not exist"
                };
                Ok(InstanceResult {
                    instance_id: Some(namespace.to_string()),
                    message: Some(message.to_string()),
                    ..InstanceResult::with_status(Status::NotFound)
                })
            }
        }
    }

    async fn status(&self, namespace: &str) -> Result<InstanceResult> {
        let status = self
            .orchestrator
            .get_status(namespace, StatusOptions::default())
            .await?;
        let instance_id = (status.state != InstanceState::NotFound).then(|| namespace.to_string());
        let error = (status.state == InstanceState::Error)
            .then(|| status.message.clone())
            .flatten();
        Ok(InstanceResult {
            status: status.state.into(),
            ip: status.ip,
            instance_id,
            expiry: status.expiry,
            message: status.message,
            error,
        })
    }
}

fn started(outcome: StartOutcome) -> InstanceResult {
    let error = (outcome.status == Status::Error)
        .then(|| outcome.message.clone())
        .flatten();
    InstanceResult {
        status: outcome.status,
        ip: Some(outcome.ip),
        instance_id: Some(outcome.namespace),
        expiry: outcome.expiry,
        message: outcome.message,
        error,
    }
}
