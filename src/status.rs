//! Reduces the live resources of an instance namespace into one [`InstanceState`].

use crate::resources::{deployment, namespace, service};
use crate::types::InstanceState;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Pod, Service},
};

/// Container wait reasons that will not resolve without intervention
pub const FATAL_WAIT_REASONS: &[&str] = &[
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
];

/// Live resources of one instance namespace
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub namespace: Option<Namespace>,
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    pub pods: Vec<Pod>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    pub state: InstanceState,
    /// Load balancer address, else the address of a ready pod
    pub ip: Option<String>,
    pub ready: bool,
    pub message: Option<String>,
}

impl Projection {
    fn new(state: InstanceState) -> Self {
        Self {
            state,
            ip: None,
            ready: false,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub fn project(snapshot: &Snapshot) -> Projection {
    let ns = match &snapshot.namespace {
        Some(ns) if !namespace::is_terminating(ns) => ns,
        _ => return Projection::new(InstanceState::NotFound),
    };

    let Some(deployment) = &snapshot.deployment else {
        return Projection::new(InstanceState::Creating).with_message(format!(
            "namespace {} exists, workload not yet submitted",
            ns.metadata.name.as_deref().unwrap_or_default()
        ));
    };

    let live_pods: Vec<&Pod> = snapshot
        .pods
        .iter()
        .filter(|p| !is_finished(p))
        .collect();

    if deployment::replicas(deployment) == 0 {
        return if live_pods.is_empty() {
            Projection::new(InstanceState::Stopped)
        } else {
            Projection::new(InstanceState::Stopping)
                .with_message(format!("{} pod(s) still terminating", live_pods.len()))
        };
    }

    let active: Vec<&Pod> = live_pods
        .iter()
        .copied()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .collect();

    if let Some(reason) = snapshot.pods.iter().find_map(failure_reason) {
        return Projection::new(InstanceState::Error).with_message(reason);
    }

    let ready_pod = active.iter().find(|p| is_ready(p));
    match ready_pod {
        Some(pod) => {
            let ip = snapshot
                .service
                .as_ref()
                .and_then(service::load_balancer_address)
                .or_else(|| pod_ip(pod));
            Projection {
                state: InstanceState::Running,
                ip,
                ready: true,
                message: None,
            }
        }
        None if active.is_empty() => Projection::new(InstanceState::Pending)
            .with_message("waiting for pods to be scheduled"),
        None => Projection::new(InstanceState::Pending)
            .with_message("waiting for pods to become ready"),
    }
}

pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

pub fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

pub fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty())
}

/// Pod ran to completion and no longer counts towards the workload
fn is_finished(pod: &Pod) -> bool {
    phase(pod) == "Succeeded"
}

/// Reason a pod is broken, if it is
pub fn failure_reason(pod: &Pod) -> Option<String> {
    let name = pod.metadata.name.as_deref().unwrap_or("pod");
    let status = pod.status.as_ref()?;

    if status.phase.as_deref() == Some("Failed") {
        let detail = status
            .message
            .clone()
            .or_else(|| status.reason.clone())
            .unwrap_or_else(|| "unknown failure".to_string());
        return Some(format!("{name} failed: {detail}"));
    }

    status
        .container_statuses
        .iter()
        .flatten()
        .chain(status.init_container_statuses.iter().flatten())
        .find_map(|cs| {
            let waiting = cs.state.as_ref()?.waiting.as_ref()?;
            let reason = waiting.reason.as_deref()?;
            FATAL_WAIT_REASONS.contains(&reason).then(|| match &waiting.message {
                Some(message) => format!("{name}/{}: {reason}: {message}", cs.name),
                None => format!("{name}/{}: {reason}", cs.name),
            })
        })
}
