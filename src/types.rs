//! Request, configuration and result types shared by the orchestrator and the router.

use crate::config::ResourceDefaults;
use crate::date_time::DateTime;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Challenge metadata as stored by the platform. Every field besides `id` is optional,
/// the router and the image resolver decide what to make of it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeMetadata {
    pub id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "docker_image")]
    pub docker_image: Option<String>,
    pub ports: Vec<u16>,
    #[serde(alias = "template_id")]
    pub template_id: Option<String>,
    #[serde(alias = "instance_id")]
    pub legacy_instance_id: Option<String>,
    #[serde(alias = "deployment_type")]
    pub deployment_type: Option<String>,
    #[serde(alias = "legacy_vm")]
    pub legacy_vm: bool,
    pub environment: BTreeMap<String, String>,
    pub resources: Option<ResourceSpec>,
    pub replicas: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ResourceSpec {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ResourceQuantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Fully resolved resource requirements of the workload container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceConfig {
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl ResourceConfig {
    pub fn resolve(spec: Option<&ResourceSpec>, defaults: &ResourceDefaults) -> Self {
        let pick = |value: Option<&String>, default: &String| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
                .clone()
        };
        Self {
            cpu_request: pick(spec.and_then(|s| s.requests.cpu.as_ref()), &defaults.cpu_request),
            memory_request: pick(
                spec.and_then(|s| s.requests.memory.as_ref()),
                &defaults.memory_request,
            ),
            cpu_limit: pick(spec.and_then(|s| s.limits.cpu.as_ref()), &defaults.cpu_limit),
            memory_limit: pick(
                spec.and_then(|s| s.limits.memory.as_ref()),
                &defaults.memory_limit,
            ),
        }
    }
}

/// Validated workload configuration of one challenge instance
#[derive(Clone, Debug, PartialEq)]
pub struct ChallengeConfig {
    image: String,
    ports: Vec<u16>,
    environment: BTreeMap<String, String>,
    resources: ResourceConfig,
    replicas: i32,
}

impl ChallengeConfig {
    pub fn builder(resources: ResourceConfig) -> ChallengeConfigBuilder {
        ChallengeConfigBuilder {
            image: None,
            ports: Vec::new(),
            environment: BTreeMap::new(),
            resources,
            replicas: 1,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn resources(&self) -> &ResourceConfig {
        &self.resources
    }

    pub fn replicas(&self) -> i32 {
        self.replicas
    }
}

#[derive(Clone, Debug)]
pub struct ChallengeConfigBuilder {
    image: Option<String>,
    ports: Vec<u16>,
    environment: BTreeMap<String, String>,
    resources: ResourceConfig,
    replicas: i32,
}

impl ChallengeConfigBuilder {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment.extend(environment);
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn build(self) -> Result<ChallengeConfig> {
        let image = self
            .image
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .ok_or_else(|| Error::InvalidChallenge("container image is required".to_string()))?;
        if image.chars().any(char::is_whitespace) {
            return Err(Error::InvalidChallenge(format!(
                "container image {image:?} contains whitespace"
            )));
        }

        let mut ports = Vec::with_capacity(self.ports.len());
        for port in self.ports {
            if port == 0 {
                return Err(Error::InvalidChallenge("port 0 is not a valid port".to_string()));
            }
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        if ports.is_empty() {
            return Err(Error::InvalidChallenge(
                "at least one container port is required".to_string(),
            ));
        }

        if self.replicas < 1 {
            return Err(Error::InvalidChallenge(format!(
                "replicas must be at least 1, got {}",
                self.replicas
            )));
        }

        if let Some(key) = self.environment.keys().find(|k| !is_env_name(k)) {
            return Err(Error::InvalidChallenge(format!(
                "invalid environment variable name {key:?}"
            )));
        }

        Ok(ChallengeConfig {
            image,
            ports,
            environment: self.environment,
            resources: self.resources,
            replicas: self.replicas,
        })
    }
}

fn is_env_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    Restart,
    #[serde(alias = "status")]
    GetStatus,
    Delete,
}

/// Invocation coming from the API boundary
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRequest {
    pub action: Action,
    #[serde(alias = "challenge_id")]
    pub challenge_id: String,
    #[serde(alias = "candidate_id")]
    pub candidate_id: String,
    pub username: String,
    #[serde(default, alias = "challenge_config", alias = "challengeConfig")]
    pub challenge: ChallengeMetadata,
}

/// Externally observable lifecycle of an instance, projected from live resources
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    NotFound,
    Creating,
    Pending,
    Running,
    Error,
    Stopping,
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Status::from(*self).as_str())
    }
}

/// Status reported to the caller: an instance state or a dispatch level outcome
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotFound,
    Creating,
    Pending,
    Running,
    Error,
    Stopping,
    Stopped,
    /// Readiness wait ran out, poll `get_status` later
    Timeout,
    /// The challenge needs no instance
    NotSupported,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotFound => "not_found",
            Status::Creating => "creating",
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Error => "error",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Timeout => "timeout",
            Status::NotSupported => "not_supported",
        }
    }

    /// Caller should keep polling
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Status::Creating | Status::Pending | Status::Stopping | Status::Timeout
        )
    }
}

impl From<InstanceState> for Status {
    fn from(state: InstanceState) -> Self {
        match state {
            InstanceState::NotFound => Status::NotFound,
            InstanceState::Creating => Status::Creating,
            InstanceState::Pending => Status::Pending,
            InstanceState::Running => Status::Running,
            InstanceState::Error => Status::Error,
            InstanceState::Stopping => Status::Stopping,
            InstanceState::Stopped => Status::Stopped,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder endpoint while no address is known yet
pub const PENDING_IP: &str = "pending";

/// Normalized result returned for every dispatched request, whatever the backend
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResult {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstanceResult {
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            ip: None,
            instance_id: None,
            expiry: None,
            message: None,
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::with_status(Status::Error)
        }
    }

    pub fn not_supported() -> Self {
        Self {
            message: Some("challenge does not require an instance".to_string()),
            ..Self::with_status(Status::NotSupported)
        }
    }
}

/// Outcome of `start`, `submit` and `await_ready`
#[derive(Clone, Debug, PartialEq)]
pub struct StartOutcome {
    pub status: Status,
    /// Load balancer address, pod address or [`PENDING_IP`]
    pub ip: String,
    pub namespace: String,
    pub expiry: Option<DateTime>,
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StatusOptions {
    pub include_metrics: bool,
    pub include_logs: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub namespace: String,
    pub state: InstanceState,
    pub ip: Option<String>,
    pub ready: bool,
    pub message: Option<String>,
    pub expiry: Option<DateTime>,
    pub metrics: Option<ResourceUsage>,
    pub logs: Vec<PodLog>,
}

impl InstanceStatus {
    pub fn not_found(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: InstanceState::NotFound,
            ip: None,
            ready: false,
            message: None,
            expiry: None,
            metrics: None,
            logs: Vec::new(),
        }
    }
}

/// Recent log output of one pod; `error` is set when the fetch failed
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PodLog {
    pub pod: String,
    pub lines: Option<String>,
    pub error: Option<String>,
}

/// Aggregated resource usage, cpu in milli-cores and memory in bytes
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl ResourceUsage {
    pub fn cpu(&self) -> String {
        crate::orchestrator::metrics::format_cpu(self.cpu_millis)
    }

    pub fn memory(&self) -> String {
        crate::orchestrator::metrics::format_memory(self.memory_bytes)
    }
}

impl std::ops::AddAssign for ResourceUsage {
    fn add_assign(&mut self, other: Self) {
        self.cpu_millis += other.cpu_millis;
        self.memory_bytes += other.memory_bytes;
    }
}
