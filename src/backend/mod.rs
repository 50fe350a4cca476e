//! Legacy virtual-machine provisioning, kept as a fallback behind the common result
//! contract. Only the interface lives here; the platform plugs in its implementation.

use crate::date_time::DateTime;
use crate::types::{InstanceRequest, InstanceResult, Status};
use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait LegacyVmBackend: Send + Sync {
    async fn handle(&self, request: &InstanceRequest) -> anyhow::Result<VmResponse>;
}

/// Backend used when no legacy provider is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledVmBackend;

#[async_trait]
impl LegacyVmBackend for DisabledVmBackend {
    async fn handle(&self, _request: &InstanceRequest) -> anyhow::Result<VmResponse> {
        anyhow::bail!("legacy VM backend is not configured")
    }
}

/// Loosely shaped answer of the legacy provider
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct VmResponse {
    pub success: Option<bool>,
    #[serde(alias = "state")]
    pub status: Option<String>,
    #[serde(alias = "public_ip", alias = "publicIp", alias = "ip_address")]
    pub ip: Option<String>,
    #[serde(alias = "instanceId", alias = "vm_id", alias = "vmId")]
    pub instance_id: Option<String>,
    #[serde(alias = "expiresAt", alias = "expires_at", alias = "expiry")]
    pub expiry: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl VmResponse {
    pub fn normalize(self) -> InstanceResult {
        let mut status = self
            .status
            .as_deref()
            .map(vm_status)
            .unwrap_or(Status::Pending);
        let mut message = self.message;

        if self.error.is_some() || self.success == Some(false) {
            status = Status::Error;
        } else if let Some(raw) = self.status.as_deref() {
            if status == Status::Error && !is_error_status(raw) {
                message = Some(format!("unknown legacy status {raw:?}"));
            }
        }

        let error = match status {
            Status::Error => self
                .error
                .or_else(|| message.clone())
                .or_else(|| Some("legacy backend reported a failure".to_string())),
            _ => None,
        };

        InstanceResult {
            status,
            ip: self.ip.filter(|ip| !ip.is_empty()),
            instance_id: self.instance_id,
            expiry: self.expiry.as_deref().and_then(DateTime::parse),
            message,
            error,
        }
    }
}

fn vm_status(raw: &str) -> Status {
    match raw.trim().to_ascii_lowercase().as_str() {
        "running" | "active" | "ready" => Status::Running,
        "creating" | "queued" => Status::Creating,
        "pending" | "starting" | "provisioning" | "booting" => Status::Pending,
        "stopping" | "shutting_down" | "shutting-down" => Status::Stopping,
        "stopped" | "shutoff" | "halted" => Status::Stopped,
        "terminated" | "deleted" | "not_found" => Status::NotFound,
        _ => Status::Error,
    }
}

fn is_error_status(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "error" | "failed" | "failure"
    )
}
