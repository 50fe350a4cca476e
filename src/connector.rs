//! Establishes the one authenticated cluster connection of the process.
//!
//! Credentials come from, in order: a managed cluster reached through an exec
//! credential helper, the in-cluster service account, or the operator's local
//! kubeconfig (development only).

use crate::{
    config::ConnectorConfig,
    error::{Error, Result},
};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";
const CONTEXT_NAME: &str = "challenge-orchestrator";

/// How the connector obtains cluster credentials
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// Short-lived bearer token fetched by an external helper
    ExecToken {
        cluster_name: String,
        endpoint: String,
    },
    /// Service account mounted into the pod we run in
    InCluster,
    /// Whatever kubeconfig the operator has locally
    LocalKubeconfig,
}

impl CredentialSource {
    /// Pick the credential strategy for a configuration. `in_cluster` tells whether an
    /// in-cluster service account is available.
    pub fn select(config: &ConnectorConfig, in_cluster: bool) -> Result<Self> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        if let (Some(cluster_name), Some(endpoint)) =
            (non_empty(&config.cluster_name), non_empty(&config.endpoint))
        {
            return Ok(CredentialSource::ExecToken {
                cluster_name,
                endpoint,
            });
        }
        if in_cluster {
            return Ok(CredentialSource::InCluster);
        }
        if config.production {
            return Err(Error::ConfigError(
                "no cluster credentials: set cluster_name and endpoint, or run inside the cluster"
                    .to_string(),
            ));
        }
        Ok(CredentialSource::LocalKubeconfig)
    }
}

pub struct ClusterConnector;

impl ClusterConnector {
    /// Build a client from the configured credential strategy.
    ///
    /// Fails when no strategy yields a usable configuration, so nothing downstream is
    /// ever constructed with a dead client.
    pub async fn connect(config: &ConnectorConfig) -> Result<Client> {
        let in_cluster = Config::incluster();
        let source = CredentialSource::select(config, in_cluster.is_ok())?;

        let mut kube_config = match &source {
            CredentialSource::ExecToken {
                cluster_name,
                endpoint,
            } => {
                info!(cluster = %cluster_name, %endpoint, "Using exec token credentials");
                let kubeconfig = exec_kubeconfig(config, cluster_name, endpoint)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::ConfigError(format!("exec kubeconfig rejected: {e}")))?
            }
            CredentialSource::InCluster => {
                info!("Using in-cluster service account");
                in_cluster
                    .map_err(|e| Error::ConfigError(format!("in-cluster config: {e}")))?
            }
            CredentialSource::LocalKubeconfig => {
                warn!("No cluster credentials configured, falling back to local kubeconfig");
                Config::infer()
                    .await
                    .map_err(|e| Error::ConfigError(format!("no usable kubeconfig: {e}")))?
            }
        };

        kube_config.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        kube_config.read_timeout = Some(Duration::from_secs(config.read_timeout_secs));

        let client = Client::try_from(kube_config)?;
        info!("Connected to Kubernetes cluster");
        Ok(client)
    }
}

/// In-memory kubeconfig for a managed cluster whose tokens come from an exec helper.
///
/// Without `production` the transport skips certificate verification unless CA data is
/// supplied anyway. With `production` the CA data is mandatory.
pub fn exec_kubeconfig(
    config: &ConnectorConfig,
    cluster_name: &str,
    endpoint: &str,
) -> Result<Kubeconfig> {
    let ca_data = config
        .ca_data
        .as_deref()
        .map(str::trim)
        .filter(|ca| !ca.is_empty());

    let cluster = match ca_data {
        Some(ca) => json!({
            "server": endpoint,
            "certificate-authority-data": ca,
        }),
        None if config.production => {
            return Err(Error::ConfigError(
                "production clusters require ca_data".to_string(),
            ))
        }
        None => {
            warn!(
                cluster = %cluster_name,
                "TLS verification disabled for this cluster connection, do not use in production"
            );
            json!({
                "server": endpoint,
                "insecure-skip-tls-verify": true,
            })
        }
    };

    let args: Vec<String> = config
        .token_args
        .iter()
        .map(|arg| {
            arg.replace("{cluster}", cluster_name)
                .replace("{region}", &config.region)
        })
        .collect();

    let value = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": cluster_name, "cluster": cluster }],
        "users": [{
            "name": CONTEXT_NAME,
            "user": {
                "exec": {
                    "apiVersion": EXEC_API_VERSION,
                    "command": config.token_command,
                    "args": args,
                    "interactiveMode": "Never",
                }
            }
        }],
        "contexts": [{
            "name": CONTEXT_NAME,
            "context": { "cluster": cluster_name, "user": CONTEXT_NAME }
        }],
        "current-context": CONTEXT_NAME,
    });

    Ok(serde_json::from_value(value)?)
}
