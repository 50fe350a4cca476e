use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Longest namespace prefix we accept, leaves room for the user and challenge parts
const MAX_PREFIX_LEN: usize = 20;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Prefix for every challenge instance namespace
    pub namespace_prefix: String,

    /// Lifetime of an instance before the reaper deletes it (e.g. "2h", "1h30m")
    pub instance_lifetime: String,

    /// Upper bound for the readiness wait of `start`
    pub ready_timeout_secs: u64,

    /// Interval between readiness polls
    pub poll_interval_secs: u64,

    /// Timeout applied to every single cluster request
    pub call_timeout_secs: u64,

    /// Pause between scale-down and scale-up on restart
    pub restart_pause_secs: u64,

    /// Number of log lines fetched per pod
    pub log_tail_lines: i64,

    /// Default duration of a watch subscription
    pub watch_timeout_secs: u64,

    /// Interval of the expiry reaper loop
    pub reap_interval_secs: u64,

    /// Service type of the network entry point (LoadBalancer, NodePort, ClusterIP)
    pub service_type: String,

    pub default_resources: ResourceDefaults,

    pub cluster: ConnectorConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ResourceDefaults {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Managed cluster name, enables the exec token strategy together with `endpoint`
    pub cluster_name: Option<String>,

    /// API server URL of the managed cluster
    pub endpoint: Option<String>,

    pub region: String,

    /// Credential helper invoked to fetch a short-lived bearer token
    pub token_command: String,

    /// Arguments for the credential helper, `{cluster}` and `{region}` are substituted
    pub token_args: Vec<String>,

    /// Requires certificate authority data and disables lenient TLS
    pub production: bool,

    /// Base64 encoded PEM bundle of the cluster certificate authority
    pub ca_data: Option<String>,

    pub connect_timeout_secs: u64,

    pub read_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "ctf".to_string(),
            instance_lifetime: "2h".to_string(),
            ready_timeout_secs: 120,
            poll_interval_secs: 3,
            call_timeout_secs: 30,
            restart_pause_secs: 2,
            log_tail_lines: 100,
            watch_timeout_secs: 600,
            reap_interval_secs: 300,
            service_type: "LoadBalancer".to_string(),
            default_resources: ResourceDefaults::default(),
            cluster: ConnectorConfig::default(),
        }
    }
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            memory_request: "128Mi".to_string(),
            memory_limit: "512Mi".to_string(),
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            cluster_name: None,
            endpoint: None,
            region: "us-east-1".to_string(),
            token_command: "aws".to_string(),
            token_args: vec![
                "eks".to_string(),
                "get-token".to_string(),
                "--cluster-name".to_string(),
                "{cluster}".to_string(),
                "--region".to_string(),
                "{region}".to_string(),
            ],
            production: false,
            ca_data: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    /// Load from an optional `orchestrator.{toml,yaml,json}` file, then `ORCHESTRATOR__*`
    /// environment variables. Nested keys use `__`, e.g. `ORCHESTRATOR__CLUSTER__REGION`.
    pub fn load() -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::with_name("orchestrator").required(false))
            .add_source(
                ::config::Environment::with_prefix("ORCHESTRATOR")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("cluster.token_args")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let prefix = &self.namespace_prefix;
        let legal = prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if prefix.is_empty()
            || prefix.len() > MAX_PREFIX_LEN
            || !legal
            || !prefix.starts_with(|c: char| c.is_ascii_lowercase())
        {
            return Err(Error::ConfigError(format!(
                "namespace_prefix {prefix:?} must be 1-{MAX_PREFIX_LEN} chars of [a-z0-9-] starting with a letter"
            )));
        }
        if self.poll_interval_secs == 0 || self.call_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "poll_interval_secs and call_timeout_secs must be positive".to_string(),
            ));
        }
        if self.ready_timeout_secs < self.call_timeout_secs {
            return Err(Error::ConfigError(
                "ready_timeout_secs must not be shorter than call_timeout_secs".to_string(),
            ));
        }
        crate::orchestrator::expiry::parse_lifetime(&self.instance_lifetime)?;
        Ok(())
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_secs(self.restart_pause_secs)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// Number of readiness polls that fit into the readiness timeout
    pub fn ready_attempts(&self) -> u32 {
        let attempts = self.ready_timeout_secs.div_ceil(self.poll_interval_secs.max(1));
        u32::try_from(attempts.max(1)).unwrap_or(u32::MAX)
    }
}
