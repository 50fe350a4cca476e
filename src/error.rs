use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Watch error: {0}")]
    WatchError(#[from] kube::runtime::watcher::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid challenge configuration: {0}")]
    InvalidChallenge(String),

    #[error("Invalid replica count: {0}")]
    InvalidReplicas(i32),

    #[error("Instance not found: {namespace}")]
    InstanceNotFound { namespace: String },

    #[error("Cluster call timed out: {operation}")]
    Timeout { operation: String },

    #[error("Resource creation failed: {resource_type} - {reason}")]
    ResourceCreationError {
        resource_type: String,
        reason: String,
    },

    #[error("Lifetime parsing error: {0}")]
    LifetimeParseError(String),

    #[error("Legacy backend error: {0}")]
    LegacyBackend(String),
}

impl Error {
    /// Determine if this error is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::Timeout { .. } | Error::ResourceCreationError { .. }
        )
    }

    /// True when the cluster answered 404 for the requested object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(ae)) if ae.code == 404)
            || matches!(self, Error::InstanceNotFound { .. })
    }
}
