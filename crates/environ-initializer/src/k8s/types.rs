use thiserror::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Error)]
pub enum KubernetesError {
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Failed to load initializer configuration: {message}")]
    ConfigLoadFailed { message: String },
    #[error("Failed to watch workloads: {message}")]
    WatchFailed { message: String },
    #[error("Failed to patch {kind} {namespace}/{name}")]
    PatchFailed {
        kind: String,
        namespace: String,
        name: String,
    },
}
