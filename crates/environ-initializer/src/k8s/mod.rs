//! Kubernetes integration module.
//!
//! The main components are:
//! - [`WorkloadWatcher`]: watches one workload kind and patches new, annotated objects
//! - [`Workload`]: the capability a kind needs to be watched and mutated
//! - [`annotations`]: trigger detection and the injected marker

pub mod annotations;
pub mod kube_client;
pub mod types;
pub mod watcher;
pub mod workload;

pub use kube_client::init_kube_client;
pub use types::KubernetesError;
pub use watcher::WorkloadWatcher;
pub use workload::Workload;
pub use workload::WorkloadKind;
