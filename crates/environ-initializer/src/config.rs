use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use utils::version;

use crate::k8s::annotations::DEFAULT_TRIGGER_ANNOTATION;
use crate::k8s::WorkloadKind;
use crate::patch::PatchStrategy;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "ENVIRON_ANNOTATION",
        default_value = DEFAULT_TRIGGER_ANNOTATION,
        help = "Annotation that triggers environment injection"
    )]
    pub annotation: String,

    #[arg(
        long,
        env = "ENVIRON_CONFIGMAP",
        default_value = "environ-initializer-config",
        help = "Name of the ConfigMap holding the environment groups"
    )]
    pub configmap: String,

    #[arg(
        long,
        env = "ENVIRON_NAMESPACE",
        default_value = "default",
        help = "Namespace of the environment ConfigMap"
    )]
    pub namespace: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "ENVIRON_RESOURCES",
        value_enum,
        value_delimiter = ',',
        default_values_t = [WorkloadKind::Deployments, WorkloadKind::DaemonSets],
        help = "Comma-separated workload kinds to watch"
    )]
    pub resources: Vec<WorkloadKind>,

    #[arg(
        long,
        env = "ENVIRON_PATCH_STRATEGY",
        value_enum,
        default_value_t = PatchStrategy::Strategic,
        help = "Patch encoding submitted to the API server"
    )]
    pub patch_strategy: PatchStrategy,

    #[arg(
        long,
        default_value = "environ-initializer",
        help = "Field manager recorded on every patch"
    )]
    pub field_manager: String,

    #[arg(
        long,
        default_value_t = 5,
        help = "Seconds to wait for watchers to stop after a shutdown signal"
    )]
    pub shutdown_timeout_secs: u64,

    #[arg(
        long,
        env = "ENVIRON_LOG_DIR",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory for daily rotated log files, e.g. /var/log/environ-initializer"
    )]
    pub log_dir: Option<PathBuf>,
}

/// Runtime settings shared by every watcher. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializerConfig {
    pub trigger_annotation: String,
    pub configmap_name: String,
    pub configmap_namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub resources: Vec<WorkloadKind>,
    pub patch_strategy: PatchStrategy,
    pub field_manager: String,
    pub shutdown_timeout: Duration,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            trigger_annotation: DEFAULT_TRIGGER_ANNOTATION.to_string(),
            configmap_name: "environ-initializer-config".to_string(),
            configmap_namespace: "default".to_string(),
            kubeconfig: None,
            resources: vec![WorkloadKind::Deployments, WorkloadKind::DaemonSets],
            patch_strategy: PatchStrategy::default(),
            field_manager: "environ-initializer".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl From<Cli> for InitializerConfig {
    fn from(cli: Cli) -> Self {
        let mut resources = cli.resources;
        // one watcher per kind
        let mut seen = Vec::with_capacity(resources.len());
        resources.retain(|kind| {
            if seen.contains(kind) {
                false
            } else {
                seen.push(*kind);
                true
            }
        });

        Self {
            trigger_annotation: cli.annotation,
            configmap_name: cli.configmap,
            configmap_namespace: cli.namespace,
            kubeconfig: cli.kubeconfig,
            resources,
            patch_strategy: cli.patch_strategy,
            field_manager: cli.field_manager,
            shutdown_timeout: Duration::from_secs(cli.shutdown_timeout_secs),
        }
    }
}
