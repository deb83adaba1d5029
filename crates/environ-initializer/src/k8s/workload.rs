use std::fmt::Debug;

use derive_more::Display;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Watchable workload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, clap::ValueEnum)]
pub enum WorkloadKind {
    #[display("deployments")]
    #[value(name = "deployments")]
    Deployments,
    #[display("daemonsets")]
    #[value(name = "daemonsets")]
    DaemonSets,
    #[display("statefulsets")]
    #[value(name = "statefulsets")]
    StatefulSets,
}

/// A namespaced resource that carries a pod template.
///
/// The controller only ever touches the containers of the template, so this
/// is the whole capability a kind has to expose to be watched and mutated.
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: WorkloadKind;

    fn pod_spec(&self) -> Option<&PodSpec>;

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec>;

    /// Containers of the pod template, empty when the template has no spec.
    fn containers(&self) -> &[Container] {
        self.pod_spec()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
    }

    /// Replaces the template containers. Returns `false` when the workload
    /// has no pod spec to hold them.
    fn set_containers(&mut self, containers: Vec<Container>) -> bool {
        match self.pod_spec_mut() {
            Some(spec) => {
                spec.containers = containers;
                true
            }
            None => false,
        }
    }
}

macro_rules! impl_workload {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl Workload for $ty {
                const KIND: WorkloadKind = WorkloadKind::$kind;

                fn pod_spec(&self) -> Option<&PodSpec> {
                    self.spec.as_ref()?.template.spec.as_ref()
                }

                fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
                    self.spec.as_mut()?.template.spec.as_mut()
                }
            }
        )+
    };
}

impl_workload! {
    Deployment => Deployments,
    DaemonSet => DaemonSets,
    StatefulSet => StatefulSets,
}
