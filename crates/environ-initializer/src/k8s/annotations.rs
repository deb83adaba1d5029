use kube::Resource;
use kube::ResourceExt;
use tracing::debug;

/// Default annotation that triggers environment injection.
pub const DEFAULT_TRIGGER_ANNOTATION: &str = "initializers.kubernetes.io/environ";

/// Suffix appended to the trigger key to mark workloads that were already patched.
const INJECTED_SUFFIX: &str = "-injected";

/// Result of looking for the trigger annotation on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    Absent,
    /// The annotation is set; holds its raw, unmodified value.
    Present(String),
}

impl Identification {
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// The annotation value, or an empty string when absent.
    pub fn raw_value(&self) -> &str {
        match self {
            Self::Present(value) => value,
            Self::Absent => "",
        }
    }
}

/// Check a resource for the trigger annotation.
///
/// Absence is a normal outcome, so this never fails.
pub fn identify<K: Resource>(trigger_key: &str, resource: &K) -> Identification {
    debug!(
        name = %resource.name_any(),
        annotation = trigger_key,
        "Checking resource for trigger annotation"
    );

    match resource.annotations().get(trigger_key) {
        Some(value) => Identification::Present(value.clone()),
        None => Identification::Absent,
    }
}

/// Annotation key recording that a workload already received its variables.
pub fn injected_marker_key(trigger_key: &str) -> String {
    format!("{trigger_key}{INJECTED_SUFFIX}")
}

pub fn is_injected<K: Resource>(trigger_key: &str, resource: &K) -> bool {
    resource
        .annotations()
        .contains_key(&injected_marker_key(trigger_key))
}

/// Stamp the injected marker, recording the groups that were applied.
pub fn mark_injected<K: Resource>(trigger_key: &str, resource: &mut K, applied: &str) {
    resource
        .annotations_mut()
        .insert(injected_marker_key(trigger_key), applied.to_string());
}
