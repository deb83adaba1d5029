//! Mutation planning.
//!
//! Turns a trigger annotation value into a mutated copy of a workload whose
//! containers carry the referenced environment groups.

use error_stack::Report;
use error_stack::ResultExt;
use kube::ResourceExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::catalog::EnvironmentCatalog;
use crate::catalog::GroupLookup;
use crate::k8s::Workload;

/// Errors that can occur while planning a mutation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Invalid trigger payload: {message}")]
    InvalidPayload { message: String },
    #[error("Environment group '{group}' has invalid data: {reason}")]
    InvalidGroupData { group: String, reason: String },
}

/// Decoded trigger annotation value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TriggerPayload {
    /// Group names, in the order their variables are appended.
    #[serde(default)]
    pub environments: Vec<String>,
}

impl TriggerPayload {
    /// # Errors
    ///
    /// - [`PlanError::InvalidPayload`] if the value is not a JSON object with
    ///   an `environments` string list
    pub fn parse(raw_value: &str) -> Result<Self, Report<PlanError>> {
        serde_json::from_str(raw_value).change_context(PlanError::InvalidPayload {
            message: format!("Failed to decode annotation value '{raw_value}'"),
        })
    }
}

/// Plan the mutation of `workload` for the given trigger value.
///
/// # Errors
///
/// - [`PlanError::InvalidPayload`] if `raw_value` cannot be decoded
/// - [`PlanError::InvalidGroupData`] if a referenced group failed to parse
pub fn plan<K: Workload>(
    raw_value: &str,
    workload: &K,
    catalog: &EnvironmentCatalog,
) -> Result<K, Report<PlanError>> {
    plan_payload(&TriggerPayload::parse(raw_value)?, workload, catalog)
}

/// Plan the mutation of `workload` for an already decoded payload.
///
/// Returns a modified copy; `workload` itself is never touched. Variables of
/// every resolved group are appended, in listed order, after the existing env
/// entries of each container. Groups missing from the catalog are skipped.
///
/// # Errors
///
/// - [`PlanError::InvalidGroupData`] if a referenced group failed to parse
pub fn plan_payload<K: Workload>(
    payload: &TriggerPayload,
    workload: &K,
    catalog: &EnvironmentCatalog,
) -> Result<K, Report<PlanError>> {
    let mut containers = workload.containers().to_vec();
    for group in &payload.environments {
        let env_vars = match catalog.lookup(group) {
            GroupLookup::Found(env_vars) => env_vars,
            GroupLookup::Missing => {
                debug!(
                    name = %workload.name_any(),
                    group = %group,
                    "Environment group not in catalog, skipping"
                );
                continue;
            }
            GroupLookup::Malformed { reason } => {
                return Err(Report::new(PlanError::InvalidGroupData {
                    group: group.clone(),
                    reason: reason.to_string(),
                }));
            }
        };

        // keep an absent env list absent when there is nothing to add
        if env_vars.is_empty() {
            continue;
        }
        for container in &mut containers {
            container
                .env
                .get_or_insert_with(Vec::new)
                .extend_from_slice(env_vars);
        }
    }

    let mut planned = workload.clone();
    if !containers.is_empty() {
        planned.set_containers(containers);
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::DaemonSet;
    use k8s_openapi::api::apps::v1::DaemonSetSpec;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::EnvVar;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn container(name: &str, env: Option<Vec<EnvVar>>) -> Container {
        Container {
            name: name.to_string(),
            image: Some("quay.io/lander2k2/crashcart".to_string()),
            env,
            ..Default::default()
        }
    }

    fn template(containers: Vec<Container>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(BTreeMap::from([("role".to_string(), "test".to_string())])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
        }
    }

    fn deployment(containers: Vec<Container>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("target-a".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: template(containers),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn catalog() -> EnvironmentCatalog {
        EnvironmentCatalog::from_data(&BTreeMap::from([
            (
                "environ-x".to_string(),
                "envVars:\n- name: XVAR\n  value: xval\n".to_string(),
            ),
            (
                "environ-y".to_string(),
                "envVars:\n- name: YVAR\n  value: yval\n".to_string(),
            ),
            ("broken".to_string(), "envVars: [name: {".to_string()),
        ]))
    }

    fn env_of<K: Workload>(workload: &K, index: usize) -> Vec<EnvVar> {
        workload.containers()[index].env.clone().unwrap_or_default()
    }

    #[test]
    fn parse_payload() {
        let payload = TriggerPayload::parse(r#"{"environments":["environ-x", "environ-y"]}"#).unwrap();
        assert_eq!(
            payload.environments,
            vec!["environ-x".to_string(), "environ-y".to_string()]
        );
    }

    #[test]
    fn parse_payload_without_environments_field() {
        let payload = TriggerPayload::parse("{}").unwrap();
        assert!(payload.environments.is_empty());
    }

    #[test]
    fn parse_payload_rejects_wrong_shapes() {
        for raw in [
            "not-json",
            "",
            r#"{"environments":"environ-x"}"#,
            r#"{"environments":[1]}"#,
        ] {
            let err = TriggerPayload::parse(raw).unwrap_err();
            assert!(
                matches!(err.current_context(), PlanError::InvalidPayload { .. }),
                "expected InvalidPayload for {raw:?}"
            );
        }
    }

    #[test]
    fn appends_groups_in_listed_order() {
        let original = deployment(vec![container("target-a", None)]);

        let planned = plan(r#"{"environments":["environ-y","environ-x"]}"#, &original, &catalog()).unwrap();

        assert_eq!(env_of(&planned, 0), vec![env("YVAR", "yval"), env("XVAR", "xval")]);
    }

    #[test]
    fn preserves_existing_entries() {
        let original = deployment(vec![container("target-a", Some(vec![env("XVAR", "mine"), env("A", "1")]))]);

        let planned = plan(r#"{"environments":["environ-x"]}"#, &original, &catalog()).unwrap();

        // no deduplication by name
        assert_eq!(
            env_of(&planned, 0),
            vec![env("XVAR", "mine"), env("A", "1"), env("XVAR", "xval")]
        );
    }

    #[test]
    fn injects_into_every_container() {
        let original = deployment(vec![
            container("app", None),
            container("sidecar", Some(vec![env("S", "1")])),
        ]);

        let planned = plan(r#"{"environments":["environ-x"]}"#, &original, &catalog()).unwrap();

        assert_eq!(env_of(&planned, 0), vec![env("XVAR", "xval")]);
        assert_eq!(env_of(&planned, 1), vec![env("S", "1"), env("XVAR", "xval")]);
    }

    #[test]
    fn leaves_other_fields_untouched() {
        let original = deployment(vec![container("target-a", None)]);

        let mut planned = plan(r#"{"environments":["environ-x"]}"#, &original, &catalog()).unwrap();
        planned.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env = None;

        assert_eq!(planned, original);
    }

    #[test]
    fn missing_group_contributes_nothing() {
        let original = deployment(vec![container("target-a", None)]);

        let planned = plan(
            r#"{"environments":["environ-z","environ-x"]}"#,
            &original,
            &catalog(),
        )
        .unwrap();

        assert_eq!(env_of(&planned, 0), vec![env("XVAR", "xval")]);
    }

    #[test]
    fn empty_environment_list_is_a_no_op() {
        let original = deployment(vec![container("target-a", Some(vec![env("A", "1")]))]);

        let planned = plan(r#"{"environments":[]}"#, &original, &catalog()).unwrap();

        assert_eq!(planned, original);
    }

    #[test]
    fn invalid_payload_leaves_original_unmodified() {
        let original = deployment(vec![container("target-a", None)]);
        let snapshot = original.clone();

        let err = plan("not-json", &original, &catalog()).unwrap_err();

        assert!(matches!(err.current_context(), PlanError::InvalidPayload { .. }));
        assert_eq!(original, snapshot);
    }

    #[test]
    fn malformed_group_fails_the_whole_plan() {
        let original = deployment(vec![container("target-a", None)]);

        let err = plan(
            r#"{"environments":["environ-x","broken","environ-y"]}"#,
            &original,
            &catalog(),
        )
        .unwrap_err();

        match err.current_context() {
            PlanError::InvalidGroupData { group, .. } => assert_eq!(group.as_str(), "broken"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let original = deployment(vec![container("app", None), container("sidecar", None)]);
        let raw = r#"{"environments":["environ-x","environ-y"]}"#;

        let first = serde_json::to_vec(&plan(raw, &original, &catalog()).unwrap()).unwrap();
        let second = serde_json::to_vec(&plan(raw, &original, &catalog()).unwrap()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn decoded_payload_plans_like_raw_value() {
        let original = deployment(vec![container("target-a", None)]);
        let raw = r#"{"environments":["environ-x","environ-y"]}"#;
        let payload = TriggerPayload::parse(raw).unwrap();

        let from_payload = plan_payload(&payload, &original, &catalog()).unwrap();

        assert_eq!(from_payload, plan(raw, &original, &catalog()).unwrap());
        assert_eq!(env_of(&from_payload, 0), vec![env("XVAR", "xval"), env("YVAR", "yval")]);
    }

    #[test]
    fn works_for_daemonsets() {
        let original = DaemonSet {
            metadata: ObjectMeta {
                name: Some("agent".to_string()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                template: template(vec![container("agent", None)]),
                ..Default::default()
            }),
            status: None,
        };

        let planned = plan(r#"{"environments":["environ-y"]}"#, &original, &catalog()).unwrap();

        assert_eq!(env_of(&planned, 0), vec![env("YVAR", "yval")]);
    }

    #[test]
    fn workload_without_pod_spec_is_unchanged() {
        let original = Deployment::default();

        let planned = plan(r#"{"environments":["environ-x"]}"#, &original, &catalog()).unwrap();

        assert_eq!(planned, original);
    }
}
