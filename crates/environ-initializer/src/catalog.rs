//! Environment catalog.
//!
//! Environment groups are read once from a ConfigMap whose keys are group names
//! and whose values are YAML documents of the form:
//!
//! ```yaml
//! envVars:
//! - name: XVAR
//!   value: xval
//! ```
//!
//! The catalog is immutable after construction and shared across watchers.

use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::EnvVar;
use kube::Api;
use kube::Client;
use serde::Deserialize;
use tracing::info;
use tracing::warn;

use crate::k8s::KubernetesError;

#[derive(Debug, Deserialize)]
struct GroupDocument {
    #[serde(rename = "envVars", default)]
    env_vars: Vec<EnvVar>,
}

#[derive(Debug, Clone)]
enum GroupEntry {
    Parsed(Vec<EnvVar>),
    Malformed { reason: String },
}

/// Outcome of resolving a group name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupLookup<'a> {
    Found(&'a [EnvVar]),
    Missing,
    /// The group exists but its data could not be parsed.
    Malformed { reason: &'a str },
}

/// Mapping from environment-group name to its environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentCatalog {
    groups: BTreeMap<String, GroupEntry>,
}

impl EnvironmentCatalog {
    /// Build a catalog from raw ConfigMap data.
    ///
    /// Groups that fail to parse are kept and reported on lookup, so one bad
    /// entry only affects workloads that reference it.
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        let groups = data
            .iter()
            .map(|(name, raw)| {
                let entry = match parse_group(raw) {
                    Ok(env_vars) => GroupEntry::Parsed(env_vars),
                    Err(e) => {
                        warn!(group = %name, error = %e, "Malformed environment group in catalog");
                        GroupEntry::Malformed {
                            reason: e.to_string(),
                        }
                    }
                };
                (name.clone(), entry)
            })
            .collect();

        Self { groups }
    }

    pub fn from_config_map(config_map: &ConfigMap) -> Self {
        match &config_map.data {
            Some(data) => Self::from_data(data),
            None => Self::default(),
        }
    }

    /// Fetch the named ConfigMap and build the catalog from it.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ConfigLoadFailed`] if the ConfigMap cannot be read
    pub async fn load(
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<Self, Report<KubernetesError>> {
        let api: Api<ConfigMap> = Api::namespaced(client, namespace);
        let config_map = api
            .get(name)
            .await
            .change_context(KubernetesError::ConfigLoadFailed {
                message: format!("Failed to get ConfigMap {namespace}/{name}"),
            })?;

        let catalog = Self::from_config_map(&config_map);
        info!(
            configmap = %format!("{namespace}/{name}"),
            groups = catalog.len(),
            malformed = catalog.malformed_groups().count(),
            "Loaded environment catalog"
        );
        Ok(catalog)
    }

    pub fn lookup(&self, group: &str) -> GroupLookup<'_> {
        match self.groups.get(group) {
            Some(GroupEntry::Parsed(env_vars)) => GroupLookup::Found(env_vars),
            Some(GroupEntry::Malformed { reason }) => GroupLookup::Malformed { reason },
            None => GroupLookup::Missing,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn malformed_groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().filter_map(|(name, entry)| match entry {
            GroupEntry::Malformed { .. } => Some(name.as_str()),
            GroupEntry::Parsed(_) => None,
        })
    }
}

fn parse_group(raw: &str) -> Result<Vec<EnvVar>, serde_yaml::Error> {
    // an empty document is an empty group
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str::<GroupDocument>(raw).map(|doc| doc.env_vars)
}
