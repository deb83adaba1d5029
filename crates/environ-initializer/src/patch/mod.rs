//! Patch derivation.
//!
//! Computes the delta between a workload as it was observed and as it was
//! planned, encoded so the API server can apply it as a partial update.

mod json;
mod strategic;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::Patch;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while deriving a patch.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Failed to encode workload state: {message}")]
    EncodingFailed { message: String },
    #[error("List '{list}' cannot be merged by key: {reason}")]
    Unrepresentable { list: String, reason: String },
}

/// Encoding used for the derived delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, clap::ValueEnum)]
pub enum PatchStrategy {
    /// Two-way strategic merge patch, keyed lists merged by `name`.
    #[default]
    #[display("strategic")]
    Strategic,
    /// RFC 6902 JSON patch guarded by tests on the touched containers.
    #[display("json")]
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DerivedPatch {
    Strategic(Value),
    Json(json_patch::Patch),
}

impl DerivedPatch {
    pub fn strategy(&self) -> PatchStrategy {
        match self {
            Self::Strategic(_) => PatchStrategy::Strategic,
            Self::Json(_) => PatchStrategy::Json,
        }
    }

    /// Whether applying this patch would change nothing.
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Self::Strategic(value) => value.as_object().is_some_and(|map| map.is_empty()),
            Self::Json(patch) => patch.0.is_empty(),
        }
    }

    /// Wire form of the patch body.
    ///
    /// # Errors
    ///
    /// - [`PatchError::EncodingFailed`] if the body cannot be serialized
    pub fn to_bytes(&self) -> Result<Vec<u8>, Report<PatchError>> {
        let encoded = match self {
            Self::Strategic(value) => serde_json::to_vec(value),
            Self::Json(patch) => serde_json::to_vec(patch),
        };
        encoded.change_context(PatchError::EncodingFailed {
            message: "Failed to serialize patch body".to_string(),
        })
    }

    pub fn to_kube_patch(&self) -> Patch<Value> {
        match self {
            Self::Strategic(value) => Patch::Strategic(value.clone()),
            Self::Json(patch) => Patch::Json(patch.clone()),
        }
    }
}

/// Derive the delta that turns `before` into `after`.
///
/// Only fields that differ appear in the result; `derive(x, x)` is empty.
///
/// A strategic merge cannot express keyed lists with duplicate names, e.g.
/// two groups defining the same variable. Such changes are derived as a
/// guarded JSON patch instead.
///
/// # Errors
///
/// - [`PatchError::EncodingFailed`] if either state cannot be serialized
pub fn derive<K: Serialize>(
    before: &K,
    after: &K,
    strategy: PatchStrategy,
) -> Result<DerivedPatch, Report<PatchError>> {
    let before = serde_json::to_value(before).change_context(PatchError::EncodingFailed {
        message: "Failed to encode original state".to_string(),
    })?;
    let after = serde_json::to_value(after).change_context(PatchError::EncodingFailed {
        message: "Failed to encode planned state".to_string(),
    })?;

    match strategy {
        PatchStrategy::Strategic => match strategic::two_way(&before, &after) {
            Ok(body) => Ok(DerivedPatch::Strategic(body)),
            Err(e) if matches!(e.current_context(), PatchError::Unrepresentable { .. }) => {
                warn!("Falling back to json patch: {e}");
                json::guarded_diff(&before, &after).map(DerivedPatch::Json)
            }
            Err(e) => Err(e),
        },
        PatchStrategy::Json => json::guarded_diff(&before, &after).map(DerivedPatch::Json),
    }
}
