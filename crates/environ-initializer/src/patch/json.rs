//! RFC 6902 JSON patch guarded against drift of the live object.
//!
//! JSON patch addresses list elements by index and `add` overwrites existing
//! members. Every touched container therefore gets a leading `test` on its
//! whole observed value: if the live container moved, was renamed or gained
//! fields such as an env list in the meantime, the API server rejects the
//! patch instead of mutating the wrong container or dropping those fields.

use std::collections::BTreeSet;

use error_stack::Report;
use error_stack::ResultExt;
use json_patch::Patch;
use json_patch::PatchOperation;
use json_patch::TestOperation;
use serde_json::Value;

use super::PatchError;

const CONTAINER_LISTS: &[&str] = &["containers", "initContainers", "ephemeralContainers"];

pub(super) fn guarded_diff(before: &Value, after: &Value) -> Result<Patch, Report<PatchError>> {
    let Patch(operations) = json_patch::diff(before, after);

    let mut guarded = BTreeSet::new();
    let mut guards = Vec::new();
    for operation in &operations {
        let Some(container) = container_pointer(operation_path(operation)) else {
            continue;
        };
        if !guarded.insert(container.clone()) {
            continue;
        }
        if let Some(observed) = before.pointer(&container) {
            guards.push(test_operation(&container, observed)?);
        }
    }

    guards.extend(operations);
    Ok(Patch(guards))
}

fn operation_path(operation: &PatchOperation) -> &str {
    match operation {
        PatchOperation::Add(op) => op.path.as_str(),
        PatchOperation::Remove(op) => op.path.as_str(),
        PatchOperation::Replace(op) => op.path.as_str(),
        PatchOperation::Move(op) => op.path.as_str(),
        PatchOperation::Copy(op) => op.path.as_str(),
        PatchOperation::Test(op) => op.path.as_str(),
    }
}

fn test_operation(path: &str, value: &Value) -> Result<PatchOperation, Report<PatchError>> {
    Ok(PatchOperation::Test(TestOperation {
        path: path.parse::<String>().change_context(PatchError::EncodingFailed {
            message: format!("Invalid JSON pointer {path}"),
        })?,
        value: value.clone(),
    }))
}

/// Pointer to the container addressed by `path`, e.g.
/// `/spec/template/spec/containers/0/env/1` -> `/spec/template/spec/containers/0`.
fn container_pointer(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .windows(2)
        .position(|pair| CONTAINER_LISTS.contains(&pair[0]) && pair[1].parse::<usize>().is_ok())
        .map(|index| segments[..index + 2].join("/"))
}
