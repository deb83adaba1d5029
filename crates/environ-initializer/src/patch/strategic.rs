//! Two-way strategic merge patch.
//!
//! Objects are diffed field by field, removed fields become `null`. Lists of
//! containers and env vars are merged by their `name` key the same way the
//! API server does, so entries added concurrently by someone else survive.
//! All other lists are replaced as a whole.

use std::collections::HashMap;

use error_stack::Report;
use serde_json::Map;
use serde_json::Value;

use super::PatchError;

const MERGE_KEY: &str = "name";
const KEYED_LISTS: &[&str] = &["containers", "initContainers", "ephemeralContainers", "env"];
const ORDER_DIRECTIVE_PREFIX: &str = "$setElementOrder/";
const PATCH_DIRECTIVE: &str = "$patch";

pub(super) fn two_way(before: &Value, after: &Value) -> Result<Value, Report<PatchError>> {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => Ok(Value::Object(diff_objects(before, after)?)),
        _ if before == after => Ok(Value::Object(Map::new())),
        _ => Ok(after.clone()),
    }
}

fn diff_objects(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> Result<Map<String, Value>, Report<PatchError>> {
    let mut patch = Map::new();

    for (key, after_value) in after {
        match before.get(key) {
            Some(before_value) if before_value == after_value => {}
            Some(before_value) => diff_field(key, before_value, after_value, &mut patch)?,
            None => {
                if let Value::Array(items) = after_value {
                    if is_keyed_list(key) {
                        keyed_index(key, items)?;
                    }
                }
                patch.insert(key.clone(), after_value.clone());
            }
        }
    }

    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    Ok(patch)
}

fn diff_field(
    key: &str,
    before: &Value,
    after: &Value,
    patch: &mut Map<String, Value>,
) -> Result<(), Report<PatchError>> {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let nested = diff_objects(before, after)?;
            if !nested.is_empty() {
                patch.insert(key.to_string(), Value::Object(nested));
            }
        }
        (Value::Array(before), Value::Array(after)) if is_keyed_list(key) => {
            diff_keyed_list(key, before, after, patch)?;
        }
        _ => {
            patch.insert(key.to_string(), after.clone());
        }
    }
    Ok(())
}

fn diff_keyed_list(
    key: &str,
    before: &[Value],
    after: &[Value],
    patch: &mut Map<String, Value>,
) -> Result<(), Report<PatchError>> {
    let before_index = keyed_index(key, before)?;
    let after_index = keyed_index(key, after)?;

    let mut entries = Vec::new();
    for item in after {
        let name = merge_key(item).unwrap_or_default();
        match before_index.get(name) {
            None => entries.push(item.clone()),
            Some(previous) if *previous == item => {}
            Some(previous) => {
                let mut nested = match (previous, item) {
                    (Value::Object(previous), Value::Object(item)) => diff_objects(previous, item)?,
                    _ => return Err(not_an_object(key)),
                };
                nested.insert(MERGE_KEY.to_string(), Value::String(name.to_string()));
                entries.push(Value::Object(nested));
            }
        }
    }

    for item in before {
        let name = merge_key(item).unwrap_or_default();
        if !after_index.contains_key(name) {
            let mut deletion = Map::new();
            deletion.insert(MERGE_KEY.to_string(), Value::String(name.to_string()));
            deletion.insert(PATCH_DIRECTIVE.to_string(), Value::String("delete".to_string()));
            entries.push(Value::Object(deletion));
        }
    }

    let retained_before: Vec<&str> = before
        .iter()
        .filter_map(merge_key)
        .filter(|name| after_index.contains_key(name))
        .collect();
    let retained_after: Vec<&str> = after
        .iter()
        .filter_map(merge_key)
        .filter(|name| before_index.contains_key(name))
        .collect();
    let reordered = retained_before != retained_after;

    if entries.is_empty() && !reordered {
        return Ok(());
    }
    if !entries.is_empty() {
        patch.insert(key.to_string(), Value::Array(entries));
    }

    let order = after
        .iter()
        .filter_map(merge_key)
        .map(|name| {
            let mut element = Map::new();
            element.insert(MERGE_KEY.to_string(), Value::String(name.to_string()));
            Value::Object(element)
        })
        .collect();
    patch.insert(format!("{ORDER_DIRECTIVE_PREFIX}{key}"), Value::Array(order));
    Ok(())
}

/// Index a keyed list by merge key, rejecting lists the server could not merge.
fn keyed_index<'a>(key: &str, items: &'a [Value]) -> Result<HashMap<&'a str, &'a Value>, Report<PatchError>> {
    let mut index = HashMap::with_capacity(items.len());
    for item in items {
        let Some(name) = merge_key(item) else {
            return Err(Report::new(PatchError::Unrepresentable {
                list: key.to_string(),
                reason: format!("element without a string '{MERGE_KEY}'"),
            }));
        };
        if index.insert(name, item).is_some() {
            return Err(Report::new(PatchError::Unrepresentable {
                list: key.to_string(),
                reason: format!("duplicate {MERGE_KEY} '{name}'"),
            }));
        }
    }
    Ok(index)
}

fn merge_key(item: &Value) -> Option<&str> {
    item.get(MERGE_KEY)?.as_str()
}

fn is_keyed_list(key: &str) -> bool {
    KEYED_LISTS.contains(&key)
}

fn not_an_object(key: &str) -> Report<PatchError> {
    Report::new(PatchError::Unrepresentable {
        list: key.to_string(),
        reason: "element is not an object".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::patch::derive;
    use crate::patch::tests::deployment;
    use crate::patch::DerivedPatch;
    use crate::patch::PatchStrategy;

    /// Minimal strategic merge, enough to check patches round-trip.
    fn apply(target: &mut Value, patch: &Value) {
        if !(target.is_object() && patch.is_object()) {
            *target = patch.clone();
            return;
        }
        let (Some(target_map), Some(patch_map)) = (target.as_object_mut(), patch.as_object()) else {
            return;
        };

        for (key, value) in patch_map {
            if key.starts_with(ORDER_DIRECTIVE_PREFIX) {
                continue;
            }
            if value.is_null() {
                target_map.remove(key);
                continue;
            }
            match (target_map.get_mut(key), value) {
                (Some(Value::Array(items)), Value::Array(patch_items)) if is_keyed_list(key) => {
                    merge_items(items, patch_items);
                }
                (Some(existing @ Value::Object(_)), Value::Object(_)) => apply(existing, value),
                _ => {
                    target_map.insert(key.clone(), value.clone());
                }
            }
        }

        for (directive, order) in patch_map {
            let Some(key) = directive.strip_prefix(ORDER_DIRECTIVE_PREFIX) else {
                continue;
            };
            if let (Some(Value::Array(items)), Value::Array(order)) = (target_map.get_mut(key), order) {
                let position = |item: &Value| {
                    order
                        .iter()
                        .position(|o| merge_key(o) == merge_key(item))
                        .unwrap_or(usize::MAX)
                };
                items.sort_by_key(|item| position(item));
            }
        }
    }

    fn merge_items(items: &mut Vec<Value>, patch_items: &[Value]) {
        for patch_item in patch_items {
            let name = merge_key(patch_item).map(str::to_string);
            if patch_item.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some("delete") {
                items.retain(|item| merge_key(item).map(str::to_string) != name);
                continue;
            }
            match items
                .iter_mut()
                .find(|item| merge_key(item).map(str::to_string) == name)
            {
                Some(existing) => apply(existing, patch_item),
                None => items.push(patch_item.clone()),
            }
        }
    }

    fn round_trip(before: &Value, after: &Value) {
        let patch = two_way(before, after).unwrap();
        let mut patched = before.clone();
        apply(&mut patched, &patch);
        assert_eq!(&patched, after);
    }

    #[test]
    fn identical_objects_produce_empty_patch() {
        let value = json!({"a": 1, "env": [{"name": "A", "value": "1"}]});
        assert_eq!(two_way(&value, &value).unwrap(), json!({}));
    }

    #[test]
    fn scalar_changes_and_removals() {
        let before = json!({"a": 1, "b": {"c": true, "d": "x"}, "gone": 3});
        let after = json!({"a": 2, "b": {"c": true}});

        assert_eq!(
            two_way(&before, &after).unwrap(),
            json!({"a": 2, "b": {"d": null}, "gone": null})
        );
        round_trip(&before, &after);
    }

    #[test]
    fn plain_lists_are_replaced() {
        let before = json!({"args": ["a", "b"]});
        let after = json!({"args": ["a", "b", "c"]});

        assert_eq!(two_way(&before, &after).unwrap(), json!({"args": ["a", "b", "c"]}));
    }

    #[test]
    fn appended_env_entries_are_merged_by_name() {
        let before = json!({"env": [{"name": "A", "value": "1"}]});
        let after = json!({"env": [{"name": "A", "value": "1"}, {"name": "XVAR", "value": "xval"}]});

        assert_eq!(
            two_way(&before, &after).unwrap(),
            json!({
                "$setElementOrder/env": [{"name": "A"}, {"name": "XVAR"}],
                "env": [{"name": "XVAR", "value": "xval"}]
            })
        );
        round_trip(&before, &after);
    }

    #[test]
    fn changed_and_deleted_entries() {
        let before = json!({"env": [{"name": "A", "value": "1"}, {"name": "B", "value": "2"}]});
        let after = json!({"env": [{"name": "A", "value": "one"}]});

        assert_eq!(
            two_way(&before, &after).unwrap(),
            json!({
                "$setElementOrder/env": [{"name": "A"}],
                "env": [
                    {"name": "A", "value": "one"},
                    {"name": "B", "$patch": "delete"}
                ]
            })
        );
        round_trip(&before, &after);
    }

    #[test]
    fn reordering_emits_only_the_order_directive() {
        let before = json!({"env": [{"name": "A"}, {"name": "B"}]});
        let after = json!({"env": [{"name": "B"}, {"name": "A"}]});

        assert_eq!(
            two_way(&before, &after).unwrap(),
            json!({"$setElementOrder/env": [{"name": "B"}, {"name": "A"}]})
        );
        round_trip(&before, &after);
    }

    #[test]
    fn duplicate_names_are_unrepresentable() {
        let before = json!({"env": [{"name": "XVAR", "value": "mine"}]});
        let after = json!({"env": [{"name": "XVAR", "value": "mine"}, {"name": "XVAR", "value": "xval"}]});

        let err = two_way(&before, &after).unwrap_err();

        match err.current_context() {
            PatchError::Unrepresentable { list, .. } => assert_eq!(list.as_str(), "env"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_names_in_new_list_are_unrepresentable() {
        let before = json!({"name": "app"});
        let after = json!({"name": "app", "env": [{"name": "X"}, {"name": "X"}]});

        assert!(two_way(&before, &after).is_err());
    }

    #[test]
    fn elements_without_merge_key_are_unrepresentable() {
        let before = json!({"containers": [{"name": "app"}]});
        let after = json!({"containers": [{"image": "nginx"}]});

        assert!(two_way(&before, &after).is_err());
    }

    #[test]
    fn workload_env_injection_round_trips() {
        let before = deployment(vec![
            ("app", vec![("A", "1")]),
            ("sidecar", vec![]),
        ]);
        let after = deployment(vec![
            ("app", vec![("A", "1"), ("XVAR", "xval"), ("YVAR", "yval")]),
            ("sidecar", vec![("XVAR", "xval"), ("YVAR", "yval")]),
        ]);

        let DerivedPatch::Strategic(patch) = derive(&before, &after, PatchStrategy::Strategic).unwrap() else {
            panic!("expected a strategic patch");
        };

        let mut patched = serde_json::to_value(&before).unwrap();
        apply(&mut patched, &patch);
        assert_eq!(patched, serde_json::to_value(&after).unwrap());
    }

    #[test]
    fn annotation_marker_is_a_plain_map_merge() {
        let before = json!({"metadata": {"annotations": {"trigger": "{}"}}});
        let after = json!({"metadata": {"annotations": {"trigger": "{}", "trigger-injected": "{}"}}});

        assert_eq!(
            two_way(&before, &after).unwrap(),
            json!({"metadata": {"annotations": {"trigger-injected": "{}"}}})
        );
    }
}
