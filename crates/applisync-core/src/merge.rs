// ── Deep merge of partial reported state ──
//
// Pushes and pulls both carry partial state. Nested objects merge key by
// key; scalars and arrays replace whole. The merge reports which leaf
// paths actually changed so callers can skip no-op notifications.

use serde_json::{Map, Value};

use crate::model::PropertyPath;

/// Merge `incoming` into `target`, returning the leaf paths whose value
/// changed. Merging the same partial twice returns an empty list the
/// second time.
pub fn deep_merge(target: &mut Map<String, Value>, incoming: &Map<String, Value>) -> Vec<PropertyPath> {
    let mut changed = Vec::new();
    merge_into(target, incoming, &PropertyPath::new(""), &mut changed);
    changed
}

fn merge_into(
    target: &mut Map<String, Value>,
    incoming: &Map<String, Value>,
    prefix: &PropertyPath,
    changed: &mut Vec<PropertyPath>,
) {
    for (key, value) in incoming {
        let path = prefix.join(key);
        if let (Some(Value::Object(existing)), Value::Object(update)) = (target.get_mut(key), value)
        {
            merge_into(existing, update, &path, changed);
            continue;
        }
        if target.get(key) == Some(value) {
            continue;
        }
        target.insert(key.clone(), value.clone());
        changed.push(path);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn nested_objects_merge_key_by_key() {
        let mut target = object(json!({
            "userSelections": { "programUID": "COTTON", "antiCreaseValue": 30 },
            "timeToEnd": 3600
        }));
        let changed = deep_merge(
            &mut target,
            &object(json!({ "userSelections": { "antiCreaseValue": 60 } })),
        );

        assert_eq!(changed, vec![PropertyPath::from("userSelections/antiCreaseValue")]);
        assert_eq!(target["userSelections"]["programUID"], "COTTON");
        assert_eq!(target["userSelections"]["antiCreaseValue"], 60);
        assert_eq!(target["timeToEnd"], 3600);
    }

    #[test]
    fn arrays_replace_whole() {
        let mut target = object(json!({ "alerts": [{ "code": "A" }, { "code": "B" }] }));
        let changed = deep_merge(&mut target, &object(json!({ "alerts": [{ "code": "C" }] })));
        assert_eq!(changed.len(), 1);
        assert_eq!(target["alerts"], json!([{ "code": "C" }]));
    }

    #[test]
    fn merge_is_idempotent() {
        let partial = object(json!({
            "doorState": "CLOSED",
            "userSelections": { "programUID": "SHOES_PR_RUNNINGSHOES" }
        }));
        let mut target = Map::new();

        let first = deep_merge(&mut target, &partial);
        let snapshot = target.clone();
        let second = deep_merge(&mut target, &partial);

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(target, snapshot);
    }

    #[test]
    fn object_replaces_scalar() {
        let mut target = object(json!({ "fCodes": null }));
        let changed = deep_merge(&mut target, &object(json!({ "fCodes": { "F01": true } })));
        assert_eq!(changed, vec![PropertyPath::from("fCodes")]);
        assert_eq!(target["fCodes"]["F01"], true);
    }
}
