//! Config update plumbing: recursive merge, `"***"` masking, and restore.
//!
//! `PUT /api/config` works on `serde_json::Value` trees so the update path
//! is shape-agnostic: deep-merge the patch over the current document, put
//! back the current values wherever the patch carried a masked `"***"`
//! leaf, then deserialize + validate the result.

use serde_json::Value;

/// Keys whose string values are secrets and must never be returned raw.
const SECRET_KEYS: &[&str] = &["api_key", "token"];

const MASK: &str = "***";

/// Recursively merge `patch` over `base`.
///
/// Objects merge key-by-key; every other value (including arrays) replaces
/// the base value wholesale.
pub fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.get_mut(&key) {
                    Some(base_val) => deep_merge(base_val, patch_val),
                    None => {
                        base_map.insert(key, patch_val);
                    }
                }
            }
        }
        (base_slot, patch_val) => *base_slot = patch_val,
    }
}

/// Replace every `"***"` leaf in `merged` with the value found at the same
/// path in `previous`. A masked leaf means "unchanged", so after the merge
/// the previous secret is put back. A mask with no previous value becomes
/// an empty string.
pub fn restore_masked(merged: &mut Value, previous: &Value) {
    match merged {
        Value::String(s) if s == MASK => {
            *merged = if previous.is_string() {
                previous.clone()
            } else {
                Value::String(String::new())
            };
        }
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                let prev = previous.get(key.as_str()).unwrap_or(&Value::Null);
                restore_masked(v, prev);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let prev = previous.get(i).unwrap_or(&Value::Null);
                restore_masked(item, prev);
            }
        }
        _ => {}
    }
}

/// Replace every non-empty secret leaf (`api_key`, `token`) with `"***"`.
pub fn mask_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) {
                    if let Value::String(s) = v {
                        if !s.is_empty() {
                            *v = Value::String(MASK.into());
                        }
                    }
                } else {
                    mask_secrets(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                mask_secrets(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_nested_objects() {
        let mut base = json!({"gateway": {"host": "127.0.0.1", "port": 7710}});
        deep_merge(&mut base, json!({"gateway": {"port": 8080}}));
        assert_eq!(base, json!({"gateway": {"host": "127.0.0.1", "port": 8080}}));
    }

    #[test]
    fn merge_inserts_new_keys() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, json!({"b": {"c": 2}}));
        assert_eq!(base, json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut base = json!({"tools": {"deny": ["bash", "exec"]}});
        deep_merge(&mut base, json!({"tools": {"deny": ["rm"]}}));
        assert_eq!(base["tools"]["deny"], json!(["rm"]));
    }

    #[test]
    fn merge_scalar_replaces_object() {
        let mut base = json!({"x": {"y": 1}});
        deep_merge(&mut base, json!({"x": 5}));
        assert_eq!(base["x"], json!(5));
    }

    #[test]
    fn restore_masked_puts_back_previous_secret() {
        let previous = json!({"agent": {"api_key": "sk-live", "model": "gpt-4o"}});
        let mut merged = json!({"agent": {"api_key": "***", "model": "gpt-5"}});
        restore_masked(&mut merged, &previous);
        assert_eq!(merged, json!({"agent": {"api_key": "sk-live", "model": "gpt-5"}}));
    }

    #[test]
    fn restore_masked_inside_arrays() {
        let previous = json!({"providers": [{"api_key": "k0"}, {"api_key": "k1"}]});
        let mut merged = json!({"providers": [{"api_key": "***"}, {"api_key": "fresh"}]});
        restore_masked(&mut merged, &previous);
        assert_eq!(merged["providers"][0]["api_key"], "k0");
        assert_eq!(merged["providers"][1]["api_key"], "fresh");
    }

    #[test]
    fn restore_masked_without_previous_becomes_empty() {
        let mut merged = json!({"agent": {"api_key": "***"}});
        restore_masked(&mut merged, &json!({}));
        assert_eq!(merged["agent"]["api_key"], "");
    }

    #[test]
    fn mask_replaces_secret_leaves() {
        let mut doc = json!({
            "agent": {"api_key": "sk-live-1234", "model": "gpt-4o"},
            "webhooks": {"token": "hook-secret"},
            "channels": {"discord": {"token": "bot-token"}}
        });
        mask_secrets(&mut doc);
        assert_eq!(doc["agent"]["api_key"], "***");
        assert_eq!(doc["agent"]["model"], "gpt-4o");
        assert_eq!(doc["webhooks"]["token"], "***");
        assert_eq!(doc["channels"]["discord"]["token"], "***");
    }

    #[test]
    fn mask_leaves_empty_secrets_alone() {
        let mut doc = json!({"agent": {"api_key": ""}});
        mask_secrets(&mut doc);
        assert_eq!(doc["agent"]["api_key"], "");
    }

    #[test]
    fn fully_masked_put_is_identity() {
        // The round-trip law: PUT a fully masked read-out back and the
        // document must come out byte-identical.
        let original = json!({
            "agent": {"api_key": "sk-live", "model": "gpt-4o",
                      "providers": [{"name": "p0", "api_key": "k0",
                                     "api_base": "https://x", "model": "m"}]},
            "gateway": {"auth": {"mode": "token", "token": "t"}}
        });

        let mut patch = original.clone();
        mask_secrets(&mut patch);

        let mut merged = original.clone();
        deep_merge(&mut merged, patch);
        restore_masked(&mut merged, &original);
        assert_eq!(merged, original);
    }
}
