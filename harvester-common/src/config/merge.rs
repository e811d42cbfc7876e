use serde_json::Value;

/// Deep-merges `overlay` into `base`, overlay keys winning on conflict.
/// ---
/// Objects merge recursively, anything else (scalars, arrays, null)
/// replaces the base value wholesale. Keys keep their position in `base`;
/// keys only present in `overlay` are appended in overlay order.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Returns `base` with the optional task-level override merged on top.
pub fn merge_override(base: &Value, overlay: Option<&Value>) -> Value {
    let mut merged = base.clone();
    if let Some(overlay) = overlay {
        deep_merge(&mut merged, overlay.clone());
    }
    merged
}
