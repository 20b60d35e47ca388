//! JSON bridge: best-effort conversion between [`GValue`] and
//! `serde_json::Value`. JSON has no representation for refs, blobs, sums,
//! or pool references, so [`to_json`] tags them the same way the teacher
//! tagged structs (`_type`) and sums (`_tag`/`_value`); [`from_json`]
//! only ever produces the seven value shapes JSON itself can carry
//! (`Null`/`Bool`/`Int`/`Float`/`Str`/`List`/`Map`) — it does not attempt
//! to recognize those tags on the way back in, since arbitrary JSON from
//! an LLM or external API was never produced by `to_json` in the first
//! place.
//!
//! Duplicate object keys are resolved last-write-wins for free: by the
//! time `serde_json::from_str` hands us a `Map`, it has already collapsed
//! duplicates that way, so `from_json` only ever sees the winning value.

use crate::error::*;
use crate::types::*;
use serde_json::{Map, Number, Value as JsonValue};

/// Convert a JSON value to a [`GValue`]. Only ever produces
/// `Null`/`Bool`/`Int`/`Float`/`Str`/`List`/`Map` — the shapes JSON
/// itself can carry.
pub fn from_json(json: &JsonValue) -> GValue {
    match json {
        JsonValue::Null => GValue::Null,
        JsonValue::Bool(b) => GValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                GValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                GValue::Float(f)
            } else {
                GValue::Float(0.0)
            }
        }
        JsonValue::String(s) => GValue::Str(s.clone()),
        JsonValue::Array(arr) => GValue::List(arr.iter().map(from_json).collect()),
        JsonValue::Object(obj) => {
            let entries: Vec<MapEntry> = obj.iter().map(|(k, v)| MapEntry::new(k.clone(), from_json(v))).collect();
            GValue::Map(entries)
        }
    }
}

/// Convert a [`GValue`] to JSON, tagging the shapes JSON can't natively
/// express.
pub fn to_json(gv: &GValue) -> JsonValue {
    match gv {
        GValue::Null => JsonValue::Null,
        GValue::Bool(b) => JsonValue::Bool(*b),
        GValue::Int(n) => JsonValue::Number(Number::from(*n)),
        GValue::Float(f) => Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        GValue::Str(s) => JsonValue::String(s.clone()),
        GValue::Bytes(data) => {
            use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
            JsonValue::String(BASE64.encode(data))
        }
        GValue::Time(t) => JsonValue::String(t.to_rfc3339()),
        GValue::Id(ref_id) => {
            if ref_id.prefix.is_empty() {
                JsonValue::String(format!("^{}", ref_id.value))
            } else {
                JsonValue::String(format!("^{}:{}", ref_id.prefix, ref_id.value))
            }
        }
        GValue::List(items) => JsonValue::Array(items.iter().map(to_json).collect()),
        GValue::Map(entries) => {
            let mut map = Map::new();
            for entry in entries {
                map.insert(entry.key.clone(), to_json(&entry.value));
            }
            JsonValue::Object(map)
        }
        GValue::Struct(s) => {
            let mut map = Map::new();
            for field in &s.fields {
                map.insert(field.key.clone(), to_json(&field.value));
            }
            map.insert("_type".to_string(), JsonValue::String(s.type_name.clone()));
            JsonValue::Object(map)
        }
        GValue::Sum(s) => {
            let mut map = Map::new();
            map.insert("_tag".to_string(), JsonValue::String(s.tag.clone()));
            map.insert("_value".to_string(), to_json(&s.inner));
            JsonValue::Object(map)
        }
        GValue::Blob(b) => {
            let mut map = Map::new();
            map.insert("_blob".to_string(), JsonValue::Bool(true));
            map.insert("cid".to_string(), JsonValue::String(b.cid.clone()));
            map.insert("mime".to_string(), JsonValue::String(b.mime.clone()));
            map.insert("bytes".to_string(), JsonValue::Number(Number::from(b.bytes)));
            if let Some(name) = &b.name {
                map.insert("name".to_string(), JsonValue::String(name.clone()));
            }
            if let Some(caption) = &b.caption {
                map.insert("caption".to_string(), JsonValue::String(caption.clone()));
            }
            JsonValue::Object(map)
        }
        GValue::PoolRef(p) => JsonValue::String(format!("^{}:{}", p.pool_id, p.index)),
    }
}

/// Parse a JSON string straight to a [`GValue`].
pub fn parse_json(json_str: &str) -> Result<GValue> {
    let json: JsonValue = serde_json::from_str(json_str)?;
    Ok(from_json(&json))
}

/// Stringify a [`GValue`] as compact JSON.
pub fn stringify_json(gv: &GValue) -> String {
    serde_json::to_string(&to_json(gv)).unwrap_or_default()
}

/// Stringify a [`GValue`] as pretty-printed JSON.
pub fn stringify_json_pretty(gv: &GValue) -> String {
    serde_json::to_string_pretty(&to_json(gv)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_null() {
        let gv = from_json(&json!(null));
        assert!(gv.is_null());
    }

    #[test]
    fn from_json_bool() {
        let gv = from_json(&json!(true));
        assert_eq!(gv.as_bool(), Some(true));
    }

    #[test]
    fn from_json_int() {
        let gv = from_json(&json!(42));
        assert_eq!(gv.as_int(), Some(42));
    }

    #[test]
    fn from_json_float() {
        let gv = from_json(&json!(3.14));
        assert_eq!(gv.as_float(), Some(3.14));
    }

    #[test]
    fn from_json_string() {
        let gv = from_json(&json!("hello"));
        assert_eq!(gv.as_str(), Some("hello"));
    }

    #[test]
    fn from_json_array() {
        let gv = from_json(&json!([1, 2, 3]));
        assert!(gv.is_list());
        assert_eq!(gv.as_list().unwrap().len(), 3);
    }

    #[test]
    fn from_json_object() {
        let gv = from_json(&json!({"a": 1, "b": 2}));
        assert!(gv.is_map());
        assert_eq!(gv.get("a").and_then(|v| v.as_int()), Some(1));
    }

    #[test]
    fn duplicate_keys_resolve_last_write_wins() {
        // serde_json's own parser already collapses duplicate object keys
        // to the last value seen before `from_json` ever runs.
        let gv = parse_json(r#"{"a": 1, "a": 2}"#).unwrap();
        assert_eq!(gv.get("a").and_then(|v| v.as_int()), Some(2));
        assert_eq!(gv.as_map().unwrap().len(), 1);
    }

    #[test]
    fn roundtrip_scalar_and_container_shapes() {
        let original = json!({
            "name": "Alice",
            "age": 30,
            "active": true,
            "scores": [95, 87, 92]
        });
        let gv = from_json(&original);
        let restored = to_json(&gv);
        assert_eq!(original, restored);
    }

    #[test]
    fn struct_and_sum_round_trip_their_tags() {
        let sv = GValue::struct_val("Match", vec![field("p1", GValue::int(1))]);
        let json = to_json(&sv);
        assert_eq!(json.get("_type").and_then(|v| v.as_str()), Some("Match"));
        assert_eq!(json.get("p1").and_then(|v| v.as_i64()), Some(1));

        let sum = GValue::sum("Ok", GValue::int(7));
        let json = to_json(&sum);
        assert_eq!(json.get("_tag").and_then(|v| v.as_str()), Some("Ok"));
        assert_eq!(json.get("_value").and_then(|v| v.as_i64()), Some(7));
    }

    #[test]
    fn blob_and_pool_ref_are_tagged() {
        let blob = GValue::blob(BlobRef::new("sha256:abc", "image/png", 1024));
        let json = to_json(&blob);
        assert_eq!(json.get("_blob").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(json.get("cid").and_then(|v| v.as_str()), Some("sha256:abc"));

        let pr = GValue::pool_ref("S1", 7);
        assert_eq!(to_json(&pr), JsonValue::String("^S1:7".to_string()));
    }
}
