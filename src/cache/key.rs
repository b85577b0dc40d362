//! Cache key generation.
//!
//! Keys are the SHA-256 of the payload's canonical JSON: objects are re-serialized
//! with recursively sorted member names and no insignificant whitespace, so logically
//! equal payloads hash identically whatever their field insertion order.
//!
//! These keys do not match entries written by services that hash
//! `json.dumps(payload, sort_keys=True)` (spaced separators) with MD5. When such a
//! service shares the Redis database, give this cache its own `key_prefix` so the
//! two key spaces never overlap and nobody expects cross-service hits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Serialize `value` with recursively sorted object keys and compact separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&str, &Value> = map.iter().map(|(k, v)| (k.as_str(), v)).collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.to_string()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Turns request payloads into cache keys, optionally namespaced by a prefix.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    prefix: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn generate(&self, payload: &Value) -> CacheKey {
        let digest = Sha256::digest(canonical_json(payload).as_bytes());
        let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        match self.prefix {
            Some(ref p) => CacheKey::new(format!("{}{}", p, hash)),
            None => CacheKey::new(hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let v = json!({"b": 1, "a": {"z": [ {"y": 2, "x": 1} ], "c": null}});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":{"c":null,"z":[{"x":1,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_json_escapes_keys_and_keeps_unicode() {
        let v = json!({"k\"ey": "王皓"});
        assert_eq!(canonical_json(&v), "{\"k\\\"ey\":\"王皓\"}");
    }

    #[test]
    fn test_key_is_order_independent() {
        let gen = CacheKeyGenerator::new();
        let a: Value = serde_json::from_str(r#"{"task":"parse","text":"hi","model":"m"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"model":"m","text":"hi","task":"parse"}"#).unwrap();
        assert_eq!(gen.generate(&a), gen.generate(&b));
        assert_ne!(gen.generate(&a), gen.generate(&json!({"task": "parse", "text": "ho", "model": "m"})));
    }

    #[test]
    fn test_key_is_stable_sha256_hex() {
        let key = CacheKeyGenerator::new().generate(&json!({}));
        // sha256("{}")
        assert_eq!(
            key.as_str(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_keys_are_compact_sha256_not_spaced_md5() {
        let v = json!({"b": [1, 2], "a": 1});
        assert_eq!(canonical_json(&v), r#"{"a":1,"b":[1,2]}"#);
        let key = CacheKeyGenerator::new().generate(&v);
        assert_eq!(
            key.as_str(),
            "8baa73198470c7bb4c3ce142a8fd651affc0310d878bb9bd159e37a573fb4874"
        );
        // md5 of `{"a": 1, "b": [1, 2]}`
        assert_ne!(key.as_str(), "cbe6d9b0738a709682fdb630e2a68250");
    }

    #[test]
    fn test_prefix() {
        let key = CacheKeyGenerator::new().with_prefix("ai:").generate(&json!({}));
        assert!(key.as_str().starts_with("ai:44136fa3"));
        assert_eq!(key.as_str().len(), 3 + 64);
    }
}
