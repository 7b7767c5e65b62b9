//! Content fingerprints for change detection
//!
//! A [`ContentHash`] is computed over a canonical JSON rendering of a value:
//! object keys sorted recursively, no insignificant whitespace. Two values that
//! serialize to the same JSON tree therefore hash identically no matter how
//! they were built.

use crate::error::Result;
use ferrum_catalog_models::CatalogEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

const PREFIX: &str = "sha256:";
const DIGEST_CHARS: usize = 16;

/// Fixed-length fingerprint (`sha256:` + 16 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash any serializable value.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(Self::of_value(&value))
    }

    pub fn of_value(value: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(value, &mut canonical);

        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(DIGEST_CHARS);
        Self(format!("{}{}", PREFIX, hex))
    }

    pub fn of_entry(entry: &CatalogEntry) -> Result<Self> {
        Self::of(entry)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn hash_has_fixed_shape() {
        let hash = ContentHash::of_value(&json!({ "name": "Patient" }));
        assert!(hash.as_str().starts_with("sha256:"));
        assert_eq!(hash.as_str().len(), PREFIX.len() + DIGEST_CHARS);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = serde_json::from_str::<Value>(r#"{"a":1,"b":{"x":[1,2],"y":null}}"#).unwrap();
        let b = serde_json::from_str::<Value>(r#"{"b":{"y":null,"x":[1,2]},"a":1}"#).unwrap();
        assert_eq!(ContentHash::of_value(&a), ContentHash::of_value(&b));
    }

    #[test]
    fn map_construction_order_does_not_matter() {
        let mut forward = HashMap::new();
        let mut backward = HashMap::new();
        for i in 0..32 {
            forward.insert(format!("k{}", i), i);
        }
        for i in (0..32).rev() {
            backward.insert(format!("k{}", i), i);
        }
        let sorted: BTreeMap<_, _> = forward.clone().into_iter().collect();

        let h1 = ContentHash::of(&forward).unwrap();
        assert_eq!(h1, ContentHash::of(&backward).unwrap());
        assert_eq!(h1, ContentHash::of(&sorted).unwrap());
    }

    #[test]
    fn array_order_matters() {
        assert_ne!(
            ContentHash::of_value(&json!([1, 2])),
            ContentHash::of_value(&json!([2, 1]))
        );
    }

    #[test]
    fn survives_serialization_round_trip() {
        let value = json!({ "path": "Patient.name", "max": "*", "types": ["HumanName"] });
        let reparsed: Value = serde_json::from_str(&serde_json::to_string_pretty(&value).unwrap()).unwrap();
        assert_eq!(ContentHash::of_value(&value), ContentHash::of_value(&reparsed));
    }
}
