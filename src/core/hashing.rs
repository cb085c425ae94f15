//! Normalization and hashing shared by the cache, history store and audit sink.

use sha2::{Digest, Sha256};

/// Lowercases and collapses internal whitespace so that
/// `"Show  REVENUE  by region"` and `"show revenue by region"` hash identically
/// (spec.md §8, cache key stability law).
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// SHA-256 hex digest of the normalized query text. Used as the cache key and
/// the query-history `query_hash`.
pub fn query_hash(query: &str) -> String {
    hex_sha256(normalize_query(query).as_bytes())
}

/// Canonicalizes an arbitrary JSON value (stable key ordering) before hashing,
/// so `AuditRecord` hashes depend only on canonicalized content (spec.md §3/§8).
pub fn canonicalize_and_hash(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value);
    hex_sha256(canonical.to_string().as_bytes())
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            serde_json::Value::Object(sorted)
        },
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        },
        other => other.clone(),
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize_query("Show  REVENUE  by region"),
            normalize_query("show revenue by region")
        );
    }

    #[test]
    fn query_hash_is_stable_across_equivalent_input() {
        assert_eq!(
            query_hash("Show  REVENUE  by region"),
            query_hash("show revenue by region")
        );
    }

    #[test]
    fn canonicalize_and_hash_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonicalize_and_hash(&a), canonicalize_and_hash(&b));
    }
}
