//! Canonical cache keys

use std::collections::BTreeMap;
use std::fmt;

/// Trim, collapse internal whitespace. Idempotent.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// blake3 digest of a query plus its sorted parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key. Parameter order does not matter. The query is hashed
    /// byte for byte, so callers pass the exact text the engines will see.
    pub fn new<I, K, V>(query: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sorted: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(query.len() as u64).to_le_bytes());
        hasher.update(query.as_bytes());
        for (key, value) in &sorted {
            // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }

        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_query("  reset   VPN\tpassword ");
        assert_eq!(once, "reset VPN password");
        assert_eq!(normalize_query(&once), once);
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = CacheKey::new("q", [("top_k", "5"), ("strategy", "rrf")]);
        let b = CacheKey::new("q", [("strategy", "rrf"), ("top_k", "5")]);
        assert_eq!(a, b);
    }

    fn no_params() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_query_case_changes_key() {
        let upper = CacheKey::new("rust AND tokio", no_params());
        let lower = CacheKey::new("rust and tokio", no_params());
        assert_ne!(upper, lower);
    }

    #[test]
    fn test_query_is_hashed_verbatim() {
        let spaced = CacheKey::new(" reset  vpn ", no_params());
        let plain = CacheKey::new("reset vpn", no_params());
        assert_ne!(spaced, plain);
        assert_eq!(CacheKey::new(&normalize_query(" reset  vpn "), no_params()), plain);
    }

    #[test]
    fn test_values_change_key() {
        let a = CacheKey::new("q", [("top_k", "5")]);
        let b = CacheKey::new("q", [("top_k", "6")]);
        let c = CacheKey::new("q", [("top_", "k5")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
