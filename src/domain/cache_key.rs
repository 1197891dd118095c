//! Versioned cache keys.
//!
//! Key format: `{prefix}:v{version}:{k1}:{v1}|{k2}:{v2}...` with params sorted
//! ascending by name. The string is what the remote store persists, so it must
//! stay stable across releases. Bumping `version` moves readers to a disjoint
//! namespace; entries under the old version are left to expire.

use std::collections::BTreeMap;
use std::fmt::Display;

/// Build a cache key from a prefix, parameters and a schema version.
///
/// # Example
/// ```
/// use resilience_kit::make_cache_key;
///
/// let a = make_cache_key("x", [("a", 1), ("b", 2)], 1);
/// let b = make_cache_key("x", [("b", 2), ("a", 1)], 1);
/// assert_eq!(a, b);
/// assert_eq!(a, "x:v1:a:1|b:2");
/// ```
pub fn make_cache_key<I, K, V>(prefix: &str, params: I, version: u32) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Display,
{
    let sorted: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_string()))
        .collect();

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("|");

    format!("{}:v{}:{}", prefix, version, joined)
}
