//! Helpers for `key=value` lists (agent environment, instance labels).

use crate::{Error, Result};
use std::collections::BTreeMap;

/// Parse a list of `key=value` entries. Keys and values are trimmed; both
/// must be non-empty.
pub fn parse_key_values<S: AsRef<str>>(entries: &[S]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| Error::InvalidKeyValue(entry.to_string()))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(Error::InvalidKeyValue(entry.to_string()));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// Merge two maps; entries of `overrides` win.
pub fn merge_maps(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_values_trims() {
        let map = parse_key_values(&[" team = ci ", "tier=spot"]).unwrap();
        assert_eq!(map.get("team").map(String::as_str), Some("ci"));
        assert_eq!(map.get("tier").map(String::as_str), Some("spot"));
    }

    #[test]
    fn test_parse_key_values_rejects_malformed() {
        assert!(parse_key_values(&["novalue"]).is_err());
        assert!(parse_key_values(&["key="]).is_err());
        assert!(parse_key_values(&["=value"]).is_err());
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = parse_key_values(&["a=1", "b=2"]).unwrap();
        let overrides = parse_key_values(&["b=3", "c=4"]).unwrap();
        let merged = merge_maps(&base, &overrides);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["b"], "3");
    }
}
