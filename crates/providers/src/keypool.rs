//! Credential rotation for the cloud backend.
//!
//! The configured credential may hold several comma-separated API keys
//! so daily quotas spread across a pool. Selection is uniformly random
//! per call; successive calls hitting different upstream quotas is the
//! intended load-spreading behavior.

use rand::seq::SliceRandom;

/// Pick one key from a possibly comma-delimited credential string.
///
/// Without a comma the whole string is returned unchanged, including
/// when it is empty: surfacing the configuration error is the
/// caller's job, not this selector's.
pub fn select_key(raw: &str) -> &str {
    if !raw.contains(',') {
        return raw;
    }
    let keys: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();
    keys.choose(&mut rand::thread_rng()).copied().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn single_key_passes_through() {
        for _ in 0..100 {
            assert_eq!(select_key("solo"), "solo");
        }
        assert_eq!(select_key(""), "");
    }

    #[test]
    fn all_pool_entries_get_selected() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            seen.insert(select_key("a,b,c").to_string());
        }
        assert_eq!(
            seen,
            ["a", "b", "c"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn entries_are_trimmed_and_empties_dropped() {
        for _ in 0..50 {
            let key = select_key(" alpha , ,beta,");
            assert!(key == "alpha" || key == "beta", "got {key:?}");
        }
    }

    #[test]
    fn all_empty_pool_yields_empty_key() {
        assert_eq!(select_key(" , ,"), "");
    }
}
