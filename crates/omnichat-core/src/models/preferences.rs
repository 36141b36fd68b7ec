//! Three-layer preference model.
//!
//! For every preference key up to three candidate values may exist:
//! the built-in default, the last server-confirmed value, and a pending
//! local edit. The effective value is `pending ?? server ?? default`.
//! A key is dirty iff its pending value differs from what the user would
//! see without it, so reverting an edit removes it from the dirty set
//! instead of re-submitting it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Preference values are plain structured data; no binary formats.
pub type PreferenceValue = serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceLayers {
    pub defaults: BTreeMap<String, PreferenceValue>,
    pub server: BTreeMap<String, PreferenceValue>,
    pub pending: BTreeMap<String, PreferenceValue>,
}

/// Pure merge of the three layers: the effective view plus the dirty set.
///
/// Independently unit-testable; no I/O. The store calls this after every
/// layer mutation and caches the result.
pub fn merge_layers(
    layers: &PreferenceLayers,
) -> (BTreeMap<String, PreferenceValue>, BTreeSet<String>) {
    let mut effective = layers.defaults.clone();
    for (key, value) in &layers.server {
        effective.insert(key.clone(), value.clone());
    }

    let mut dirty = BTreeSet::new();
    for (key, pending) in &layers.pending {
        let confirmed = layers.server.get(key).or_else(|| layers.defaults.get(key));
        if confirmed != Some(pending) {
            dirty.insert(key.clone());
        }
        effective.insert(key.clone(), pending.clone());
    }

    (effective, dirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layers(
        defaults: &[(&str, PreferenceValue)],
        server: &[(&str, PreferenceValue)],
        pending: &[(&str, PreferenceValue)],
    ) -> PreferenceLayers {
        let to_map = |items: &[(&str, PreferenceValue)]| {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        };
        PreferenceLayers {
            defaults: to_map(defaults),
            server: to_map(server),
            pending: to_map(pending),
        }
    }

    #[test]
    fn effective_prefers_pending_then_server_then_default() {
        let l = layers(
            &[("theme", json!("light")), ("lang", json!("en"))],
            &[("theme", json!("dark"))],
            &[("lang", json!("de"))],
        );
        let (effective, _) = merge_layers(&l);
        assert_eq!(effective["theme"], json!("dark"));
        assert_eq!(effective["lang"], json!("de"));
    }

    #[test]
    fn edit_away_from_server_value_is_dirty() {
        let l = layers(
            &[("theme", json!("A"))],
            &[("theme", json!("B"))],
            &[("theme", json!("C"))],
        );
        let (_, dirty) = merge_layers(&l);
        assert!(dirty.contains("theme"));
    }

    #[test]
    fn revert_to_server_value_clears_dirty() {
        let l = layers(
            &[("theme", json!("A"))],
            &[("theme", json!("B"))],
            &[("theme", json!("B"))],
        );
        let (effective, dirty) = merge_layers(&l);
        assert!(dirty.is_empty());
        assert_eq!(effective["theme"], json!("B"));
    }

    #[test]
    fn revert_to_default_without_server_value_clears_dirty() {
        let l = layers(
            &[("theme", json!("A"))],
            &[],
            &[("theme", json!("A"))],
        );
        let (_, dirty) = merge_layers(&l);
        assert!(dirty.is_empty());
    }

    #[test]
    fn unknown_key_edit_is_dirty() {
        let l = layers(&[], &[], &[("beta_features", json!(true))]);
        let (effective, dirty) = merge_layers(&l);
        assert!(dirty.contains("beta_features"));
        assert_eq!(effective["beta_features"], json!(true));
    }
}
