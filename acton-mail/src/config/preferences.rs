//! Application preference snapshots

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Immutable key/value preference table
///
/// Holds SMTP settings (`smtp_server`, `smtp_port`, `smtp_user`, `smtp_password`,
/// `smtp_encryption`, `smtp_from_email`, `smtp_from_name`) alongside any other
/// application preferences. Templates see the whole table as `preference_map`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences(BTreeMap<String, String>);

impl Preferences {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this table with `key` set to `value`
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Set a value
    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    /// Look up a value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a value, treating an empty string as absent
    #[must_use]
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Preferences {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Publishes the current [`Preferences`] snapshot
///
/// The application owns the store and replaces the snapshot whenever preferences
/// are saved. Readers get an `Arc` to an immutable table, so a job keeps seeing the
/// values it started with even if the store changes mid-flight.
#[derive(Debug, Clone, Default)]
pub struct PreferenceStore {
    current: Arc<RwLock<Arc<Preferences>>>,
}

impl PreferenceStore {
    /// Create a store publishing `initial`
    #[must_use]
    pub fn new(initial: Preferences) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<Preferences> {
        Arc::clone(&self.current.read())
    }

    /// Publish a new snapshot
    pub fn replace(&self, preferences: Preferences) {
        *self.current.write() = Arc::new(preferences);
        tracing::debug!("Mail preferences replaced");
    }

    /// Publish a modified copy of the current snapshot
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Preferences),
    {
        let mut guard = self.current.write();
        let mut next = Preferences::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_lookup() {
        let prefs = Preferences::new()
            .with("smtp_server", "mail.example.com")
            .with("smtp_user", "");

        assert_eq!(prefs.get("smtp_server"), Some("mail.example.com"));
        assert_eq!(prefs.get("smtp_user"), Some(""));
        assert_eq!(prefs.get_non_empty("smtp_user"), None);
        assert_eq!(prefs.get("missing"), None);
        assert_eq!(prefs.len(), 2);
    }

    #[test]
    fn test_preferences_from_iter() {
        let prefs: Preferences = [("a", "1"), ("b", "2")].into_iter().collect();
        let keys: Vec<&str> = prefs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let store = PreferenceStore::new(Preferences::new().with("smtp_port", "25"));
        let before = store.snapshot();

        store.replace(Preferences::new().with("smtp_port", "587"));

        assert_eq!(before.get("smtp_port"), Some("25"));
        assert_eq!(store.snapshot().get("smtp_port"), Some("587"));
    }

    #[test]
    fn test_update_copies_on_write() {
        let store = PreferenceStore::new(Preferences::new().with("smtp_server", "a"));
        let before = store.snapshot();

        store.update(|prefs| prefs.set("smtp_server", "b"));

        assert_eq!(before.get("smtp_server"), Some("a"));
        assert_eq!(store.snapshot().get("smtp_server"), Some("b"));
    }
}
