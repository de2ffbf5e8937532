//! Content-hash manifests.
//!
//! A manifest maps resource keys (paths relative to the origin) to opaque
//! fingerprints produced by the build step. Fingerprints are only ever
//! compared for equality.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reserved resource key for the root document.
pub const ROOT_KEY: &str = "/";

/// A flat mapping of resource key to fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    resources: BTreeMap<String, String>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a manifest from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object of strings.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the manifest to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Loads a manifest from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_json(&bytes)
    }

    /// Returns the fingerprint recorded for `key`.
    #[must_use]
    pub fn fingerprint(&self, key: &str) -> Option<&str> {
        self.resources.get(key).map(String::as_str)
    }

    /// Returns true if the manifest declares `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    /// Returns true if `key` is declared here with the same fingerprint as in
    /// `previous`.
    #[must_use]
    pub fn unchanged_since(&self, previous: &Self, key: &str) -> bool {
        match (self.fingerprint(key), previous.fingerprint(key)) {
            (Some(current), Some(old)) => current == old,
            _ => false,
        }
    }

    /// Iterates over declared resource keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Adds or replaces a resource, returning the manifest for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        self.insert(key, fingerprint);
        self
    }

    /// Adds or replaces a resource.
    pub fn insert(&mut self, key: impl Into<String>, fingerprint: impl Into<String>) {
        self.resources.insert(key.into(), fingerprint.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            resources: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_json() {
        let json = br#"{"main.dart.js": "e705", "/": "ac6d", "index.html": "ac6d"}"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest.fingerprint(ROOT_KEY), Some("ac6d"));
        assert!(manifest.contains("main.dart.js"));
        assert!(!manifest.contains("missing.js"));
    }

    #[test]
    fn rejects_nested_values() {
        assert!(Manifest::from_json(br#"{"a.js": {"hash": "x"}}"#).is_err());
        assert!(Manifest::from_json(b"[]").is_err());
    }

    #[test]
    fn json_is_flat_object() {
        let manifest = Manifest::new().with("a.js", "h1");
        assert_eq!(manifest.to_json().unwrap(), br#"{"a.js":"h1"}"#);
    }

    #[test]
    fn unchanged_since_requires_both_sides() {
        let old = Manifest::new().with("a.js", "h0").with("b.js", "h2");
        let new = Manifest::new().with("a.js", "h1").with("b.js", "h2").with("c.js", "h3");

        assert!(!new.unchanged_since(&old, "a.js"));
        assert!(new.unchanged_since(&old, "b.js"));
        assert!(!new.unchanged_since(&old, "c.js"));
        assert!(!new.unchanged_since(&old, "gone.js"));
    }

    #[test]
    fn keys_are_sorted() {
        let manifest: Manifest = [("b.js", "2"), ("/", "0"), ("a.js", "1")].into_iter().collect();
        assert_eq!(manifest.keys().collect::<Vec<_>>(), vec!["/", "a.js", "b.js"]);
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, br#"{"/": "h0"}"#).unwrap();

        let manifest = Manifest::load(&path).await.unwrap();
        assert_eq!(manifest.fingerprint("/"), Some("h0"));
    }
}
