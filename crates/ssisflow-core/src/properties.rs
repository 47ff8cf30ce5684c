//! Ordered string property bag
//!
//! Package properties arrive as untyped strings. They are stored verbatim and
//! only interpreted through the typed accessors below, which parse on every
//! read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String to string property map with deterministic ordering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, String>);

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert only when the key is not present yet
    pub fn insert_missing(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Raw text, with empty values treated as absent
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Boolean in any of the spellings packages use (`True`, `-1`, `1`)
    pub fn flag(&self, key: &str) -> Option<bool> {
        let raw = self.0.get(key)?.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" | "-1" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// Boolean with a default for absent or unparseable values
    pub fn flag_or(&self, key: &str, default: bool) -> bool {
        self.flag(key).unwrap_or(default)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.0.get(key)?.trim().parse().ok()
    }

    /// Case-insensitive key lookup
    pub fn text_ignore_case(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Mutable access to every value, used by redaction
    pub fn values_mut(&mut self) -> impl Iterator<Item = (&str, &mut String)> {
        self.0.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
