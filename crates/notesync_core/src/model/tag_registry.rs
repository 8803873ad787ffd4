//! Tag registry model.
//!
//! # Invariants
//! - Names are trimmed and non-empty.
//! - Uniqueness is case-sensitive; insertion order is preserved for display.

use serde::{Deserialize, Deserializer, Serialize};

/// Ordered set of tag names known to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagRegistry {
    names: Vec<String>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from raw names, dropping blanks and duplicates.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.add(name.as_ref());
        }
        registry
    }

    /// Adds one name. Returns the normalized name when it was newly inserted.
    pub fn add(&mut self, name: &str) -> Option<String> {
        let normalized = normalize_tag_name(name)?;
        if self.contains(normalized.as_str()) {
            return None;
        }
        self.names.push(normalized.clone());
        Some(normalized)
    }

    /// Adds many names and returns the ones that were newly inserted.
    pub fn add_all<I, S>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| self.add(name.as_ref()))
            .collect()
    }

    /// Removes an exact name. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|value| value != name);
        self.names.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|value| value == name)
    }

    /// Set union: keeps this registry's order, then appends unseen names.
    pub fn union(&self, other: &TagRegistry) -> TagRegistry {
        let mut merged = self.clone();
        merged.add_all(other.names());
        merged
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn into_names(self) -> Vec<String> {
        self.names
    }
}

impl<'de> Deserialize<'de> for TagRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_names(names))
    }
}

/// Trims a tag name; blank input yields `None`.
pub fn normalize_tag_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
