#![forbid(unsafe_code)]

//! Host element properties and their diffs.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single host property value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Ordered property map of a host element.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Props(BTreeMap<String, PropValue>);

impl Props {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PropValue>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Apply a diff in place.
    pub fn apply(&mut self, diff: &PropDiff) {
        for change in &diff.changes {
            match &change.value {
                Some(value) => {
                    self.0.insert(change.name.clone(), value.clone());
                }
                None => {
                    self.0.remove(&change.name);
                }
            }
        }
    }
}

impl<K: Into<String>, V: Into<PropValue>> FromIterator<(K, V)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One changed property. `value: None` means the property was removed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PropChange {
    pub name: String,
    pub value: Option<PropValue>,
}

/// The minimal set of property changes between two renders.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PropDiff {
    pub changes: Vec<PropChange>,
}

impl PropDiff {
    /// Diff `old` against `new`; `None` when they are equal.
    #[must_use]
    pub fn between(old: &Props, new: &Props) -> Option<Self> {
        let mut changes = Vec::new();
        for (name, value) in &old.0 {
            if !new.0.contains_key(name) {
                changes.push(PropChange {
                    name: name.clone(),
                    value: None,
                });
            } else if new.0.get(name) != Some(value) {
                changes.push(PropChange {
                    name: name.clone(),
                    value: new.0.get(name).cloned(),
                });
            }
        }
        for (name, value) in &new.0 {
            if !old.0.contains_key(name) {
                changes.push(PropChange {
                    name: name.clone(),
                    value: Some(value.clone()),
                });
            }
        }
        if changes.is_empty() {
            return None;
        }
        changes.sort_by(|a, b| a.name.cmp(&b.name));
        Some(Self { changes })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
