//! Canonical label sets identifying a single time series.
//!
//! A [`LabelSet`] is a list of `(name, value)` pairs kept sorted by name, so
//! two sets built from the same pairs in different orders compare and hash
//! identically. This is the key the [`SeriesRegistry`](crate::series::SeriesRegistry)
//! resolves to a [`SeriesRef`](crate::series::SeriesRef).
//!
//! # Example
//!
//! ```rust
//! use fanout::labels::LabelSet;
//!
//! let a = LabelSet::from([("job", "api"), ("instance", "web1")]);
//! let b = LabelSet::from([("instance", "web1"), ("job", "api")]);
//!
//! assert_eq!(a, b);
//! assert_eq!(a.get("job"), Some("api"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonicalized identity of one time series.
///
/// Pairs are sorted by name, ties broken by value, at construction time.
/// The set is immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelSet {
    labels: Vec<(String, String)>,
}

impl LabelSet {
    /// Creates a label set from arbitrary-order pairs.
    pub fn new<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<(String, String)> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        labels.sort();
        Self { labels }
    }

    /// Returns an empty label set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the value of the first label with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the canonical (sorted) pairs.
    pub fn as_slice(&self) -> &[(String, String)] {
        &self.labels
    }

    /// Iterates over `(name, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if the set has no pairs.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns a new set with `extra` merged in. Existing names win.
    #[must_use]
    pub fn merged(&self, extra: &[(String, String)]) -> Self {
        let mut labels = self.labels.clone();
        for (k, v) in extra {
            if self.get(k).is_none() {
                labels.push((k.clone(), v.clone()));
            }
        }
        labels.sort();
        Self { labels }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(labels: [(K, V); N]) -> Self {
        Self::new(labels)
    }
}

impl From<Vec<(String, String)>> for LabelSet {
    fn from(labels: Vec<(String, String)>) -> Self {
        Self::new(labels)
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(labels: BTreeMap<String, String>) -> Self {
        Self::new(labels)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v:?}")?;
        }
        f.write_str("}")
    }
}

// Serialized as a JSON object; accepts either an object or a list of pairs.
impl Serialize for LabelSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelSetRepr {
    Map(BTreeMap<String, String>),
    Pairs(Vec<(String, String)>),
}

impl<'de> Deserialize<'de> for LabelSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match LabelSetRepr::deserialize(deserializer)? {
            LabelSetRepr::Map(map) => Self::from(map),
            LabelSetRepr::Pairs(pairs) => Self::from(pairs),
        })
    }
}
