// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dimension keys, string interning, and dimension filters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Shared pool of dimension names and values.
///
/// Interning keeps one allocation per distinct string no matter how many
/// records and cells reference it. Equality of interned strings stays
/// structural, so two keys built from different pools still compare equal.
#[derive(Debug, Default)]
pub struct Interner {
    strings: DashSet<Arc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pooled copy of `s`, inserting it on first use.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(&*existing);
        }
        let interned: Arc<str> = Arc::from(s);
        self.strings.insert(interned.clone());
        interned
    }

    /// Number of distinct strings pooled so far.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Ordered tuple of `(name, value)` attributes identifying one aggregation series.
///
/// Pairs are sorted by name; names are unique within a key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DimensionKey(Arc<[(Arc<str>, Arc<str>)]>);

impl DimensionKey {
    /// Builds a key from a dimension map, interning every name and value.
    pub fn from_map(dimensions: &BTreeMap<String, String>, interner: &Interner) -> Self {
        let pairs: Vec<(Arc<str>, Arc<str>)> = dimensions
            .iter()
            .map(|(name, value)| (interner.intern(name), interner.intern(value)))
            .collect();
        Self(pairs.into())
    }

    /// Builds a key from literal pairs without interning. Intended for lookups and tests.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let sorted: BTreeMap<&str, &str> = pairs.into_iter().collect();
        let pairs: Vec<(Arc<str>, Arc<str>)> = sorted
            .into_iter()
            .map(|(name, value)| (Arc::from(name), Arc::from(value)))
            .collect();
        Self(pairs.into())
    }

    /// Value of dimension `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|(n, _)| (**n).cmp(name))
            .ok()
            .map(|i| &*self.0[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (&**n, &**v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps only the named dimensions. Names absent from the key are skipped.
    pub fn project(&self, names: &[String]) -> BTreeMap<String, String> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), v.to_string())))
            .collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }
}

impl fmt::Debug for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

impl Serialize for DimensionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Conjunction of `name ∈ {values}` predicates.
///
/// The empty filter matches every key. A predicate with an empty value set
/// matches nothing. A key lacking a filtered dimension does not match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionFilter(BTreeMap<String, BTreeSet<String>>);

impl DimensionFilter {
    /// The filter matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds the predicate `name ∈ values`, intersecting with any existing predicate on `name`.
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        let name = name.into();
        let merged = match self.0.remove(&name) {
            Some(existing) => existing.intersection(&values).cloned().collect(),
            None => values,
        };
        self.0.insert(name, merged);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn matches(&self, key: &DimensionKey) -> bool {
        self.0.iter().all(|(name, values)| {
            key.get(name)
                .is_some_and(|value| values.contains(value))
        })
    }

    pub fn matches_map(&self, dimensions: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(name, values)| {
            dimensions
                .get(name)
                .is_some_and(|value| values.contains(value))
        })
    }

    /// Conjunction of both filters.
    pub fn and(&self, other: &DimensionFilter) -> DimensionFilter {
        other
            .0
            .iter()
            .fold(self.clone(), |acc, (name, values)| {
                acc.with(name.clone(), values.iter().cloned())
            })
    }

    /// True when no key can match both filters.
    ///
    /// Only detects disjointness on a shared dimension, so `false` means
    /// "may overlap", not "does overlap".
    pub fn is_disjoint(&self, other: &DimensionFilter) -> bool {
        let self_empty = self.0.values().any(BTreeSet::is_empty);
        let other_empty = other.0.values().any(BTreeSet::is_empty);
        if self_empty || other_empty {
            return true;
        }
        self.0.iter().any(|(name, values)| {
            other
                .0
                .get(name)
                .is_some_and(|theirs| values.is_disjoint(theirs))
        })
    }

    /// True when every key matching `self` also matches `other`.
    pub fn implies(&self, other: &DimensionFilter) -> bool {
        other.0.iter().all(|(name, theirs)| {
            self.0
                .get(name)
                .is_some_and(|ours| ours.is_subset(theirs))
        })
    }
}
