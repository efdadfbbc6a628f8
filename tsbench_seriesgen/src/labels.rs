//! Sorted label sets and the stable hashing used to seed series generators.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    hash::Hasher,
};

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Separates name and value bytes when hashing, so that `{a="bc"}` and `{ab="c"}` differ.
const SEP: u8 = 0xff;

/// Separates a series' own labels from the block's external labels when deriving a seed.
const EXTERNAL_SEP: u8 = 0xfe;

/// A single `name="value"` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A set of labels, kept sorted by name with unique names.
///
/// Serializes as a plain `name: value` map, which is the shape used in block specs and in block
/// metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Build a label set from arbitrary pairs. When a name repeats, the last value wins.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_map(map)
    }

    /// Convert from the map representation used by configuration and metadata.
    ///
    /// A [`BTreeMap`] is already ordered and unique by key, so this moves the strings over
    /// without sorting or copying them.
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(
            map.into_iter()
                .map(|(name, value)| Label { name, value })
                .collect(),
        )
    }

    /// Convert into the map representation used by configuration and metadata.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect()
    }

    /// Return a copy of this set with `name` set to `value`, replacing any existing value.
    pub fn with_label(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let label = Label::new(name, value);
        let mut labels = self.0.clone();
        match labels.binary_search_by(|l| l.name.as_str().cmp(label.name.as_str())) {
            Ok(i) => labels[i] = label,
            Err(i) => labels.insert(i, label),
        }
        Self(labels)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn write_to(&self, hasher: &mut XxHash64) {
        for label in &self.0 {
            hasher.write(label.name.as_bytes());
            hasher.write(&[SEP]);
            hasher.write(label.value.as_bytes());
            hasher.write(&[SEP]);
        }
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::from_map(map)
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(labels: Labels) -> Self {
        labels
            .0
            .into_iter()
            .map(|Label { name, value }| (name, value))
            .collect()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// Derive the PRNG seed for one series.
///
/// The seed depends only on the series' full label set and the external labels of the block it is
/// generated for, never on which worker generates it or when.
pub fn series_seed(labels: &Labels, external_labels: &Labels) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    labels.write_to(&mut hasher);
    hasher.write(&[EXTERNAL_SEP]);
    external_labels.write_to(&mut hasher);
    hasher.finish()
}

/// Check a label name against `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
