//! Plain data shapes passed between the backends, the cache and the builder.
//! Records are produced once by a backend (or the cache) and never mutated
//! afterwards, so everything here is a light-weight holder with lookups.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field names every backend fills in, empty when the source has no value.
pub const STANDARD_FIELDS: &[&str] = &[
    "type",
    "title",
    "author",
    "date",
    "publication",
    "volume",
    "issue",
    "pages",
    "publisher",
    "doi",
    "isbn",
    "url",
    "abstract",
    "language",
    "notes",
    "tags",
];

/// Label and value of the "no filter" entry in the collection listing.
pub const ALL_COLLECTIONS: &str = "<all>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One parsed bibliographic entry.
pub struct Record {
    /// Citation key, either the BibTeX cite key or one generated from the key
    /// format template.
    pub key: String,
    /// Named attributes such as `type`, `title` or `author`.
    pub fields: BTreeMap<String, String>,
    /// Collection names in first-seen order, without duplicates.
    pub collections: Vec<String>,
    /// Attachment path, empty when the entry has none.
    pub file: String,
    /// Full citation string.
    pub combined: String,
}

impl Record {
    /// Start a record with every standard field present and empty.
    pub fn new(key: impl Into<String>) -> Self {
        let fields = STANDARD_FIELDS
            .iter()
            .map(|name| (name.to_string(), String::new()))
            .collect();
        Self {
            key: key.into(),
            fields,
            collections: Vec::new(),
            file: String::new(),
            combined: String::new(),
        }
    }

    /// Insert or overwrite one named attribute. Backends call this while the
    /// record is being assembled; afterwards the record is treated as frozen.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Add a collection unless the record already belongs to it.
    pub fn add_collection(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.collections.contains(&name) {
            self.collections.push(name);
        }
    }

    /// Exact, case-sensitive membership test used by the collection filter.
    pub fn in_collection(&self, name: &str) -> bool {
        self.collections.iter().any(|c| c == name)
    }

    /// Resolve an attribute by name. `key`, `file`, `combined` and
    /// `collections` come from the dedicated members, anything else from the
    /// field map.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "key" => Some(self.key.clone()),
            "file" => Some(self.file.clone()),
            "combined" => Some(self.combined.clone()),
            "collections" => Some(self.collections.join(", ")),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Every searchable value: the key plus all field values.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.fields.values().map(String::as_str))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Row handed to the picker for the "citation" source.
pub struct OutputRow {
    /// Value of the configured source field. This is what the picker hands
    /// back to the host when the row is chosen.
    pub field: String,
    /// Human-readable label, rendered from the description template with the
    /// source field bracketed.
    pub description: String,
    /// Attachment path, empty when the record has none.
    pub file: String,
    /// Full citation string, shown as a preview.
    pub combined: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Row handed to the picker for the "citation_collection" source.
pub struct CollectionEntry {
    /// Text shown in the picker.
    pub label: String,
    /// Text fed back as the collection filter when the entry is chosen. Equal
    /// to the label today; kept separate so the sentinel can differ later.
    pub value: String,
}

impl CollectionEntry {
    /// Build an entry from any string-like label and value.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Sentinel entry meaning "no collection filter".
    pub fn all() -> Self {
        Self::new(ALL_COLLECTIONS, ALL_COLLECTIONS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of one build, depending on the requested source.
pub enum Source {
    /// One row per record, in backend order.
    Citations(Vec<OutputRow>),
    /// The "all" sentinel followed by every collection name.
    Collections(Vec<CollectionEntry>),
}

impl Source {
    /// Number of rows or entries, whichever the source holds.
    pub fn len(&self) -> usize {
        match self {
            Source::Citations(rows) => rows.len(),
            Source::Collections(entries) => entries.len(),
        }
    }

    /// True when the build produced nothing to pick from.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_has_standard_fields() {
        let record = Record::new("Smith2020");
        for name in STANDARD_FIELDS {
            assert_eq!(record.field(name), Some(String::new()), "{name}");
        }
        assert_eq!(record.field("key").as_deref(), Some("Smith2020"));
        assert_eq!(record.field("nonsense"), None);
    }

    #[test]
    fn test_collections_are_deduplicated_in_order() {
        let mut record = Record::new("k");
        record.add_collection("B");
        record.add_collection("A");
        record.add_collection("B");
        assert_eq!(record.collections, vec!["B", "A"]);
        assert!(record.in_collection("A"));
        assert!(!record.in_collection("C"));
        assert_eq!(record.field("collections").as_deref(), Some("B, A"));
    }
}
