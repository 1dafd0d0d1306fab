//! Backend parsers that turn a data source into the full record collection.
//! The builder only talks to the [`Backend`] trait; [`for_settings`] picks the
//! implementation from the configured mode.

mod bibtex;
mod zotero;

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::{Mode, Settings};
use crate::error::CitationError;
use crate::models::Record;

pub use bibtex::BibtexBackend;
pub use zotero::ZoteroBackend;

/// Failures raised while reading a backend's data source.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to query Zotero database: {what}")]
    Query {
        what: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("unsupported Zotero schema version {0} (expected 4 or 5)")]
    UnsupportedSchema(u32),
    #[error("unknown placeholder \"{0}\" in key format")]
    KeyFormat(String),
}

/// A source of bibliographic records.
pub trait Backend {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The on-disk file whose modification time decides cache staleness.
    fn data_file(&self) -> PathBuf;

    /// Read the whole data source and return every record, in source order.
    fn load(&self) -> Result<Vec<Record>, ParseError>;
}

/// Select the backend for the configured mode.
pub fn for_settings(settings: &Settings) -> Result<Box<dyn Backend>, CitationError> {
    match settings.mode()? {
        Mode::Bibtex => Ok(Box::new(BibtexBackend::new(settings))),
        Mode::Zotero => Ok(Box::new(ZoteroBackend::new(settings))),
    }
}

/// One author or editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Creator {
    /// Given names, possibly empty for institutional authors.
    pub first: String,
    /// Family name; the part shown in author lists and generated keys.
    pub last: String,
}

impl Creator {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
        }
    }
}

/// Render last names as "A", "A and B", "A, B, and C" or "A et al.".
pub(crate) fn format_authors(creators: &[Creator], et_al_limit: usize) -> String {
    let names: Vec<&str> = creators.iter().map(|c| c.last.as_str()).collect();
    match names.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [first, ..] if names.len() > et_al_limit => format!("{first} et al."),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

/// First run of four digits, which is the year in every date layout we see.
pub(crate) fn year_of(date: &str) -> String {
    let bytes = date.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|start| date[start..start + 4].to_string())
        .unwrap_or_default()
}

/// Words skipped when picking the title word of a generated key.
const TITLE_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "on", "of", "in", "and", "for", "to", "at", "with", "is", "are",
];

fn alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn first_significant_word(title: &str) -> String {
    let words: Vec<String> = title
        .split_whitespace()
        .map(alphanumeric)
        .filter(|w| !w.is_empty())
        .collect();
    words
        .iter()
        .find(|w| !TITLE_STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .or_else(|| words.first())
        .cloned()
        .unwrap_or_default()
}

/// Build a citation key from a template with `{author}`, `{Author}`,
/// `{date}`, `{title}` and `{Title}` placeholders.
pub(crate) fn format_key(
    template: &str,
    first_author: &str,
    date: &str,
    title: &str,
) -> Result<String, ParseError> {
    let author = alphanumeric(first_author).to_lowercase();
    let title = first_significant_word(title).to_lowercase();

    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let name: String = chars.by_ref().take_while(|&ch| ch != '}').collect();
                match name.as_str() {
                    "author" => out.push_str(&author),
                    "Author" => out.push_str(&capitalize(&author)),
                    "date" => out.push_str(date),
                    "title" => out.push_str(&title),
                    "Title" => out.push_str(&capitalize(&title)),
                    _ => return Err(ParseError::KeyFormat(name)),
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Assemble the full citation string from the record's fields.
pub(crate) fn combine(record: &Record) -> String {
    let get = |name: &str| record.fields.get(name).map(String::as_str).unwrap_or("");
    let mut parts: Vec<String> = Vec::new();

    let author = get("author");
    let date = get("date");
    match (author.is_empty(), date.is_empty()) {
        (false, false) => parts.push(format!("{author} ({date}).")),
        (false, true) => parts.push(format!("{author}.")),
        (true, false) => parts.push(format!("({date}).")),
        (true, true) => {}
    }
    if !get("title").is_empty() {
        parts.push(format!("{}.", get("title")));
    }

    let mut venue = get("publication").to_string();
    if !get("volume").is_empty() {
        venue = join_nonempty(&venue, get("volume"), ", ");
        if !get("issue").is_empty() {
            venue.push_str(&format!("({})", get("issue")));
        }
    }
    venue = join_nonempty(&venue, get("pages"), ", ");
    if !venue.is_empty() {
        parts.push(format!("{venue}."));
    }
    if !get("publisher").is_empty() {
        parts.push(format!("{}.", get("publisher")));
    }
    if !get("doi").is_empty() {
        parts.push(format!("doi:{}", get("doi")));
    } else if !get("url").is_empty() {
        parts.push(get("url").to_string());
    }

    parts.join(" ")
}

fn join_nonempty(left: &str, right: &str, sep: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (_, true) => left.to_string(),
        (true, false) => right.to_string(),
        (false, false) => format!("{left}{sep}{right}"),
    }
}

/// Every key must appear, case-insensitively, in the key or some field.
pub(crate) fn matches_search_keys(record: &Record, keys: &[String]) -> bool {
    let haystack: Vec<String> = record.values().map(str::to_lowercase).collect();
    keys.iter().all(|key| {
        let needle = key.to_lowercase();
        haystack.iter().any(|value| value.contains(&needle))
    })
}

/// Give every record of one parse the same attribute names. A field that only
/// some entries carry is added, empty, to the others, so whether a name
/// resolves depends on the configuration and never on which entries exist.
pub(crate) fn share_field_names(records: &mut [Record]) {
    let names: BTreeSet<String> = records
        .iter()
        .flat_map(|record| record.fields.keys().cloned())
        .collect();
    for record in records.iter_mut() {
        for name in &names {
            if !record.fields.contains_key(name) {
                record.set(name.clone(), "");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn creators(lasts: &[&str]) -> Vec<Creator> {
        lasts.iter().map(|last| Creator::new("", *last)).collect()
    }

    #[rstest]
    #[case(&[], 5, "")]
    #[case(&["Smith"], 5, "Smith")]
    #[case(&["Smith", "Doe"], 5, "Smith and Doe")]
    #[case(&["Smith", "Doe", "Roe"], 5, "Smith, Doe, and Roe")]
    #[case(&["Smith", "Doe", "Roe"], 2, "Smith et al.")]
    #[case(&["Smith", "Doe"], 1, "Smith et al.")]
    fn test_format_authors(#[case] lasts: &[&str], #[case] limit: usize, #[case] expected: &str) {
        assert_eq!(format_authors(&creators(lasts), limit), expected);
    }

    #[rstest]
    #[case("2020", "2020")]
    #[case("2020-03-00 2020-03", "2020")]
    #[case("March 1999", "1999")]
    #[case("n.d.", "")]
    fn test_year_of(#[case] date: &str, #[case] expected: &str) {
        assert_eq!(year_of(date), expected);
    }

    #[rstest]
    #[case("{author}{date}{Title}", "smith2020Quantum")]
    #[case("{Author}_{date}_{title}", "Smith_2020_quantum")]
    #[case("{{{author}}}", "{smith}")]
    fn test_format_key(#[case] template: &str, #[case] expected: &str) {
        let key = format_key(template, "Smith", "2020", "The Quantum Theory of X").unwrap();
        assert_eq!(key, expected);
    }

    #[test]
    fn test_format_key_strips_punctuation() {
        let key = format_key("{author}{date}{title}", "O'Neil-Brown", "1999", "On: Things").unwrap();
        assert_eq!(key, "oneilbrown1999things");
    }

    #[test]
    fn test_format_key_unknown_placeholder() {
        let err = format_key("{journal}", "Smith", "2020", "X").unwrap_err();
        assert!(matches!(err, ParseError::KeyFormat(ref name) if name == "journal"));
    }

    #[test]
    fn test_combine_full_citation() {
        let mut record = Record::new("k");
        record.set("author", "Smith and Doe");
        record.set("date", "2020");
        record.set("title", "On X");
        record.set("publication", "Journal of Y");
        record.set("volume", "12");
        record.set("issue", "3");
        record.set("pages", "1-10");
        record.set("doi", "10.1/abc");
        assert_eq!(
            combine(&record),
            "Smith and Doe (2020). On X. Journal of Y, 12(3), 1-10. doi:10.1/abc"
        );
    }

    #[test]
    fn test_combine_sparse_record() {
        let mut record = Record::new("k");
        record.set("title", "Untitled draft");
        record.set("url", "https://example.org");
        assert_eq!(combine(&record), "Untitled draft. https://example.org");
    }

    #[test]
    fn test_search_keys_require_every_key() {
        let mut record = Record::new("Smith2020");
        record.set("title", "Quantum Gravity");
        let keys = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();

        assert!(matches_search_keys(&record, &keys(&["quantum", "smith"])));
        assert!(matches_search_keys(&record, &keys(&[])));
        assert!(!matches_search_keys(&record, &keys(&["quantum", "loop"])));
    }

    #[test]
    fn test_share_field_names_fills_missing_fields() {
        let mut with_edition = Record::new("a");
        with_edition.set("edition", "2nd");
        let mut records = vec![with_edition, Record::new("b")];
        share_field_names(&mut records);

        assert_eq!(records[0].field("edition").as_deref(), Some("2nd"));
        assert_eq!(records[1].field("edition").as_deref(), Some(""));
        assert_eq!(
            records[0].fields.keys().collect::<Vec<_>>(),
            records[1].fields.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_for_settings_rejects_unknown_mode() {
        let settings = Settings {
            mode: "endnote".to_string(),
            ..Settings::default()
        };
        let err = for_settings(&settings).err().unwrap();
        assert!(matches!(err, CitationError::UnknownMode(_)));
    }

    #[test]
    fn test_for_settings_zotero_watches_sqlite_file() {
        let settings = Settings {
            mode: "zotero".to_string(),
            data_path: PathBuf::from("/home/me/Zotero"),
            ..Settings::default()
        };
        let backend = for_settings(&settings).unwrap();
        assert_eq!(backend.name(), "zotero");
        assert_eq!(
            backend.data_file(),
            PathBuf::from("/home/me/Zotero/zotero.sqlite")
        );
    }
}
