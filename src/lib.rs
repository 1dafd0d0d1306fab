//! Turns a BibTeX file or a Zotero database into the flat list of citation
//! rows an interactive picker searches.
//!
//! The host fills a [`Settings`] value and calls [`build_source`]; records are
//! re-used from the on-disk cache while it is newer than the data source.
pub mod backend;
pub mod builder;
pub mod cache;
pub mod config;
pub mod describe;
pub mod error;
pub mod models;
pub mod ui;

pub use backend::{Backend, BibtexBackend, ParseError, ZoteroBackend};
pub use builder::{collection_entries, filter_by_collection, Builder};
pub use cache::{is_current, CacheStore};
pub use config::{Mode, Settings, SourceKind, WrapChars};
pub use describe::{describe, format_positional};
pub use error::{format_trace, CitationError, Result};
pub use models::{CollectionEntry, OutputRow, Record, Source, ALL_COLLECTIONS};

/// Build the picker source for one invocation with the backend picked by
/// `settings.mode`.
pub fn build_source(settings: Settings) -> Result<Source> {
    Builder::new(settings)?.build()
}
