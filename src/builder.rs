//! Builds the picker source: fetch records from the cache or the backend,
//! filter by collection and turn each record into an output row.

use tracing::{debug, info, instrument};

use crate::backend::{self, Backend};
use crate::cache::CacheStore;
use crate::config::{Settings, SourceKind};
use crate::describe::describe;
use crate::error::{CitationError, Result};
use crate::models::{CollectionEntry, OutputRow, Record, Source};

/// Orchestrates one invocation. Settings and backend are fixed at
/// construction; nothing is retained between builds except the cache file.
pub struct Builder {
    settings: Settings,
    backend: Box<dyn Backend>,
    cache: CacheStore,
}

impl Builder {
    /// Use the backend selected by the configured mode.
    pub fn new(settings: Settings) -> Result<Self> {
        let backend = backend::for_settings(&settings)?;
        Ok(Self::with_backend(settings, backend))
    }

    /// Use an explicit backend, ignoring the configured mode.
    pub fn with_backend(settings: Settings, backend: Box<dyn Backend>) -> Self {
        let cache = CacheStore::new(settings.cache_file());
        Self {
            settings,
            backend,
            cache,
        }
    }

    /// Settings this builder was created with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Produce the rows for the configured source. Any error aborts the whole
    /// build; no partial list is returned.
    #[instrument(skip(self), fields(backend = self.backend.name(), source = %self.settings.source))]
    pub fn build(&self) -> Result<Source> {
        match self.settings.source_kind()? {
            SourceKind::CitationCollection => Ok(Source::Collections(self.collections()?)),
            SourceKind::Citation => Ok(Source::Citations(self.citations()?)),
        }
    }

    /// One row per record in the configured collection, in retrieval order.
    pub fn citations(&self) -> Result<Vec<OutputRow>> {
        let settings = &self.settings;
        let records = self.records()?;
        let rows = filter_by_collection(&records, settings.collection_filter())
            .map(|record| self.output_row(record))
            .collect::<Result<Vec<_>>>()?;
        debug!(rows = rows.len(), "built citation rows");
        Ok(rows)
    }

    /// The "all" sentinel followed by each collection name once, in
    /// first-seen order across every record.
    pub fn collections(&self) -> Result<Vec<CollectionEntry>> {
        Ok(collection_entries(&self.records()?))
    }

    /// Full record collection, from a current cache or a fresh parse.
    pub fn records(&self) -> Result<Vec<Record>> {
        let use_cache = self.settings.use_cache();
        if use_cache && self.cache.is_current(&self.backend.data_file()) {
            debug!(path = %self.cache.path().display(), "cache hit");
            return self.cache.load();
        }

        info!(backend = self.backend.name(), "parsing data source");
        let records = self.backend.load().map_err(CitationError::from)?;
        if use_cache {
            self.cache.save(&records)?;
        } else {
            debug!("search keys present; cache bypassed");
        }
        Ok(records)
    }

    fn output_row(&self, record: &Record) -> Result<OutputRow> {
        let settings = &self.settings;
        let field = record
            .field(&settings.source_field)
            .ok_or_else(|| CitationError::UnknownField(settings.source_field.clone()))?;
        let description = describe(
            record,
            &settings.source_field,
            &settings.desc_fields,
            &settings.desc_format,
            &settings.wrap_chars,
        )?;
        Ok(OutputRow {
            field,
            description,
            file: record.file.clone(),
            combined: record.combined.clone(),
        })
    }
}

/// Records in `filter`'s collection, or all of them when `filter` is empty.
pub fn filter_by_collection<'a>(
    records: &'a [Record],
    filter: &'a str,
) -> impl Iterator<Item = &'a Record> + 'a {
    records
        .iter()
        .filter(move |record| filter.is_empty() || record.in_collection(filter))
}

/// Sentinel plus each distinct collection name in first-seen order.
pub fn collection_entries(records: &[Record]) -> Vec<CollectionEntry> {
    let mut seen: Vec<&str> = Vec::new();
    for name in records.iter().flat_map(|r| r.collections.iter()) {
        if !seen.contains(&name.as_str()) {
            seen.push(name);
        }
    }
    std::iter::once(CollectionEntry::all())
        .chain(seen.into_iter().map(|name| CollectionEntry::new(name, name)))
        .collect()
}
