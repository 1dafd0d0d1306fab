//! On-disk snapshot of the full, unfiltered record collection. A cache file
//! is only trusted while it is at least as new as the backend's data file.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CitationError, Result};
use crate::models::Record;

/// Bumped whenever the serialized [`Record`] shape changes.
const CACHE_VERSION: u32 = 1;

#[derive(Serialize)]
struct CacheEnvelopeRef<'a> {
    version: u32,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct CacheEnvelope {
    version: u32,
    records: Vec<Record>,
}

/// True iff the cache exists and was modified no earlier than the source.
/// Any failure to stat either file counts as stale.
pub fn is_current(source: &Path, cache_file: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|meta| meta.modified());
    match (modified(source), modified(cache_file)) {
        (Ok(source_time), Ok(cache_time)) => cache_time >= source_time,
        (Err(err), _) => {
            debug!(path = %source.display(), %err, "cannot stat data file; treating cache as stale");
            false
        }
        (_, Err(_)) => false,
    }
}

/// Reads and writes the cache file at one fixed path.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Point the store at `path`. Nothing touches the disk until
    /// [`CacheStore::load`] or [`CacheStore::save`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this cache may stand in for a fresh parse of `source`.
    pub fn is_current(&self, source: &Path) -> bool {
        is_current(source, &self.path)
    }

    /// Read the full record collection back. A missing file, unreadable JSON
    /// or a snapshot written by an incompatible version is a `CacheRead`
    /// error; callers decide beforehand, via [`CacheStore::is_current`],
    /// whether loading is appropriate at all.
    pub fn load(&self) -> Result<Vec<Record>> {
        let read_error = |source: io::Error| CitationError::CacheRead {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(read_error)?;
        let envelope: CacheEnvelope = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| read_error(err.into()))?;
        if envelope.version != CACHE_VERSION {
            return Err(read_error(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "cache version {} does not match expected {CACHE_VERSION}",
                    envelope.version
                ),
            )));
        }
        debug!(path = %self.path.display(), records = envelope.records.len(), "loaded cache");
        Ok(envelope.records)
    }

    /// Overwrite the cache. The data goes to a sibling temporary file first
    /// and is renamed into place, so readers never see a half-written cache.
    pub fn save(&self, records: &[Record]) -> Result<()> {
        let write_error = |source: io::Error| CitationError::CacheWrite {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let result = (|| -> io::Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            let envelope = CacheEnvelopeRef {
                version: CACHE_VERSION,
                records,
            };
            serde_json::to_writer(&mut writer, &envelope)?;
            writer.flush()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(err) = result {
            if fs::remove_file(&tmp_path).is_err() {
                warn!(path = %tmp_path.display(), "could not remove temporary cache file");
            }
            return Err(write_error(err));
        }
        debug!(path = %self.path.display(), records = records.len(), "wrote cache");
        Ok(())
    }
}
