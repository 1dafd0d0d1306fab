//! Error kinds surfaced by the citation pipeline. Every failure in the build
//! path ends up as one of these so the entry point can report it in one place.

use std::error::Error as StdError;
use std::fmt::Write;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backend::ParseError;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, CitationError>;

#[derive(Debug, Error)]
pub enum CitationError {
    /// A required setting is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("configuration error: mode must be 'bibtex' or 'zotero', got '{0}'")]
    UnknownMode(String),
    #[error("configuration error: source must be 'citation' or 'citation_collection', got '{0}'")]
    UnknownSource(String),
    /// A description or source field that records do not carry.
    #[error("configuration error: unknown field \"{0}\" in description fields")]
    UnknownField(String),
    #[error("failed to read cache file {}", path.display())]
    CacheRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cache file {}", path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    BackendParse(#[from] ParseError),
}

impl CitationError {
    /// True for every kind caused by bad settings rather than bad data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CitationError::Configuration(_)
                | CitationError::UnknownMode(_)
                | CitationError::UnknownSource(_)
                | CitationError::UnknownField(_)
        )
    }
}

/// Render an error and its whole source chain, one cause per line, for the
/// top-level report.
pub fn format_trace(err: &(dyn StdError + 'static)) -> String {
    let mut trace = format!("citation error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(trace, "\n  caused by: {cause}");
        source = cause.source();
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_trace_lists_causes() {
        let err = CitationError::CacheRead {
            path: PathBuf::from("/tmp/cache"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            format_trace(&err),
            "citation error: failed to read cache file /tmp/cache\n  caused by: no such file"
        );
    }

    #[test]
    fn test_configuration_kinds() {
        assert!(CitationError::UnknownField("x".into()).is_configuration());
        assert!(!CitationError::CacheWrite {
            path: PathBuf::new(),
            source: io::Error::other("denied"),
        }
        .is_configuration());
    }
}
