//! Settings for one build. The host adapter (or the standalone binary) fills
//! a [`Settings`] value once and hands it to the builder; nothing reads
//! ambient state after that.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CitationError, Result};
use crate::models::ALL_COLLECTIONS;

/// File name of the cache inside the configured cache directory.
pub const CACHE_FILE_NAME: &str = "citation_source_cache";
/// Name of the TOML file looked up in the user's config directory.
const CONFIG_FILE_NAME: &str = "config.toml";
/// Prefix of the environment variables merged over the config file.
const ENV_PREFIX: &str = "CITATION_";

/// Which backend parses the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Bibtex,
    Zotero,
}

impl FromStr for Mode {
    type Err = CitationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bibtex" => Ok(Mode::Bibtex),
            "zotero" => Ok(Mode::Zotero),
            other => Err(CitationError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bibtex => write!(f, "bibtex"),
            Mode::Zotero => write!(f, "zotero"),
        }
    }
}

/// What the builder should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// One row per record.
    Citation,
    /// The distinct collection names.
    CitationCollection,
}

impl FromStr for SourceKind {
    type Err = CitationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "citation" => Ok(SourceKind::Citation),
            "citation_collection" => Ok(SourceKind::CitationCollection),
            other => Err(CitationError::UnknownSource(other.to_string())),
        }
    }
}

/// Prefix and suffix placed around the source field in descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WrapChars {
    /// Placed before the value, e.g. `[`.
    pub prefix: String,
    /// Placed after the value, e.g. `]`.
    pub suffix: String,
}

impl WrapChars {
    /// Build from explicit parts. Configuration files use the two-character
    /// string form instead (`"[]"`), parsed by the `FromStr` impl.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Surround `value` with the prefix and suffix. An empty value still gets
    /// both, so the source field's position stays visible in the description.
    pub fn wrap(&self, value: &str) -> String {
        format!("{}{}{}", self.prefix, value, self.suffix)
    }
}

impl Default for WrapChars {
    fn default() -> Self {
        Self::new("[", "]")
    }
}

impl FromStr for WrapChars {
    type Err = CitationError;

    fn from_str(s: &str) -> Result<Self> {
        let chars: Vec<char> = s.chars().collect();
        match chars.as_slice() {
            [prefix, suffix] => Ok(Self::new(prefix.to_string(), suffix.to_string())),
            _ => Err(CitationError::Configuration(format!(
                "wrap characters must be exactly two characters, got \"{s}\""
            ))),
        }
    }
}

impl TryFrom<String> for WrapChars {
    type Error = CitationError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<WrapChars> for String {
    fn from(wrap: WrapChars) -> String {
        format!("{}{}", wrap.prefix, wrap.suffix)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Fully populated configuration for one invocation.
pub struct Settings {
    /// `bibtex` or `zotero`; validated by [`Settings::mode`].
    pub mode: String,
    /// BibTeX file, or the Zotero data directory holding `zotero.sqlite`.
    pub data_path: PathBuf,
    /// Directory holding the cache file.
    pub cache_path: PathBuf,
    /// Collection name to restrict rows to; empty means no restriction.
    pub collection: String,
    /// Template for generated Zotero keys, e.g. `{author}{date}{Title}`.
    /// BibTeX entries keep their own cite keys.
    pub key_format: String,
    /// Positional description template; see [`crate::describe`].
    pub desc_format: String,
    /// Record attributes substituted into `desc_format`, in order. Each name
    /// must resolve on every record or the build fails.
    pub desc_fields: Vec<String>,
    /// Brackets placed around the source field in each description.
    pub wrap_chars: WrapChars,
    /// Author lists longer than this collapse to "First et al.".
    pub et_al_limit: usize,
    /// Zotero database schema generation (4 or 5).
    pub zotero_version: u32,
    /// Record attribute returned as each row's value.
    pub source_field: String,
    /// `citation` or `citation_collection`; validated by [`Settings::source_kind`].
    pub source: String,
    /// Restrict parsing to records matching every key. Disables the cache.
    pub search_keys: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Bibtex.to_string(),
            data_path: PathBuf::new(),
            cache_path: default_cache_dir(),
            collection: String::new(),
            key_format: "{author}{date}{Title}".to_string(),
            desc_format: "{}∶ {} \"{}\" -{}- ({})".to_string(),
            desc_fields: ["type", "key", "title", "author", "date"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            wrap_chars: WrapChars::default(),
            et_al_limit: 5,
            zotero_version: 5,
            source_field: "key".to_string(),
            source: "citation".to_string(),
            search_keys: Vec::new(),
        }
    }
}

impl Settings {
    /// Layer defaults, an optional TOML file and `CITATION_*` variables.
    /// Without an explicit path the user's config directory is tried.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file = config_file.map(Path::to_path_buf).or_else(default_config_file);
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "merging config file");
            figment = figment.merge(Toml::file(file));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|err| CitationError::Configuration(err.to_string()))
    }

    /// Parse the configured mode. Validation happens here rather than at load
    /// time so an unknown mode surfaces as a build error with zero rows.
    pub fn mode(&self) -> Result<Mode> {
        self.mode.parse()
    }

    /// Parse the requested source kind, `citation` or `citation_collection`.
    pub fn source_kind(&self) -> Result<SourceKind> {
        self.source.parse()
    }

    /// Search keys change which records are parsed, so they bypass the cache.
    pub fn use_cache(&self) -> bool {
        self.search_keys.is_empty()
    }

    /// Full path of the cache file. One file per cache directory, so two
    /// libraries sharing a cache directory overwrite each other's snapshot.
    pub fn cache_file(&self) -> PathBuf {
        self.cache_path.join(CACHE_FILE_NAME)
    }

    /// Collection filter with the "all" sentinel folded into "no filter".
    pub fn collection_filter(&self) -> &str {
        if self.collection == ALL_COLLECTIONS {
            ""
        } else {
            &self.collection
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "citation-source")
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_default()
}

fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
