//! Standalone entry point: build the picker source from the command line and
//! print it, or browse it in the terminal. Errors never escape as a panic;
//! the full trace goes to stdout, the same channel the rows use.
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use citation_source::ui::{run_browser, Browser};
use citation_source::{build_source, format_trace, Settings, Source};

#[derive(Parser, Debug)]
#[command(name = "citation-source", version)]
#[command(about = "Print the citation rows a picker would receive", long_about = None)]
struct Args {
    /// BibTeX file or Zotero data directory
    path: PathBuf,

    /// Backend: `bibtex` or `zotero`
    mode: String,

    /// Record field returned as each row's value
    field: String,

    /// Whitespace-separated search keys; disables the cache
    search_keys: Option<String>,

    /// Zotero database schema version
    zotero_version: Option<u32>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the cache file
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Only list records in this collection
    #[arg(long)]
    collection: Option<String>,

    /// List collection names instead of citations
    #[arg(long)]
    collections: bool,

    /// Browse the rows interactively and print the chosen value
    #[arg(long)]
    browse: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

impl Args {
    /// Overlay the command line on settings loaded from file and environment.
    fn apply(&self, base: Settings) -> Settings {
        let mut settings = Settings {
            mode: self.mode.clone(),
            data_path: self.path.clone(),
            source_field: self.field.clone(),
            ..base
        };
        if let Some(keys) = &self.search_keys {
            settings.search_keys = keys.split_whitespace().map(str::to_string).collect();
        }
        if let Some(version) = self.zotero_version {
            settings.zotero_version = version;
        }
        if let Some(dir) = &self.cache_dir {
            settings.cache_path = dir.clone();
        }
        if let Some(collection) = &self.collection {
            settings.collection = collection.clone();
        }
        if self.collections {
            settings.source = "citation_collection".to_string();
        }
        settings
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version arrive as errors that are not failures.
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            println!("{}", usage_report(&err));
            return ExitCode::FAILURE;
        }
    };
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            println!("citation error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// Report a command-line error on the same channel and with the same prefix as
/// every other failure.
fn usage_report(err: &clap::Error) -> String {
    let message = err.to_string();
    let message = message.trim_start_matches("error: ").trim_end();
    format!("citation error: {message}")
}

fn run(args: &Args) -> Result<ExitCode> {
    init_tracing(&args.log_level)?;

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(base) => args.apply(base),
        Err(err) => {
            println!("{}", format_trace(&err));
            return Ok(ExitCode::FAILURE);
        }
    };
    let source = match build_source(settings) {
        Ok(source) => source,
        Err(err) => {
            println!("{}", format_trace(&err));
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.browse {
        let title = match &source {
            Source::Citations(_) => "Citations",
            Source::Collections(_) => "Collections",
        };
        let mut browser = Browser::from_source(title, &source);
        run_browser(&mut browser)?;
        if let Some(value) = browser.chosen() {
            println!("{value}");
        }
    } else {
        let stdout = io::stdout();
        write_source(&mut stdout.lock(), &source).context("failed to write rows")?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Print every row's four components, or each collection's label and value.
fn write_source(out: &mut impl Write, source: &Source) -> io::Result<()> {
    match source {
        Source::Citations(rows) => {
            for row in rows {
                writeln!(out, "Field: {}", row.field)?;
                writeln!(out, "Description: {}", row.description)?;
                writeln!(out, "File: {}", row.file)?;
                writeln!(out, "Combined: {}", row.combined)?;
                writeln!(out)?;
            }
        }
        Source::Collections(entries) => {
            for entry in entries {
                writeln!(out, "{}\t{}", entry.label, entry.value)?;
            }
        }
    }
    out.flush()
}

/// Log to stderr so stdout carries only rows and error reports.
fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("Invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use citation_source::{CollectionEntry, OutputRow};

    #[test]
    fn test_args_positional_values() {
        let args = Args::parse_from([
            "citation-source",
            "/home/me/Zotero",
            "zotero",
            "key",
            "quantum  gravity",
            "4",
        ]);
        let settings = args.apply(Settings::default());

        assert_eq!(settings.mode, "zotero");
        assert_eq!(settings.data_path, PathBuf::from("/home/me/Zotero"));
        assert_eq!(settings.source_field, "key");
        assert_eq!(settings.search_keys, vec!["quantum", "gravity"]);
        assert_eq!(settings.zotero_version, 4);
        assert!(!settings.use_cache());
        assert_eq!(settings.source, "citation");
    }

    #[test]
    fn test_missing_positionals_are_reported_as_citation_errors() {
        let err = Args::try_parse_from(["citation-source", "/tmp/x.bib"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert!(err.use_stderr());

        let report = usage_report(&err);
        assert!(
            report.starts_with("citation error: the following required arguments were not provided"),
            "{report}"
        );
        assert!(report.contains("<MODE>"));
        assert!(report.contains("<FIELD>"));
    }

    #[test]
    fn test_help_is_not_a_failure() {
        let err = Args::try_parse_from(["citation-source", "--help"]).unwrap_err();
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_args_options() {
        let args = Args::parse_from([
            "citation-source",
            "library.bib",
            "bibtex",
            "title",
            "--collections",
            "--collection",
            "Thesis",
            "--cache-dir",
            "/tmp/cache",
        ]);
        let settings = args.apply(Settings::default());

        assert_eq!(settings.source, "citation_collection");
        assert_eq!(settings.collection, "Thesis");
        assert_eq!(settings.cache_path, PathBuf::from("/tmp/cache"));
        assert!(settings.search_keys.is_empty());
        assert_eq!(args.log_level, "warn");
        assert!(!args.browse);
    }

    #[test]
    fn test_write_source_rows() {
        let source = Source::Citations(vec![OutputRow {
            field: "Smith2020".to_string(),
            description: "article [Smith2020]".to_string(),
            file: String::new(),
            combined: "Smith (2020).".to_string(),
        }]);
        let mut out = Vec::new();
        write_source(&mut out, &source).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Field: Smith2020\nDescription: article [Smith2020]\nFile: \nCombined: Smith (2020).\n\n"
        );
    }

    #[test]
    fn test_write_source_collections() {
        let source = Source::Collections(vec![
            CollectionEntry::all(),
            CollectionEntry::new("Thesis", "Thesis"),
        ]);
        let mut out = Vec::new();
        write_source(&mut out, &source).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<all>\t<all>\nThesis\tThesis\n"
        );
    }
}
