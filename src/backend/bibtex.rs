//! BibTeX file backend.
//!
//! The parser reads `@string` macros, `#` concatenation, braced, quoted and
//! bare values, and skips `@comment`/`@preamble` blocks. A malformed entry is
//! logged and skipped so one typo does not hide the rest of the library.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{alpha1, char, multispace0, one_of};
use nom::combinator::map;
use nom::error::{Error as NomError, ErrorKind};
use nom::IResult;
use tracing::{debug, instrument, warn};

use super::{
    combine, format_authors, matches_search_keys, share_field_names, year_of, Backend, Creator,
    ParseError,
};
use crate::config::Settings;
use crate::models::Record;

/// Month abbreviations every BibTeX implementation predefines.
const MONTH_MACROS: &[(&str, &str)] = &[
    ("jan", "January"),
    ("feb", "February"),
    ("mar", "March"),
    ("apr", "April"),
    ("may", "May"),
    ("jun", "June"),
    ("jul", "July"),
    ("aug", "August"),
    ("sep", "September"),
    ("oct", "October"),
    ("nov", "November"),
    ("dec", "December"),
];

/// Reads records from a single `.bib` file.
#[derive(Debug, Clone)]
pub struct BibtexBackend {
    path: PathBuf,
    et_al_limit: usize,
    search_keys: Vec<String>,
}

impl BibtexBackend {
    /// Capture the file path, et-al limit and search keys from `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            path: settings.data_path.clone(),
            et_al_limit: settings.et_al_limit,
            search_keys: settings.search_keys.clone(),
        }
    }

    fn record_from(&self, entry: &BibEntry) -> Record {
        let mut record = Record::new(entry.key.clone());
        for (name, raw) in &entry.fields {
            record.set(name.clone(), clean_value(raw));
        }

        let field = |names: &[&str]| -> String {
            names
                .iter()
                .find_map(|name| entry.field(name))
                .map(clean_value)
                .unwrap_or_default()
        };

        let creators = entry
            .field("author")
            .or_else(|| entry.field("editor"))
            .map(parse_names)
            .unwrap_or_default();
        let date = match entry.field("year") {
            Some(year) => clean_value(year),
            None => year_of(&field(&["date"])),
        };

        record.set("type", entry.entry_type.clone());
        record.set("author", format_authors(&creators, self.et_al_limit));
        record.set("date", date);
        record.set("publication", field(&["journal", "journaltitle", "booktitle"]));
        record.set("issue", field(&["number", "issue"]));
        record.set("publisher", field(&["publisher", "institution", "school"]));
        record.set("notes", field(&["note", "annote", "annotation"]));
        record.set("tags", field(&["keywords"]));

        record.file = entry.field("file").map(attachment_path).unwrap_or_default();
        for group in field(&["groups"]).split(',') {
            let group = group.trim();
            if !group.is_empty() {
                record.add_collection(group);
            }
        }
        record.combined = combine(&record);
        record
    }
}

impl Backend for BibtexBackend {
    fn name(&self) -> &'static str {
        "bibtex"
    }

    fn data_file(&self) -> PathBuf {
        self.path.clone()
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Vec<Record>, ParseError> {
        let input = fs::read_to_string(&self.path).map_err(|source| ParseError::Io {
            path: self.path.clone(),
            source,
        })?;

        let mut records: Vec<Record> = parse_bibliography(&input)
            .iter()
            .map(|entry| self.record_from(entry))
            .collect();
        share_field_names(&mut records);
        records.retain(|record| matches_search_keys(record, &self.search_keys));
        debug!(records = records.len(), "parsed BibTeX file");
        Ok(records)
    }
}

/// Raw entry as it appears in the file; values keep their inner braces.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BibEntry {
    entry_type: String,
    key: String,
    fields: Vec<(String, String)>,
}

impl BibEntry {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

enum Block {
    Entry(BibEntry),
    Macro(String, String),
    Skipped,
}

type Macros = HashMap<String, String>;

fn parse_bibliography(input: &str) -> Vec<BibEntry> {
    let mut macros: Macros = MONTH_MACROS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut entries = Vec::new();
    let mut rest = input;
    let mut line = 1usize;

    while let Some(pos) = rest.find('@') {
        line += rest[..pos].matches('\n').count();
        let block_start = &rest[pos..];
        match at_block(block_start, &macros) {
            Ok((remaining, block)) => {
                match block {
                    Block::Entry(entry) => entries.push(entry),
                    Block::Macro(name, value) => {
                        macros.insert(name, value);
                    }
                    Block::Skipped => {}
                }
                let consumed = &block_start[..block_start.len() - remaining.len()];
                line += consumed.matches('\n').count();
                rest = remaining;
            }
            Err(_) => {
                warn!(line, "skipping malformed BibTeX entry");
                rest = &block_start[1..];
            }
        }
    }
    entries
}

fn at_block<'a>(input: &'a str, macros: &Macros) -> IResult<&'a str, Block> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, kind) = alpha1(rest)?;
    let (rest, _) = multispace0(rest)?;
    let kind = kind.to_ascii_lowercase();

    match kind.as_str() {
        "comment" => {
            if rest.starts_with('{') {
                let (rest, _) = braced(rest)?;
                Ok((rest, Block::Skipped))
            } else {
                let end = rest.find('\n').unwrap_or(rest.len());
                Ok((&rest[end..], Block::Skipped))
            }
        }
        "preamble" => {
            let (rest, _) = alt((braced, parenthesized))(rest)?;
            Ok((rest, Block::Skipped))
        }
        "string" => {
            let (rest, open) = one_of("{(")(rest)?;
            let (rest, (name, value)) = field(rest, macros)?;
            let (rest, _) = multispace0(rest)?;
            let (rest, _) = char(closing(open))(rest)?;
            Ok((rest, Block::Macro(name, value)))
        }
        _ => {
            let (rest, entry) = entry_body(rest, kind.clone(), macros)?;
            Ok((rest, Block::Entry(entry)))
        }
    }
}

fn closing(open: char) -> char {
    if open == '(' {
        ')'
    } else {
        '}'
    }
}

fn entry_body<'a>(input: &'a str, entry_type: String, macros: &Macros) -> IResult<&'a str, BibEntry> {
    let (rest, open) = one_of("{(")(input)?;
    let close = closing(open);
    let (rest, _) = multispace0(rest)?;
    let (mut rest, key) =
        take_while1(|c: char| c != ',' && c != close && !c.is_whitespace())(rest)?;

    let mut entry = BibEntry {
        entry_type,
        key: key.to_string(),
        fields: Vec::new(),
    };

    loop {
        let (r, _) = multispace0(rest)?;
        if let Some(r) = r.strip_prefix(close) {
            return Ok((r, entry));
        }
        let (r, _) = char(',')(r)?;
        let (r, _) = multispace0(r)?;
        if let Some(r) = r.strip_prefix(close) {
            return Ok((r, entry));
        }
        let (r, (name, value)) = field(r, macros)?;
        entry.fields.push((name, value));
        rest = r;
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || "_-:.+/".contains(c))(input)
}

/// `name = value`, with the name lowercased.
fn field<'a>(input: &'a str, macros: &Macros) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, name) = identifier(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, value) = value(rest, macros)?;
    Ok((rest, (name.to_ascii_lowercase(), value)))
}

/// One or more pieces joined by `#`. Bare words resolve through the macro
/// table and fall back to their own text, which also covers plain numbers.
fn value<'a>(input: &'a str, macros: &Macros) -> IResult<&'a str, String> {
    let mut out = String::new();
    let mut rest = input;
    loop {
        let (r, _) = multispace0(rest)?;
        let (r, piece) = alt((
            map(braced, str::to_string),
            map(quoted, str::to_string),
            map(identifier, |name: &str| {
                macros
                    .get(&name.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_else(|| name.to_string())
            }),
        ))(r)?;
        out.push_str(&piece);

        let (r, _) = multispace0(r)?;
        match r.strip_prefix('#') {
            Some(r) => rest = r,
            None => return Ok((r, out)),
        }
    }
}

/// Balanced `{...}`, returning the inner text.
fn braced(input: &str) -> IResult<&str, &str> {
    delimited_by(input, '{', '}')
}

fn parenthesized(input: &str) -> IResult<&str, &str> {
    delimited_by(input, '(', ')')
}

fn delimited_by(input: &str, open: char, close: char) -> IResult<&str, &str> {
    if !input.starts_with(open) {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)));
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[idx + 1..], &input[1..idx]));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

/// `"..."`; quotes inside braces do not terminate the value.
fn quoted(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('"') {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)));
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, c) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '"' if depth == 0 => return Ok((&input[idx + 1..], &input[1..idx])),
            _ => {}
        }
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

/// Drop protective braces, unescape common specials and collapse whitespace.
fn clean_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' | '}' => {}
            '\\' => match chars.peek() {
                Some(&next) if "&%$#_{}".contains(next) => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(c),
            },
            c => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split an author list on top-level `and` and parse each name.
fn parse_names(raw: &str) -> Vec<Creator> {
    let mut names = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut token = String::new();
    let mut depth = 0usize;

    let flush_token = |token: &mut String, current: &mut Vec<String>, names: &mut Vec<Creator>| {
        if token.is_empty() {
            return;
        }
        if token.eq_ignore_ascii_case("and") {
            if !current.is_empty() {
                names.push(parse_name(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(token.clone());
        }
        token.clear();
    };

    for c in raw.chars() {
        match c {
            '{' => {
                depth += 1;
                token.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                token.push(c);
            }
            c if c.is_whitespace() && depth == 0 => flush_token(&mut token, &mut current, &mut names),
            c => token.push(c),
        }
    }
    flush_token(&mut token, &mut current, &mut names);
    if !current.is_empty() {
        names.push(parse_name(&current.join(" ")));
    }
    names
}

/// `Last, First`, `First Last` or a braced corporate name.
fn parse_name(raw: &str) -> Creator {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && braced(trimmed).map(|(rest, _)| rest.is_empty()).unwrap_or(false) {
        return Creator::new("", clean_value(trimmed));
    }
    let name = clean_value(trimmed);
    if let Some((last, first)) = name.split_once(',') {
        return Creator::new(first.trim(), last.trim());
    }
    match name.rsplit_once(' ') {
        Some((first, last)) => Creator::new(first, last),
        None => Creator::new("", name),
    }
}

/// First attachment of a JabRef/Mendeley `file` field (`desc:path:type`).
fn attachment_path(raw: &str) -> String {
    let first = clean_value(raw.split(';').next().unwrap_or(""));
    let parts: Vec<&str> = first.split(':').collect();
    if parts.len() >= 3 {
        parts[1..parts.len() - 1].join(":")
    } else {
        first
    }
}
