//! Zotero database backend. Reads `zotero.sqlite` inside the configured data
//! directory. The connection is opened read-only and immutable so a running
//! Zotero holding its lock does not block us.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use html2text::render::text_renderer::TrivialDecorator;
use rusqlite::{Connection, OpenFlags, Row};
use tracing::{debug, instrument};
use url::Url;

use super::{
    combine, format_authors, format_key, matches_search_keys, share_field_names, year_of,
    Backend, Creator, ParseError,
};
use crate::config::Settings;
use crate::models::Record;

/// Database file name inside the Zotero data directory.
const DB_FILE_NAME: &str = "zotero.sqlite";
/// Attachment paths with this prefix live under `storage/<attachment key>/`.
const STORAGE_PREFIX: &str = "storage:";
/// Line width handed to the note renderer; lines are rejoined afterwards.
const NOTE_RENDER_WIDTH: usize = 1000;

/// Zotero field names mapped onto record fields, in priority order.
const FIELD_MAP: &[(&str, &[&str])] = &[
    ("title", &["title"]),
    (
        "publication",
        &[
            "publicationTitle",
            "bookTitle",
            "proceedingsTitle",
            "websiteTitle",
            "blogTitle",
        ],
    ),
    ("volume", &["volume"]),
    ("issue", &["issue"]),
    ("pages", &["pages"]),
    ("publisher", &["publisher", "institution", "university"]),
    ("doi", &["DOI"]),
    ("isbn", &["ISBN"]),
    ("url", &["url"]),
    ("abstract", &["abstractNote"]),
    ("language", &["language"]),
];

const ITEMS_SQL: &str = "SELECT i.itemID, i.key, t.typeName
     FROM items i
     JOIN itemTypes t ON t.itemTypeID = i.itemTypeID
     WHERE t.typeName NOT IN ('attachment', 'note', 'annotation')
       AND i.itemID NOT IN (SELECT itemID FROM deletedItems)
     ORDER BY i.itemID";

const FIELDS_SQL: &str = "SELECT d.itemID, f.fieldName, v.value
     FROM itemData d
     JOIN fields f ON f.fieldID = d.fieldID
     JOIN itemDataValues v ON v.valueID = d.valueID";

const COLLECTIONS_SQL: &str = "SELECT ci.itemID, c.collectionName
     FROM collectionItems ci
     JOIN collections c ON c.collectionID = ci.collectionID
     ORDER BY c.collectionID";

const TAGS_SQL: &str = "SELECT it.itemID, t.name
     FROM itemTags it
     JOIN tags t ON t.tagID = it.tagID
     ORDER BY t.name COLLATE NOCASE";

/// The two database layouts we understand. They differ in where creator
/// names live and what the attachment/note parent column is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schema {
    V4,
    V5,
}

impl Schema {
    fn from_version(version: u32) -> Result<Self, ParseError> {
        match version {
            4 => Ok(Schema::V4),
            5 => Ok(Schema::V5),
            other => Err(ParseError::UnsupportedSchema(other)),
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            Schema::V4 => "sourceItemID",
            Schema::V5 => "parentItemID",
        }
    }

    fn creators_sql(self) -> &'static str {
        match self {
            Schema::V4 => {
                "SELECT ic.itemID, cd.firstName, cd.lastName, ct.creatorType
                 FROM itemCreators ic
                 JOIN creators c ON c.creatorID = ic.creatorID
                 JOIN creatorData cd ON cd.creatorDataID = c.creatorDataID
                 JOIN creatorTypes ct ON ct.creatorTypeID = ic.creatorTypeID
                 ORDER BY ic.itemID, ic.orderIndex"
            }
            Schema::V5 => {
                "SELECT ic.itemID, c.firstName, c.lastName, ct.creatorType
                 FROM itemCreators ic
                 JOIN creators c ON c.creatorID = ic.creatorID
                 JOIN creatorTypes ct ON ct.creatorTypeID = ic.creatorTypeID
                 ORDER BY ic.itemID, ic.orderIndex"
            }
        }
    }

    fn attachments_sql(self) -> String {
        let parent = self.parent_column();
        format!(
            "SELECT a.{parent}, a.path, i.key
             FROM itemAttachments a
             JOIN items i ON i.itemID = a.itemID
             WHERE a.{parent} IS NOT NULL AND a.path IS NOT NULL
               AND a.itemID NOT IN (SELECT itemID FROM deletedItems)
             ORDER BY (a.contentType = 'application/pdf') DESC, a.itemID"
        )
    }

    fn notes_sql(self) -> String {
        let parent = self.parent_column();
        format!(
            "SELECT {parent}, note FROM itemNotes
             WHERE {parent} IS NOT NULL
             ORDER BY itemID"
        )
    }
}

/// Reads records from a Zotero data directory.
#[derive(Debug, Clone)]
pub struct ZoteroBackend {
    path: PathBuf,
    version: u32,
    key_format: String,
    et_al_limit: usize,
    search_keys: Vec<String>,
}

/// Record under construction plus the data only needed until it is final.
struct Draft {
    record: Record,
    zotero_fields: HashMap<String, String>,
    creators: Vec<(Creator, String)>,
    notes: Vec<String>,
    tags: Vec<String>,
}

impl ZoteroBackend {
    /// Capture the data directory, schema version and key settings. The
    /// schema version is checked when loading, not here.
    pub fn new(settings: &Settings) -> Self {
        Self {
            path: settings.data_path.clone(),
            version: settings.zotero_version,
            key_format: settings.key_format.clone(),
            et_al_limit: settings.et_al_limit,
            search_keys: settings.search_keys.clone(),
        }
    }

    fn open(&self) -> Result<Connection, ParseError> {
        let db_path = self.data_file();
        fs::metadata(&db_path).map_err(|source| ParseError::Io {
            path: db_path.clone(),
            source,
        })?;
        Connection::open_with_flags(
            immutable_uri(&db_path)?,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|source| ParseError::Query {
            what: "open database",
            source,
        })
    }

    fn finish(&self, draft: Draft) -> Result<Record, ParseError> {
        let Draft {
            mut record,
            zotero_fields,
            creators,
            notes,
            tags,
        } = draft;

        for (name, value) in &zotero_fields {
            record.set(name.clone(), value.clone());
        }
        for (target, sources) in FIELD_MAP {
            let value = sources
                .iter()
                .find_map(|name| zotero_fields.get(*name))
                .cloned()
                .unwrap_or_default();
            record.set(*target, value);
        }
        let date = zotero_fields
            .get("date")
            .map(|d| year_of(d))
            .unwrap_or_default();
        record.set("date", date.clone());

        let authors: Vec<Creator> = {
            let primary: Vec<Creator> = creators
                .iter()
                .filter(|(_, kind)| kind == "author")
                .map(|(creator, _)| creator.clone())
                .collect();
            if primary.is_empty() {
                creators.into_iter().map(|(creator, _)| creator).collect()
            } else {
                primary
            }
        };
        record.set("author", format_authors(&authors, self.et_al_limit));
        record.set("notes", notes.join(" "));
        record.set("tags", tags.join(", "));

        let first_author = authors.first().map(|c| c.last.as_str()).unwrap_or("");
        let title = record.fields.get("title").cloned().unwrap_or_default();
        record.key = format_key(&self.key_format, first_author, &date, &title)?;
        record.combined = combine(&record);
        Ok(record)
    }
}

impl Backend for ZoteroBackend {
    fn name(&self) -> &'static str {
        "zotero"
    }

    /// The SQLite file inside the data directory, not the directory itself.
    fn data_file(&self) -> PathBuf {
        self.path.join(DB_FILE_NAME)
    }

    #[instrument(skip(self), fields(path = %self.path.display(), version = self.version))]
    fn load(&self) -> Result<Vec<Record>, ParseError> {
        let schema = Schema::from_version(self.version)?;
        let conn = self.open()?;

        let mut drafts: Vec<Draft> = Vec::new();
        let mut index: HashMap<i64, usize> = HashMap::new();
        for (item_id, key, type_name) in query_rows(&conn, "items", ITEMS_SQL, |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })? {
            let mut record = Record::new(String::new());
            record.set("type", type_name);
            record.set("zotero_key", key);
            index.insert(item_id, drafts.len());
            drafts.push(Draft {
                record,
                zotero_fields: HashMap::new(),
                creators: Vec::new(),
                notes: Vec::new(),
                tags: Vec::new(),
            });
        }

        // Rows for deleted items, notes and attachments have no draft and
        // fall through here.
        let draft_for = |item_id: i64| index.get(&item_id).copied();

        for (item_id, name, value) in query_rows(&conn, "item fields", FIELDS_SQL, |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, text(row, 2)?))
        })? {
            if let Some(i) = draft_for(item_id) {
                drafts[i].zotero_fields.insert(name, value);
            }
        }

        for (item_id, first, last, kind) in
            query_rows(&conn, "creators", schema.creators_sql(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    text(row, 1)?,
                    text(row, 2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
        {
            if let Some(i) = draft_for(item_id) {
                drafts[i].creators.push((Creator::new(first, last), kind));
            }
        }

        for (item_id, name) in query_rows(&conn, "collections", COLLECTIONS_SQL, |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })? {
            if let Some(i) = draft_for(item_id) {
                drafts[i].record.add_collection(name);
            }
        }

        for (parent_id, path, attachment_key) in
            query_rows(&conn, "attachments", &schema.attachments_sql(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
        {
            if let Some(i) = draft_for(parent_id) {
                let record = &mut drafts[i].record;
                if record.file.is_empty() {
                    record.file = self.attachment_path(&path, &attachment_key);
                }
            }
        }

        for (parent_id, note) in query_rows(&conn, "notes", &schema.notes_sql(), |row| {
            Ok((row.get::<_, i64>(0)?, text(row, 1)?))
        })? {
            if let Some(i) = draft_for(parent_id) {
                let note = html_to_text(&note);
                if !note.is_empty() {
                    drafts[i].notes.push(note);
                }
            }
        }

        for (item_id, tag) in query_rows(&conn, "tags", TAGS_SQL, |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })? {
            if let Some(i) = draft_for(item_id) {
                drafts[i].tags.push(tag);
            }
        }

        let mut records = drafts
            .into_iter()
            .map(|draft| self.finish(draft))
            .collect::<Result<Vec<_>, _>>()?;
        share_field_names(&mut records);
        records.retain(|record| matches_search_keys(record, &self.search_keys));
        debug!(records = records.len(), "read Zotero database");
        Ok(records)
    }
}

impl ZoteroBackend {
    fn attachment_path(&self, path: &str, attachment_key: &str) -> String {
        match path.strip_prefix(STORAGE_PREFIX) {
            Some(name) => self
                .path
                .join("storage")
                .join(attachment_key)
                .join(name)
                .to_string_lossy()
                .into_owned(),
            None => path.to_string(),
        }
    }
}

/// Prepare, run and collect one query, tagging failures with `what`.
fn query_rows<T>(
    conn: &Connection,
    what: &'static str,
    sql: &str,
    map_row: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, ParseError> {
    let query_error = |source: rusqlite::Error| ParseError::Query { what, source };
    let mut stmt = conn.prepare(sql).map_err(query_error)?;
    let rows = stmt
        .query_map([], map_row)
        .map_err(query_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_error)?;
    Ok(rows)
}

/// Read a nullable text column, or a number stored in a text field.
fn text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    use rusqlite::types::ValueRef;
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

/// `file:` URI with `immutable=1`. The path is made absolute and
/// percent-encoded as a URL path, so `?`, `#`, `%`, spaces and non-ASCII names
/// survive SQLite's URI parsing.
fn immutable_uri(path: &Path) -> Result<String, ParseError> {
    let io_error = |source: io::Error| ParseError::Io {
        path: path.to_path_buf(),
        source,
    };
    let absolute = std::path::absolute(path).map_err(io_error)?;
    let mut url = Url::from_file_path(&absolute)
        .map_err(|()| io_error(io::Error::other("not a local file path")))?;
    url.set_query(Some("immutable=1"));
    Ok(url.into())
}

/// Render a note's HTML as a single line of plain text.
fn html_to_text(html: &str) -> String {
    let text = html2text::from_read_with_decorator(
        html.as_bytes(),
        NOTE_RENDER_WIDTH,
        TrivialDecorator::new(),
    );
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("<div><p>Read &amp; re-read</p><p>later</p></div>", "Read & re-read later")]
    #[case("plain", "plain")]
    #[case("<p></p>", "")]
    #[case(
        "<p>Smith&#8217;s caf&eacute; &mdash; 5&nbsp;&lt;&nbsp;6</p>",
        "Smith\u{2019}s caf\u{e9} \u{2014} 5 < 6"
    )]
    #[case("<p>See <em>Nature</em> &amp; <b>Science</b></p>", "See Nature & Science")]
    fn test_html_to_text(#[case] html: &str, #[case] expected: &str) {
        assert_eq!(html_to_text(html), expected);
    }

    #[test]
    fn test_immutable_uri_escapes_query_characters() {
        assert_eq!(
            immutable_uri(Path::new("/data/100%/what?#/zotero.sqlite")).unwrap(),
            "file:///data/100%25/what%3F%23/zotero.sqlite?immutable=1"
        );
    }

    #[test]
    fn test_immutable_uri_encodes_spaces_and_unicode() {
        assert_eq!(
            immutable_uri(Path::new("/home/zoë/My Library/zotero.sqlite")).unwrap(),
            "file:///home/zo%C3%AB/My%20Library/zotero.sqlite?immutable=1"
        );
    }

    #[test]
    fn test_unsupported_schema_version() {
        let backend = ZoteroBackend::new(&Settings {
            mode: "zotero".to_string(),
            zotero_version: 3,
            ..Settings::default()
        });
        assert!(matches!(
            backend.load().unwrap_err(),
            ParseError::UnsupportedSchema(3)
        ));
    }

    #[test]
    fn test_missing_database_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ZoteroBackend::new(&Settings {
            mode: "zotero".to_string(),
            data_path: dir.path().to_path_buf(),
            ..Settings::default()
        });
        assert!(matches!(backend.load().unwrap_err(), ParseError::Io { .. }));
    }

    #[test]
    fn test_storage_attachment_path() {
        let backend = ZoteroBackend::new(&Settings {
            data_path: PathBuf::from("/home/me/Zotero"),
            ..Settings::default()
        });
        assert_eq!(
            backend.attachment_path("storage:paper.pdf", "ABCD1234"),
            "/home/me/Zotero/storage/ABCD1234/paper.pdf"
        );
        assert_eq!(
            backend.attachment_path("/elsewhere/linked.pdf", "ABCD1234"),
            "/elsewhere/linked.pdf"
        );
    }
}
