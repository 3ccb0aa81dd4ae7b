//! InterProScan XML import into the session-scoped relational schema.
//!
//! The parser streams `protein` / `interpro` / `match` / `location` /
//! `classification` elements and writes one row per element into the
//! `<session>_*` tables with prepared statements, inside one transaction.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DbSettings;
use crate::domain::SessionId;
use crate::error::IprError;
use crate::source::session_table;
use crate::store::Session;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub proteins: usize,
    pub interpro_entries: usize,
    pub matches: usize,
    pub locations: usize,
    pub classifications: usize,
}

/// Creates the session schema. Safe to call on an existing database.
pub fn create_schema(conn: &Connection, session: &SessionId) -> Result<(), IprError> {
    let t = |suffix: &str| session_table(session, suffix);
    let ix = |suffix: &str| session_table(session, &format!("idx_{suffix}"));
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {protein} (
            protein_id TEXT NOT NULL PRIMARY KEY,
            length     INTEGER,
            crc64      TEXT,
            nprot      INTEGER
         );
         CREATE TABLE IF NOT EXISTS {interpro} (
            interpro_id TEXT NOT NULL PRIMARY KEY,
            name        TEXT,
            ipr_type    TEXT
         );
         CREATE TABLE IF NOT EXISTS {protein_interpro} (
            protein_id  TEXT NOT NULL,
            interpro_id TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS {pim} (
            pim_id      INTEGER NOT NULL PRIMARY KEY,
            protein_id  TEXT NOT NULL,
            interpro_id TEXT,
            match_id    TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS {iprmatch} (
            id      TEXT NOT NULL,
            pim_id  INTEGER NOT NULL,
            name    TEXT NOT NULL,
            db_name TEXT NOT NULL,
            PRIMARY KEY (id, pim_id)
         );
         CREATE TABLE IF NOT EXISTS {location} (
            loc_id   INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id TEXT NOT NULL,
            pim_id   INTEGER NOT NULL,
            start_p  INTEGER,
            end_p    INTEGER,
            score    REAL,
            status   TEXT,
            evidence TEXT
         );
         CREATE TABLE IF NOT EXISTS {classification} (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            protein_id TEXT NOT NULL,
            class_id   TEXT NOT NULL,
            class_type TEXT
         );
         CREATE INDEX IF NOT EXISTS {ix_iprmatch} ON {iprmatch} (db_name, id);
         CREATE INDEX IF NOT EXISTS {ix_pim} ON {pim} (match_id);
         CREATE INDEX IF NOT EXISTS {ix_class} ON {classification} (protein_id);",
        protein = t("protein"),
        interpro = t("interpro"),
        protein_interpro = t("protein_interpro"),
        pim = t("protein_interpro_match"),
        iprmatch = t("iprmatch"),
        location = t("location"),
        classification = t("protein_classification"),
        ix_iprmatch = ix("iprmatch"),
        ix_pim = ix("pim"),
        ix_class = ix("classification"),
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Parses `path` into the session's embedded database `<session_dir>/<db.db>`.
pub fn import_file(
    path: &Path,
    session: &Session,
    db: &DbSettings,
    progress: &AtomicUsize,
) -> Result<ImportSummary, IprError> {
    let file = File::open(path).map_err(|err| IprError::Import {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let db_path = session.local_db_path(&db.db);
    let mut conn = Connection::open(db_path.as_std_path())?;
    let summary = import_reader(BufReader::new(file), path, &mut conn, session.id(), progress)?;
    info!(
        session = %session.id(),
        proteins = summary.proteins,
        matches = summary.matches,
        "import finished"
    );
    Ok(summary)
}

pub fn import_reader<R: BufRead>(
    input: R,
    path: &Path,
    conn: &mut Connection,
    session: &SessionId,
    progress: &AtomicUsize,
) -> Result<ImportSummary, IprError> {
    create_schema(conn, session)?;
    let tx = conn.transaction()?;
    let start_pim: Option<i64> = tx
        .query_row(
            &format!(
                "SELECT MAX(pim_id) FROM {}",
                session_table(session, "protein_interpro_match")
            ),
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let mut writer = SchemaWriter::new(&tx, session, start_pim.unwrap_or(1), progress);
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);
    let mut buffer = Vec::new();
    let import_error = |message: String| IprError::Import {
        path: path.to_path_buf(),
        message,
    };

    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(e)) => writer.start(&e).map_err(|err| contextualize(err, path))?,
            Ok(Event::Empty(e)) => {
                writer.start(&e).map_err(|err| contextualize(err, path))?;
                writer
                    .end(e.local_name().as_ref())
                    .map_err(|err| contextualize(err, path))?;
            }
            Ok(Event::End(e)) => writer
                .end(e.local_name().as_ref())
                .map_err(|err| contextualize(err, path))?,
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(import_error(format!(
                    "malformed XML at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buffer.clear();
    }

    let summary = writer.summary.clone();
    drop(writer);
    tx.commit()?;
    Ok(summary)
}

fn contextualize(err: IprError, path: &Path) -> IprError {
    match err {
        IprError::Import { message, .. } => IprError::Import {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    }
}

#[derive(Debug, Default)]
struct ProteinElement {
    id: String,
    length: i64,
    crc64: Option<String>,
}

#[derive(Debug, Default)]
struct InterproElement {
    id: String,
    name: String,
    ipr_type: Option<String>,
}

#[derive(Debug, Default)]
struct MatchElement {
    id: String,
    name: String,
    db_name: String,
}

#[derive(Debug, Default)]
struct LocationElement {
    start: i64,
    end: i64,
    score: f64,
    status: Option<String>,
    evidence: Option<String>,
}

#[derive(Debug, Default)]
struct ClassificationElement {
    id: String,
    class_type: Option<String>,
}

struct SchemaWriter<'a, 'conn> {
    tx: &'a Transaction<'conn>,
    session: &'a SessionId,
    pim_id: i64,
    progress: &'a AtomicUsize,
    protein: Option<ProteinElement>,
    interpro: Option<InterproElement>,
    current_match: Option<MatchElement>,
    location: Option<LocationElement>,
    classification: Option<ClassificationElement>,
    summary: ImportSummary,
}

impl<'a, 'conn> SchemaWriter<'a, 'conn> {
    fn new(
        tx: &'a Transaction<'conn>,
        session: &'a SessionId,
        pim_id: i64,
        progress: &'a AtomicUsize,
    ) -> Self {
        Self {
            tx,
            session,
            pim_id,
            progress,
            protein: None,
            interpro: None,
            current_match: None,
            location: None,
            classification: None,
            summary: ImportSummary::default(),
        }
    }

    fn table(&self, suffix: &str) -> String {
        session_table(self.session, suffix)
    }

    fn start(&mut self, event: &BytesStart) -> Result<(), IprError> {
        match event.local_name().as_ref() {
            b"protein" => {
                self.protein = Some(ProteinElement {
                    id: required(event, "id", "protein")?,
                    length: optional_int(event, "length")?.unwrap_or(0),
                    crc64: attribute(event, "crc64")?,
                });
            }
            b"interpro" | b"ipr" => {
                self.interpro = Some(InterproElement {
                    id: required(event, "id", "interpro")?,
                    name: strip_quotes(attribute(event, "name")?.unwrap_or_default()),
                    ipr_type: attribute(event, "type")?,
                });
            }
            b"match" => {
                self.pim_id += 1;
                self.current_match = Some(MatchElement {
                    id: required(event, "id", "match")?,
                    name: strip_quotes(attribute(event, "name")?.unwrap_or_default()),
                    db_name: required(event, "dbname", "match")?,
                });
            }
            b"location" | b"lcn" if self.current_match.is_some() => {
                self.location = Some(LocationElement {
                    start: optional_int(event, "start")?.unwrap_or(0),
                    end: optional_int(event, "end")?.unwrap_or(0),
                    score: parse_score(attribute(event, "score")?.as_deref())?,
                    status: attribute(event, "status")?,
                    evidence: attribute(event, "evidence")?,
                });
            }
            b"classification" => {
                self.classification = Some(ClassificationElement {
                    id: required(event, "id", "classification")?,
                    class_type: attribute(event, "class_type")?,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) -> Result<(), IprError> {
        match name {
            b"protein" => {
                if let Some(protein) = self.protein.take() {
                    self.tx
                        .prepare_cached(&format!(
                            "REPLACE INTO {} (protein_id, length, crc64, nprot)
                             VALUES (?1, ?2, ?3, 1)",
                            self.table("protein")
                        ))?
                        .execute(params![protein.id, protein.length, protein.crc64])?;
                    self.summary.proteins += 1;
                    self.progress.fetch_add(1, Ordering::Relaxed);
                }
            }
            b"interpro" | b"ipr" => {
                if let Some(interpro) = self.interpro.take() {
                    self.tx
                        .prepare_cached(&format!(
                            "INSERT OR IGNORE INTO {} (interpro_id, name, ipr_type)
                             VALUES (?1, ?2, ?3)",
                            self.table("interpro")
                        ))?
                        .execute(params![interpro.id, interpro.name, interpro.ipr_type])?;
                    self.tx
                        .prepare_cached(&format!(
                            "INSERT INTO {} (protein_id, interpro_id) VALUES (?1, ?2)",
                            self.table("protein_interpro")
                        ))?
                        .execute(params![self.protein_id()?, interpro.id])?;
                    self.summary.interpro_entries += 1;
                }
            }
            b"match" => {
                if let Some(found) = self.current_match.take() {
                    let protein_id = self.protein_id()?;
                    let interpro_id = self.interpro.as_ref().map(|entry| entry.id.clone());
                    self.tx
                        .prepare_cached(&format!(
                            "INSERT INTO {} (pim_id, protein_id, interpro_id, match_id)
                             VALUES (?1, ?2, ?3, ?4)",
                            self.table("protein_interpro_match")
                        ))?
                        .execute(params![self.pim_id, protein_id, interpro_id, found.id])?;
                    self.tx
                        .prepare_cached(&format!(
                            "INSERT OR IGNORE INTO {} (id, pim_id, name, db_name)
                             VALUES (?1, ?2, ?3, ?4)",
                            self.table("iprmatch")
                        ))?
                        .execute(params![found.id, self.pim_id, found.name, found.db_name])?;
                    self.summary.matches += 1;
                }
            }
            b"location" | b"lcn" => {
                if let (Some(location), Some(found)) = (self.location.take(), &self.current_match)
                {
                    self.tx
                        .prepare_cached(&format!(
                            "INSERT INTO {} (match_id, pim_id, start_p, end_p, score, status, evidence)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            self.table("location")
                        ))?
                        .execute(params![
                            found.id,
                            self.pim_id,
                            location.start,
                            location.end,
                            location.score,
                            location.status,
                            location.evidence
                        ])?;
                    self.summary.locations += 1;
                }
            }
            b"classification" => {
                if let Some(class) = self.classification.take() {
                    self.tx
                        .prepare_cached(&format!(
                            "INSERT INTO {} (protein_id, class_id, class_type) VALUES (?1, ?2, ?3)",
                            self.table("protein_classification")
                        ))?
                        .execute(params![self.protein_id()?, class.id, class.class_type])?;
                    self.summary.classifications += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn protein_id(&self) -> Result<String, IprError> {
        self.protein
            .as_ref()
            .map(|protein| protein.id.clone())
            .ok_or_else(|| import_message("element outside of <protein>"))
    }
}

/// Runs one import on a background thread while the caller polls.
pub struct ImportJob {
    path: PathBuf,
    handle: JoinHandle<Result<ImportSummary, IprError>>,
    proteins: Arc<AtomicUsize>,
}

impl ImportJob {
    pub fn spawn(path: PathBuf, session: Session, db: DbSettings) -> Self {
        let proteins = Arc::new(AtomicUsize::new(0));
        let counter = proteins.clone();
        let worker_path = path.clone();
        let handle = thread::spawn(move || import_file(&worker_path, &session, &db, &counter));
        debug!(path = %path.display(), "import worker started");
        Self {
            path,
            handle,
            proteins,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn proteins_parsed(&self) -> usize {
        self.proteins.load(Ordering::Relaxed)
    }

    /// Sleeps in `poll` steps until the worker exits, reporting the number
    /// of proteins parsed so far on every tick.
    pub fn wait<F: FnMut(usize)>(
        self,
        poll: Duration,
        mut on_tick: F,
    ) -> Result<ImportSummary, IprError> {
        while !self.handle.is_finished() {
            on_tick(self.proteins_parsed());
            thread::sleep(poll);
        }
        on_tick(self.proteins_parsed());
        self.handle.join().map_err(|_| IprError::Import {
            path: self.path.clone(),
            message: "import worker panicked".to_string(),
        })?
    }
}

fn import_message(message: impl Into<String>) -> IprError {
    IprError::Import {
        path: PathBuf::new(),
        message: message.into(),
    }
}

fn attribute(event: &BytesStart, key: &str) -> Result<Option<String>, IprError> {
    for attr in event.attributes() {
        let attr = attr.map_err(|err| import_message(err.to_string()))?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| import_message(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required(event: &BytesStart, key: &str, element: &str) -> Result<String, IprError> {
    attribute(event, key)?
        .ok_or_else(|| import_message(format!("missing attribute {key} on <{element}>")))
}

fn optional_int(event: &BytesStart, key: &str) -> Result<Option<i64>, IprError> {
    attribute(event, key)?
        .map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| import_message(format!("invalid integer {key}={value}")))
        })
        .transpose()
}

fn parse_score(value: Option<&str>) -> Result<f64, IprError> {
    match value.map(str::trim) {
        None | Some(".") | Some("NA") | Some("") => Ok(0.0),
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| import_message(format!("invalid score {raw}"))),
    }
}

fn strip_quotes(value: String) -> String {
    value.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_placeholders_are_zero() {
        assert_eq!(parse_score(Some(".")).unwrap(), 0.0);
        assert_eq!(parse_score(Some("NA")).unwrap(), 0.0);
        assert_eq!(parse_score(None).unwrap(), 0.0);
        assert_eq!(parse_score(Some("1.5e-3")).unwrap(), 1.5e-3);
        assert!(parse_score(Some("high")).is_err());
    }
}
