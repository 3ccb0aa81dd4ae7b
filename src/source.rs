use std::fmt;

use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, warn};

use crate::config::{DbSettings, Settings};
use crate::domain::{AppName, CountRecord, SessionId};
use crate::error::IprError;
use crate::store::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sqlite,
    Server,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Sqlite => write!(f, "sqlite"),
            Engine::Server => write!(f, "server"),
        }
    }
}

/// One row of the match aggregate before GO name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMatchRow {
    pub name: String,
    pub db_id: String,
    pub go_id: Option<String>,
    pub count: i64,
}

/// Read side of the session-scoped annotation schema.
pub trait AnnotationSource {
    fn engine(&self) -> Engine;

    /// `(name, count)` per match identity, `count DESC, name ASC`.
    fn count_rows(&mut self, app: &AppName) -> Result<Vec<CountRecord>, IprError>;

    /// One row per `(match id, classification id)`, `count DESC, name ASC`.
    fn match_rows(&mut self, app: &AppName) -> Result<Vec<SourceMatchRow>, IprError>;
}

pub trait SourceConnector {
    fn engine(&self) -> Engine;

    fn connect(
        &self,
        session: &Session,
        db: &DbSettings,
    ) -> Result<Box<dyn AnnotationSource>, IprError>;
}

/// Connector used when no server engine is compiled into the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServer;

impl SourceConnector for NoServer {
    fn engine(&self) -> Engine {
        Engine::Server
    }

    fn connect(
        &self,
        _session: &Session,
        db: &DbSettings,
    ) -> Result<Box<dyn AnnotationSource>, IprError> {
        Err(IprError::Connection(format!(
            "no server engine available for {}@{}",
            db.user, db.host
        )))
    }
}

/// Opens the embedded database the importer wrote into the session directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl SourceConnector for SqliteConnector {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn connect(
        &self,
        session: &Session,
        db: &DbSettings,
    ) -> Result<Box<dyn AnnotationSource>, IprError> {
        let path = session.local_db_path(&db.db);
        let conn = Connection::open_with_flags(path.as_std_path(), OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|err| IprError::Connection(format!("{path}: {err}")))?;
        Ok(Box::new(SqliteSource::new(conn, session.id().clone())))
    }
}

pub struct SqliteSource {
    conn: Connection,
    session: SessionId,
}

impl SqliteSource {
    pub fn new(conn: Connection, session: SessionId) -> Self {
        Self { conn, session }
    }
}

impl AnnotationSource for SqliteSource {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn count_rows(&mut self, app: &AppName) -> Result<Vec<CountRecord>, IprError> {
        let sql = format!(
            "SELECT min(name) AS name, count(1) AS count
             FROM {iprmatch}
             WHERE db_name = ?1
             GROUP BY id
             ORDER BY count DESC, name ASC, id ASC",
            iprmatch = session_table(&self.session, "iprmatch"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![app.as_str()], |row| {
                Ok(CountRecord {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(app = %app, rows = rows.len(), "count query");
        Ok(rows)
    }

    fn match_rows(&mut self, app: &AppName) -> Result<Vec<SourceMatchRow>, IprError> {
        // aggregate per match first; classifications are optional, hence the outer joins
        let sql = format!(
            "SELECT A.name, A.id, C.class_id, A.count
             FROM ( SELECT   id, min(name) AS name, count(1) AS count
                    FROM     {iprmatch}
                    WHERE    db_name = ?1
                    GROUP BY id ) AS A
                  LEFT OUTER JOIN {pim} AS B ON B.match_id = A.id
                  LEFT OUTER JOIN {classification} AS C ON C.protein_id = B.protein_id
             GROUP BY A.id, C.class_id
             ORDER BY A.count DESC, A.name ASC, A.id ASC, C.class_id ASC",
            iprmatch = session_table(&self.session, "iprmatch"),
            pim = session_table(&self.session, "protein_interpro_match"),
            classification = session_table(&self.session, "protein_classification"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![app.as_str()], |row| {
                Ok(SourceMatchRow {
                    name: row.get(0)?,
                    db_id: row.get(1)?,
                    go_id: row.get(2)?,
                    count: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(app = %app, rows = rows.len(), "match query");
        Ok(rows)
    }
}

/// Quoted name of a session-scoped table, e.g. `"Xs7O4pYH_iprmatch"`.
pub fn session_table(session: &SessionId, suffix: &str) -> String {
    quote_ident(&format!("{}_{suffix}", session.as_str()))
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Picks the store engine: SQLite when configured, otherwise the server
/// engine with a silent fallback to SQLite when it cannot be reached.
pub fn connect_store<S: SourceConnector + ?Sized>(
    settings: &Settings,
    session: &Session,
    server: &S,
) -> Result<Box<dyn AnnotationSource>, IprError> {
    let sqlite = SqliteConnector;
    let db = settings.local_db();
    if settings.use_sqlite() {
        return sqlite.connect(session, db);
    }

    match server.connect(session, db) {
        Ok(source) => Ok(source),
        Err(err) => {
            warn!(
                host = %db.host,
                user = %db.user,
                error = %err,
                "cannot connect to server store; defaulting to SQLite"
            );
            sqlite.connect(session, db).map_err(|fallback| {
                IprError::Connection(format!("{err}; sqlite fallback failed: {fallback}"))
            })
        }
    }
}
