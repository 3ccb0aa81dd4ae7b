use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::cache::CacheBackend;
use crate::domain::{AppName, BackendKind, CountRecord, MatchRecord};
use crate::error::IprError;
use crate::go::GoStatus;
use crate::source::quote_ident;

const META_TABLE: &str = "iprstats_meta";
const GO_ENABLED: &str = "enabled";

/// `<app>_counts` / `<app>_matches` tables in the session `results` file.
/// Lengths and rows are re-queried on every call; row order is insertion
/// order.
pub struct DurableBackend {
    conn: Connection,
    read_only: bool,
}

impl DurableBackend {
    /// Opens `path` for a fresh population, discarding any completion marker.
    pub fn create(path: &Path) -> Result<Self, IprError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {META_TABLE} (
                key   TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL
             );
             DELETE FROM {META_TABLE};"
        ))?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Reopens a store whose population completed, with the GO lookup
    /// state recorded at that time.
    pub fn open_populated(path: &Path) -> Result<(Self, GoStatus), IprError> {
        let not_populated = || IprError::NotPopulated(path.display().to_string());
        if !path.exists() {
            return Err(not_populated());
        }
        let conn = Connection::open(path)?;
        let has_meta: bool = conn.query_row(
            "SELECT count(1) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![META_TABLE],
            |row| row.get(0),
        )?;
        if !has_meta {
            return Err(not_populated());
        }
        let meta = |key: &str| -> Result<Option<String>, IprError> {
            Ok(conn
                .query_row(
                    &format!("SELECT value FROM {META_TABLE} WHERE key = ?1"),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        };
        if meta("populated")?.is_none() {
            return Err(not_populated());
        }
        let go = match meta("go_lookup")? {
            Some(value) if value == GO_ENABLED => GoStatus::Enabled,
            Some(reason) => GoStatus::Disabled(reason),
            None => GoStatus::Disabled("unknown".to_string()),
        };
        Ok((
            Self {
                conn,
                read_only: true,
            },
            go,
        ))
    }

    fn writable(&self) -> Result<(), IprError> {
        if self.read_only {
            return Err(IprError::CacheClosed);
        }
        Ok(())
    }

    fn begin(&self) -> Result<(), IprError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Names resolved before lookup was disabled are dropped with the rest.
    fn clear_go_names(&self) -> Result<(), IprError> {
        let tables = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name GLOB '*_matches'")?
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for table in tables {
            self.conn.execute(
                &format!("UPDATE {} SET goname = NULL", quote_ident(&table)),
                [],
            )?;
        }
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, IprError> {
        Ok(self.conn.query_row(
            "SELECT count(1) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?)
    }
}

fn counts_table(app: &AppName) -> String {
    format!("{}_counts", app.as_str())
}

fn matches_table(app: &AppName) -> String {
    format!("{}_matches", app.as_str())
}

impl CacheBackend for DurableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    fn create_count_group(&mut self, app: &AppName) -> Result<(), IprError> {
        self.writable()?;
        self.begin()?;
        let table = quote_ident(&counts_table(app));
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                name  TEXT NOT NULL PRIMARY KEY,
                count INTEGER NOT NULL
             );"
        ))?;
        Ok(())
    }

    fn insert_count(&mut self, app: &AppName, record: &CountRecord) -> Result<(), IprError> {
        self.writable()?;
        self.conn
            .prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (name, count) VALUES (?1, ?2)",
                quote_ident(&counts_table(app))
            ))?
            .execute(params![record.name, record.count])?;
        Ok(())
    }

    fn create_match_group(&mut self, app: &AppName) -> Result<(), IprError> {
        self.writable()?;
        self.begin()?;
        let table = quote_ident(&matches_table(app));
        let index = quote_ident(&format!("{}_key", matches_table(app)));
        // a null goid is a key value of its own
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                name   TEXT NOT NULL,
                count  INTEGER NOT NULL,
                goid   TEXT,
                dbid   TEXT NOT NULL,
                goname TEXT
             );
             CREATE UNIQUE INDEX {index} ON {table} (dbid, ifnull(goid, ''));"
        ))?;
        Ok(())
    }

    fn insert_match(&mut self, app: &AppName, record: &MatchRecord) -> Result<(), IprError> {
        self.writable()?;
        self.conn
            .prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (name, count, goid, dbid, goname)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                quote_ident(&matches_table(app))
            ))?
            .execute(params![
                record.name,
                record.count,
                record.go_id,
                record.db_id,
                record.go_name
            ])?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IprError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn close_writing(&mut self, go: &GoStatus) -> Result<(), IprError> {
        self.writable()?;
        self.commit()?;
        if !go.is_enabled() {
            self.clear_go_names()?;
        }
        let go_value = match go {
            GoStatus::Enabled => GO_ENABLED.to_string(),
            GoStatus::Disabled(reason) => reason.clone(),
        };
        self.conn.execute(
            &format!("INSERT OR REPLACE INTO {META_TABLE} (key, value) VALUES ('go_lookup', ?1)"),
            params![go_value],
        )?;
        self.conn.execute(
            &format!("INSERT OR REPLACE INTO {META_TABLE} (key, value) VALUES ('populated', '1')"),
            [],
        )?;
        self.read_only = true;
        debug!("durable cache closed for writing");
        Ok(())
    }

    fn count_len(&self, app: &AppName) -> Result<usize, IprError> {
        let table = counts_table(app);
        if !self.table_exists(&table)? {
            return Ok(0);
        }
        let len: i64 = self.conn.query_row(
            &format!("SELECT count(1) FROM {}", quote_ident(&table)),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(len).unwrap_or(0))
    }

    fn match_len(&self, app: &AppName) -> Result<usize, IprError> {
        let table = matches_table(app);
        if !self.table_exists(&table)? {
            return Ok(0);
        }
        let len: i64 = self.conn.query_row(
            &format!("SELECT count(1) FROM {}", quote_ident(&table)),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(len).unwrap_or(0))
    }

    fn match_row(&self, app: &AppName, index: usize) -> Result<Option<MatchRecord>, IprError> {
        let table = matches_table(app);
        if !self.table_exists(&table)? {
            return Ok(None);
        }
        let offset = i64::try_from(index).unwrap_or(i64::MAX);
        let row = self
            .conn
            .prepare_cached(&format!(
                "SELECT name, count, goid, dbid, goname FROM {}
                 ORDER BY rowid LIMIT 1 OFFSET ?1",
                quote_ident(&table)
            ))?
            .query_row(params![offset], |row| {
                Ok(MatchRecord {
                    name: row.get(0)?,
                    count: row.get(1)?,
                    go_id: row.get(2)?,
                    db_id: row.get(3)?,
                    go_name: row.get(4)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    fn counts(&self, app: &AppName, limit: usize) -> Result<Vec<CountRecord>, IprError> {
        let table = counts_table(app);
        if !self.table_exists(&table)? {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(-1);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT name, count FROM {} ORDER BY rowid LIMIT ?1",
            quote_ident(&table)
        ))?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(CountRecord {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
