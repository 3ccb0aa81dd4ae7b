use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IprError {
    #[error("invalid session id: {0}")]
    #[diagnostic(help("session ids are exactly 8 ASCII letters or digits"))]
    InvalidSessionId(String),

    #[error("invalid member database name: {0}")]
    InvalidAppName(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("storage engine not available: {0}")]
    #[diagnostic(help("set local_db.use_sqlite = true to use the embedded engine"))]
    EngineUnavailable(String),

    #[error("cannot connect to result store: {0}")]
    Connection(String),

    #[error("gene ontology lookup unavailable: {0}")]
    LookupUnavailable(String),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("failed to import {path}: {message}")]
    Import { path: PathBuf, message: String },

    #[error("cache is read-only after population")]
    CacheClosed,

    #[error("session has no populated results: {0}")]
    NotPopulated(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("GO download failed: {0}")]
    GoHttp(String),

    #[error("GO download returned status {status}: {message}")]
    GoStatus { status: u16, message: String },
}
