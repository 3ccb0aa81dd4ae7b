use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{info, warn};

use crate::config::{DbSettings, Settings};
use crate::error::IprError;

pub const GO_BASIC_URL: &str = "http://purl.obolibrary.org/obo/go/go-basic.obo";

static GO_ACCESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^GO:\d{7}$").expect("static regex"));

pub fn is_go_accession(value: &str) -> bool {
    GO_ACCESSION.is_match(value)
}

/// Resolves a GO accession such as `GO:0005515` to its term name.
pub trait GoTermLookup: Send {
    fn term_name(&self, go_id: &str) -> Result<Option<String>, IprError>;
}

pub trait GoConnector {
    fn connect(&self, db: &DbSettings) -> Result<Box<dyn GoTermLookup>, IprError>;
}

/// Explicit lookup state threaded through cache population.
pub enum GoLookup {
    Enabled(Box<dyn GoTermLookup>),
    Disabled(String),
}

impl fmt::Debug for GoLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoLookup::Enabled(_) => write!(f, "Enabled"),
            GoLookup::Disabled(reason) => write!(f, "Disabled({reason})"),
        }
    }
}

impl GoLookup {
    pub fn is_enabled(&self) -> bool {
        matches!(self, GoLookup::Enabled(_))
    }

    /// Looks up `go_id`. A failing lookup disables the state for good.
    pub fn resolve(&mut self, go_id: Option<&str>) -> Option<String> {
        let (GoLookup::Enabled(lookup), Some(go_id)) = (&*self, go_id) else {
            return None;
        };
        if !is_go_accession(go_id) {
            return None;
        }
        match lookup.term_name(go_id) {
            Ok(name) => name,
            Err(err) => {
                warn!(error = %err, "GO lookup failed; disabling GO lookup for this session");
                *self = GoLookup::Disabled(err.to_string());
                None
            }
        }
    }

    /// Status without the connection, for callers that only report it.
    pub fn status(&self) -> GoStatus {
        match self {
            GoLookup::Enabled(_) => GoStatus::Enabled,
            GoLookup::Disabled(reason) => GoStatus::Disabled(reason.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoStatus {
    Enabled,
    Disabled(String),
}

impl GoStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, GoStatus::Enabled)
    }
}

/// Opens the lookup when configured; connection failures disable it.
pub fn connect_go<G: GoConnector + ?Sized>(settings: &Settings, connector: &G) -> GoLookup {
    if !settings.go_lookup() {
        return GoLookup::Disabled("disabled in configuration".to_string());
    }
    match connector.connect(settings.go_db()) {
        Ok(lookup) => GoLookup::Enabled(lookup),
        Err(err) => {
            warn!(error = %err, "cannot connect to GO db; disabling GO lookup");
            GoLookup::Disabled(err.to_string())
        }
    }
}

/// Resolves the configured GO db name against the data directory: an `.obo`
/// file is parsed into memory, anything else is opened as a term database.
#[derive(Debug, Clone)]
pub struct FileGoConnector {
    data_dir: Utf8PathBuf,
}

impl FileGoConnector {
    pub fn new(data_dir: Utf8PathBuf) -> Self {
        Self { data_dir }
    }
}

impl GoConnector for FileGoConnector {
    fn connect(&self, db: &DbSettings) -> Result<Box<dyn GoTermLookup>, IprError> {
        let path = self.data_dir.join(&db.db);
        if !path.as_std_path().exists() {
            return Err(IprError::LookupUnavailable(format!("{path} does not exist")));
        }
        if path.extension() == Some("obo") {
            Ok(Box::new(OboGoLookup::from_path(path.as_std_path())?))
        } else {
            Ok(Box::new(SqliteGoLookup::open(path.as_std_path())?))
        }
    }
}

/// GO term database with the `term` / `term_definition` layout.
pub struct SqliteGoLookup {
    conn: Connection,
}

impl SqliteGoLookup {
    pub fn open(path: &Path) -> Result<Self, IprError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|err| IprError::LookupUnavailable(err.to_string()))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl GoTermLookup for SqliteGoLookup {
    fn term_name(&self, go_id: &str) -> Result<Option<String>, IprError> {
        let name = self
            .conn
            .query_row(
                "SELECT name, term_definition
                 FROM term JOIN term_definition ON id = term_id
                 WHERE acc = ?1",
                params![go_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| IprError::LookupUnavailable(err.to_string()))?;
        Ok(name)
    }
}

/// In-memory term table built from an OBO flat file.
#[derive(Debug, Clone, Default)]
pub struct OboGoLookup {
    names: HashMap<String, String>,
    pub version: Option<String>,
    pub date: Option<String>,
}

impl OboGoLookup {
    pub fn from_path(path: &Path) -> Result<Self, IprError> {
        let content = fs::read(path).map_err(|err| IprError::LookupUnavailable(err.to_string()))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &[u8]) -> Self {
        let (version, date) = parse_go_header(content);
        let text = String::from_utf8_lossy(content);
        let mut names = HashMap::new();
        let mut in_term = false;
        let mut current_id: Option<String> = None;
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                in_term = line == "[Term]";
                current_id = None;
                continue;
            }
            if !in_term {
                continue;
            }
            if let Some(value) = line.strip_prefix("id:") {
                current_id = Some(value.trim().to_string()).filter(|id| is_go_accession(id));
            } else if let Some(value) = line.strip_prefix("name:") {
                if let Some(id) = current_id.take() {
                    names.insert(id, value.trim().to_string());
                }
            }
        }
        Self {
            names,
            version,
            date,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl GoTermLookup for OboGoLookup {
    fn term_name(&self, go_id: &str) -> Result<Option<String>, IprError> {
        Ok(self.names.get(go_id).cloned())
    }
}

pub trait GoClient: Send + Sync {
    fn download_obo(&self, destination: &Path) -> Result<Vec<u8>, IprError>;
}

#[derive(Clone)]
pub struct GoHttpClient {
    client: Client,
}

impl GoHttpClient {
    pub fn new() -> Result<Self, IprError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("iprstats/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IprError::GoHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| IprError::GoHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl GoClient for GoHttpClient {
    fn download_obo(&self, destination: &Path) -> Result<Vec<u8>, IprError> {
        info!(url = GO_BASIC_URL, "downloading GO terms");
        let response = self
            .client
            .get(GO_BASIC_URL)
            .send()
            .map_err(|err| IprError::GoHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GO request failed".to_string());
            return Err(IprError::GoStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| IprError::GoHttp(err.to_string()))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| IprError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| IprError::Filesystem(err.to_string()))?;
        file.write_all(&bytes)
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

pub fn parse_go_header(content: &[u8]) -> (Option<String>, Option<String>) {
    let mut version = None;
    let mut date = None;
    let text = String::from_utf8_lossy(content);
    for line in text.lines().take(50) {
        if let Some(value) = line.strip_prefix("data-version:") {
            version = Some(value.trim().to_string());
        }
        if let Some(value) = line.strip_prefix("date:") {
            date = Some(value.trim().to_string());
        }
    }
    (version, date)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBO: &str = "format-version: 1.2\n\
data-version: releases/2024-01-17\n\
date: 17:01:2024 10:00\n\
\n\
[Term]\n\
id: GO:0005515\n\
name: protein binding\n\
namespace: molecular_function\n\
\n\
[Typedef]\n\
id: part_of\n\
name: part of\n";

    #[test]
    fn obo_terms_only() {
        let lookup = OboGoLookup::parse(OBO.as_bytes());
        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.version.as_deref(), Some("releases/2024-01-17"));
        assert_eq!(
            lookup.term_name("GO:0005515").unwrap().as_deref(),
            Some("protein binding")
        );
        assert_eq!(lookup.term_name("part_of").unwrap(), None);
        assert!(!is_go_accession("GO:123"));
    }
}
