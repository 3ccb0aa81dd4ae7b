use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{AppName, BackendKind, ChartGenerator, ChartType};
use crate::error::IprError;

pub const CONFIG_FILE_NAME: &str = "iprstats.json";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_LOCAL_DB: &str = "iprstats.db";
pub const DEFAULT_GO_DB: &str = "go-basic.obo";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default = "default_apps")]
    pub apps: Vec<String>,
    #[serde(default = "default_max_table_results")]
    pub max_table_results: i64,
    #[serde(default = "default_max_chart_results")]
    pub max_chart_results: i64,
    #[serde(default)]
    pub chart_type: Option<ChartType>,
    #[serde(default)]
    pub chart_generator: Option<ChartGenerator>,
    #[serde(default)]
    pub cache_backend: Option<BackendKind>,
    #[serde(default)]
    pub local_db: LocalDbEntry,
    #[serde(default)]
    pub go_db: GoDbEntry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: Some(1),
            apps: default_apps(),
            max_table_results: default_max_table_results(),
            max_chart_results: default_max_chart_results(),
            chart_type: Some(ChartType::Bar),
            chart_generator: Some(ChartGenerator::Svg),
            cache_backend: Some(BackendKind::Durable),
            local_db: LocalDbEntry::default(),
            go_db: GoDbEntry::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DbEntry {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub passwd: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub db: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LocalDbEntry {
    #[serde(flatten)]
    pub connection: DbEntry,
    #[serde(default = "default_true")]
    pub use_sqlite: bool,
}

impl Default for LocalDbEntry {
    fn default() -> Self {
        Self {
            connection: DbEntry::default(),
            use_sqlite: true,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GoDbEntry {
    #[serde(flatten)]
    pub connection: DbEntry,
    #[serde(default)]
    pub go_lookup: bool,
}

/// Connection details for a relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub host: String,
    pub user: String,
    pub passwd: String,
    pub port: u16,
    pub db: String,
}

impl DbSettings {
    fn from_entry(entry: DbEntry, default_db: &str) -> Self {
        Self {
            host: entry
                .host
                .filter(|host| !host.trim().is_empty())
                .unwrap_or_else(|| "localhost".to_string()),
            user: entry.user.unwrap_or_default(),
            passwd: entry.passwd.unwrap_or_default(),
            port: entry.port.filter(|port| *port > 0).unwrap_or(DEFAULT_MYSQL_PORT),
            db: entry
                .db
                .filter(|db| !db.trim().is_empty())
                .unwrap_or_else(|| default_db.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartSettings {
    pub max_results: i64,
    pub chart_type: ChartType,
    pub generator: ChartGenerator,
    pub scale: u32,
}

impl ChartSettings {
    pub fn max_results(&self) -> i64 {
        self.max_results
    }
}

/// Storage engines the running process can actually reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub sqlite: bool,
    pub server: bool,
}

impl Capabilities {
    pub fn embedded() -> Self {
        Self {
            sqlite: true,
            server: false,
        }
    }

    pub fn with_server(self) -> Self {
        Self {
            server: true,
            ..self
        }
    }
}

/// Resolved, validated settings. The cache only reads from this.
#[derive(Debug, Clone)]
pub struct Settings {
    pub schema_version: u32,
    apps: Vec<AppName>,
    max_table_results: i64,
    chart: ChartSettings,
    backend: BackendKind,
    local_db: DbSettings,
    go_db: DbSettings,
    use_sqlite: bool,
    go_lookup: bool,
}

impl Settings {
    pub fn apps(&self) -> &[AppName] {
        &self.apps
    }

    pub fn has_app(&self, app: &str) -> bool {
        self.apps.iter().any(|known| known == app)
    }

    pub fn max_table_results(&self) -> i64 {
        self.max_table_results
    }

    pub fn chart(&self) -> &ChartSettings {
        &self.chart
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn local_db(&self) -> &DbSettings {
        &self.local_db
    }

    pub fn go_db(&self) -> &DbSettings {
        &self.go_db
    }

    pub fn use_sqlite(&self) -> bool {
        self.use_sqlite
    }

    pub fn go_lookup(&self) -> bool {
        self.go_lookup
    }

    pub fn with_limits(mut self, max_table_results: i64, max_chart_results: i64) -> Self {
        self.max_table_results = max_table_results;
        self.chart.max_results = max_chart_results;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `<data_dir>/iprstats.json` when no path is given.
    /// A missing default file is created from the built-in defaults.
    pub fn resolve(
        path: Option<&Path>,
        data_dir: &Path,
        capabilities: Capabilities,
    ) -> Result<Settings, IprError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => data_dir.join(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            Self::write_default(&config_path)?;
            info!(path = %config_path.display(), "wrote default configuration");
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IprError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IprError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, capabilities)
    }

    pub fn write_default(path: &Path) -> Result<(), IprError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| IprError::Filesystem(err.to_string()))?;
        }
        let content = serde_json::to_vec_pretty(&Config::default())
            .map_err(|err| IprError::ConfigParse(err.to_string()))?;
        fs::write(path, content).map_err(|err| IprError::Filesystem(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        capabilities: Capabilities,
    ) -> Result<Settings, IprError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let apps = config
            .apps
            .iter()
            .map(|value| value.parse::<AppName>())
            .collect::<Result<Vec<_>, IprError>>()?;
        if apps.is_empty() {
            return Err(IprError::ConfigInvalid(
                "at least one member database must be listed in apps".to_string(),
            ));
        }
        // cache table names are case-insensitive
        let mut seen = HashSet::new();
        if let Some(duplicate) = apps
            .iter()
            .find(|app| !seen.insert(app.as_str().to_ascii_lowercase()))
        {
            return Err(IprError::ConfigInvalid(format!(
                "member database listed twice: {duplicate}"
            )));
        }

        let use_sqlite = config.local_db.use_sqlite;
        if !capabilities.sqlite && !capabilities.server {
            return Err(IprError::EngineUnavailable(
                "no relational engine is available".to_string(),
            ));
        }
        if use_sqlite && !capabilities.sqlite {
            return Err(IprError::EngineUnavailable("sqlite".to_string()));
        }
        if !use_sqlite && !capabilities.server {
            return Err(IprError::EngineUnavailable(
                "server database (use_sqlite = false)".to_string(),
            ));
        }

        Ok(Settings {
            schema_version,
            apps,
            max_table_results: config.max_table_results,
            chart: ChartSettings {
                max_results: config.max_chart_results,
                chart_type: config.chart_type.unwrap_or(ChartType::Bar),
                generator: config.chart_generator.unwrap_or(ChartGenerator::Svg),
                scale: 200,
            },
            backend: config.cache_backend.unwrap_or(BackendKind::Durable),
            local_db: DbSettings::from_entry(config.local_db.connection, DEFAULT_LOCAL_DB),
            go_db: DbSettings::from_entry(config.go_db.connection, DEFAULT_GO_DB),
            use_sqlite,
            go_lookup: config.go_db.go_lookup,
        })
    }
}

pub fn default_apps() -> Vec<String> {
    [
        "PFAM",
        "PIR",
        "HAMAP",
        "PANTHER",
        "PRINTS",
        "PRODOM",
        "PROSITE",
        "PROFILE",
        "SMART",
        "SUPERFAMILY",
        "TIGRFAMs",
        "GENE3D",
    ]
    .iter()
    .map(|app| app.to_string())
    .collect()
}

fn default_max_table_results() -> i64 {
    -1
}

fn default_max_chart_results() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_db_settings() {
        let settings =
            ConfigLoader::resolve_config(Config::default(), Capabilities::embedded()).unwrap();
        assert_eq!(settings.local_db().host, "localhost");
        assert_eq!(settings.local_db().port, DEFAULT_MYSQL_PORT);
        assert_eq!(settings.local_db().db, "iprstats.db");
        assert_eq!(settings.go_db().db, "go-basic.obo");
        assert!(settings.use_sqlite());
        assert!(!settings.go_lookup());
    }
}
