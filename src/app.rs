use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::chart::Chart;
use crate::config::Settings;
use crate::domain::{AppName, BackendKind, MatchRecord, SessionId};
use crate::error::IprError;
use crate::export::{HtmlExporter, IpsArchive, XlsExporter};
use crate::go::{GoClient, GoConnector, GoStatus, OboGoLookup};
use crate::importer::{ImportJob, ImportSummary};
use crate::source::SourceConnector;
use crate::store::{Session, SessionInfo, SessionStore};

const IMPORT_POLL: Duration = Duration::from_millis(100);
pub const GO_OBO_FILE_NAME: &str = "go-basic.obo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSinkKind {
    Open,
    Show,
    Export,
    Sessions,
    Go,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// A session whose cache is ready for browsing or export.
pub struct LoadedSession {
    pub session: Session,
    pub cache: Cache,
    pub import: Option<ImportSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub path: String,
    pub backend: BackendKind,
    pub go_lookup: String,
    pub import: Option<ImportSummary>,
    pub apps: Vec<AppSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppSummary {
    pub app: String,
    pub count_rows: usize,
    pub match_rows: usize,
    pub top: Vec<MatchRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub session: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub session: Option<String>,
    pub cleared: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoFetchResult {
    pub path: String,
    pub terms: usize,
    pub version: Option<String>,
    pub date: Option<String>,
}

#[derive(Clone)]
pub struct App<S: SourceConnector, G: GoConnector> {
    store: SessionStore,
    settings: Settings,
    server: S,
    go: G,
}

impl<S: SourceConnector, G: GoConnector> App<S, G> {
    pub fn new(store: SessionStore, settings: Settings, server: S, go: G) -> Self {
        Self {
            store,
            settings,
            server,
            go,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Imports `path` into a fresh session on a worker thread, then builds
    /// the cache and the session charts. A failed import or population
    /// removes the session again.
    pub fn open_xml(&self, path: &Path, sink: &dyn ProgressSink) -> Result<LoadedSession, IprError> {
        let started = Instant::now();
        let session = self.store.new_session(None)?;
        phase(
            sink,
            format!("phase=Session; new session {}", session.id()),
        );

        let job = ImportJob::spawn(
            path.to_path_buf(),
            session.clone(),
            self.settings.local_db().clone(),
        );
        let mut reported = None;
        let imported = job.wait(IMPORT_POLL, |proteins| {
            if reported != Some(proteins) {
                reported = Some(proteins);
                phase(sink, format!("phase=Import; {proteins} proteins parsed"));
            }
        });
        let import = match imported {
            Ok(summary) => summary,
            Err(err) => {
                self.discard(&session);
                return Err(err);
            }
        };

        let cache = match self.build_cache(&session, sink) {
            Ok(cache) => cache,
            Err(err) => {
                self.discard(&session);
                return Err(err);
            }
        };
        let loaded = LoadedSession {
            session,
            cache,
            import: Some(import),
        };
        self.render_charts(&loaded, sink);
        sink.event(ProgressEvent {
            message: format!("phase=Ready; session {}", loaded.session.id()),
            elapsed: Some(started.elapsed()),
        });
        Ok(loaded)
    }

    /// Restores a saved `.ips` archive and reopens its session.
    pub fn open_archive(
        &self,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<LoadedSession, IprError> {
        phase(sink, format!("phase=Session; unpacking {path}"));
        let id = IpsArchive::open(path, self.store.sessions_dir())?;
        self.reopen_session(&id, sink)
    }

    /// Reuses a completed durable store when there is one; otherwise the
    /// cache is rebuilt from the session schema.
    pub fn reopen_session(
        &self,
        id: &SessionId,
        sink: &dyn ProgressSink,
    ) -> Result<LoadedSession, IprError> {
        let session = self.store.open_session(id)?;
        if self.settings.backend() == BackendKind::Durable && session.has_results() {
            match Cache::reopen(&self.settings, &session) {
                Ok(cache) => {
                    phase(sink, format!("phase=Ready; reopened session {id}"));
                    return Ok(LoadedSession {
                        session,
                        cache,
                        import: None,
                    });
                }
                Err(IprError::NotPopulated(reason)) => {
                    warn!(session = %id, reason = %reason, "cached results incomplete; rebuilding");
                }
                Err(err) => return Err(err),
            }
        }
        let cache = self.build_cache(&session, sink)?;
        phase(sink, format!("phase=Ready; session {id}"));
        Ok(LoadedSession {
            session,
            cache,
            import: None,
        })
    }

    fn build_cache(&self, session: &Session, sink: &dyn ProgressSink) -> Result<Cache, IprError> {
        phase(
            sink,
            format!(
                "phase=Aggregate; {} member databases",
                self.settings.apps().len()
            ),
        );
        let cache = Cache::construct(&self.settings, session, &self.server, &self.go)?;
        if let GoStatus::Disabled(reason) = cache.go_status() {
            phase(sink, format!("phase=Aggregate; GO lookup off: {reason}"));
        }
        Ok(cache)
    }

    /// Writes one chart per app into the session directory. Chart failures
    /// are logged and skipped.
    pub fn render_charts(&self, loaded: &LoadedSession, sink: &dyn ProgressSink) -> Vec<Utf8PathBuf> {
        let settings = self.settings.chart();
        let mut written = Vec::new();
        for app in loaded.cache.apps() {
            let chart = Chart::for_app(app.clone());
            let path = chart.default_path(&loaded.session, settings);
            match chart.save(&loaded.cache, settings, &path) {
                Ok(true) => written.push(path),
                Ok(false) => {}
                Err(err) => warn!(app = %app, error = %err, "chart rendering failed"),
            }
        }
        phase(sink, format!("phase=Chart; {} charts", written.len()));
        written
    }

    pub fn summary(&self, loaded: &LoadedSession, top: usize) -> SessionSummary {
        let cache = &loaded.cache;
        let apps = cache
            .apps()
            .iter()
            .map(|app| {
                let name = app.as_str();
                let match_rows = cache.get_match_length(name);
                AppSummary {
                    app: name.to_string(),
                    count_rows: cache.get_count_length(name),
                    match_rows,
                    top: (0..match_rows.min(top))
                        .map_while(|index| cache.get_one_row(name, index))
                        .collect(),
                }
            })
            .collect();
        SessionSummary {
            session: loaded.session.id().to_string(),
            path: loaded.session.dir().to_string(),
            backend: cache.backend_kind(),
            go_lookup: match cache.go_status() {
                GoStatus::Enabled => "enabled".to_string(),
                GoStatus::Disabled(reason) => format!("disabled ({reason})"),
            },
            import: loaded.import.clone(),
            apps,
        }
    }

    pub fn export_html(
        &self,
        loaded: &LoadedSession,
        directory: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, IprError> {
        phase(sink, format!("phase=Export; html into {directory}"));
        let pages = HtmlExporter::new(&loaded.cache, self.settings.chart()).export(directory)?;
        Ok(ExportResult {
            session: loaded.session.id().to_string(),
            paths: pages.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn export_xls(
        &self,
        loaded: &LoadedSession,
        app: Option<&AppName>,
        path: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, IprError> {
        if let Some(app) = app.filter(|app| !self.settings.has_app(app.as_str())) {
            return Err(IprError::ConfigInvalid(format!(
                "{app} is not a configured member database"
            )));
        }
        phase(sink, "phase=Export; spreadsheet".to_string());
        let written = XlsExporter::new(&loaded.cache).export(app, path)?;
        Ok(ExportResult {
            session: loaded.session.id().to_string(),
            paths: vec![written.display().to_string()],
        })
    }

    pub fn save_session(
        &self,
        id: &SessionId,
        dest: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, IprError> {
        let session = self.store.open_session(id)?;
        phase(sink, format!("phase=Archive; session {id}"));
        let path = IpsArchive::export(&session, dest)?;
        Ok(ExportResult {
            session: id.to_string(),
            paths: vec![path.to_string()],
        })
    }

    pub fn list_sessions(&self) -> Result<SessionList, IprError> {
        Ok(SessionList {
            sessions: self.store.list_sessions()?,
        })
    }

    /// Removes one session, or every session when `id` is `None`.
    pub fn clear_session(&self, id: Option<&SessionId>) -> Result<ClearResult, IprError> {
        let targets = match id {
            Some(id) => vec![id.clone()],
            None => self
                .store
                .list_sessions()?
                .into_iter()
                .filter_map(|info| info.id.parse::<SessionId>().ok())
                .collect(),
        };
        for target in &targets {
            self.store.clear_session(target)?;
        }
        info!(cleared = targets.len(), "sessions cleared");
        Ok(ClearResult {
            session: id.map(ToString::to_string),
            cleared: targets.len(),
        })
    }

    /// Downloads `go-basic.obo` into the data directory.
    pub fn fetch_go_terms(
        &self,
        client: &dyn GoClient,
        sink: &dyn ProgressSink,
    ) -> Result<GoFetchResult, IprError> {
        let destination: PathBuf = self.store.data_dir().join(GO_OBO_FILE_NAME).into();
        phase(sink, "phase=Go; downloading go-basic.obo".to_string());
        let started = Instant::now();
        let bytes = client.download_obo(&destination)?;
        let lookup = OboGoLookup::parse(&bytes);
        sink.event(ProgressEvent {
            message: format!("phase=Go; {} terms", lookup.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(GoFetchResult {
            path: destination.display().to_string(),
            terms: lookup.len(),
            version: lookup.version.clone(),
            date: lookup.date.clone(),
        })
    }

    fn discard(&self, session: &Session) {
        if let Err(err) = self.store.clear_session(session.id()) {
            warn!(session = %session.id(), error = %err, "could not remove failed session");
        }
    }
}
