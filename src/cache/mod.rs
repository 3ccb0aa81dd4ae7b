//! Aggregation cache over the session schema.
//!
//! The count and match queries run once per app at construction time; the
//! results live in a [`CacheBackend`] and are read back through a
//! paginated accessor surface that never fails. Read-path backend errors
//! are logged and reported as "no data".

mod durable;
mod links;
mod memory;

pub use durable::DurableBackend;
pub use links::{GO_TEMPLATE, GoFallback, LinkTable};
pub use memory::MemoryBackend;

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::domain::{AppName, BackendKind, CellValue, CountRecord, MatchRecord};
use crate::error::IprError;
use crate::go::{GoConnector, GoLookup, GoStatus, connect_go};
use crate::source::{AnnotationSource, SourceConnector, connect_store};
use crate::store::Session;

/// Storage strategy for populated records.
///
/// Writers call `create_*_group` before inserting an app's rows and
/// `commit` after each group. `close_writing` ends population; afterwards
/// every write fails with [`IprError::CacheClosed`].
pub trait CacheBackend: Send {
    fn kind(&self) -> BackendKind;

    fn create_count_group(&mut self, app: &AppName) -> Result<(), IprError>;

    /// Duplicate names are silently dropped.
    fn insert_count(&mut self, app: &AppName, record: &CountRecord) -> Result<(), IprError>;

    fn create_match_group(&mut self, app: &AppName) -> Result<(), IprError>;

    /// Duplicate `(db_id, go_id)` keys are silently dropped; the first
    /// record wins.
    fn insert_match(&mut self, app: &AppName, record: &MatchRecord) -> Result<(), IprError>;

    fn commit(&mut self) -> Result<(), IprError>;

    fn close_writing(&mut self, go: &GoStatus) -> Result<(), IprError>;

    fn count_len(&self, app: &AppName) -> Result<usize, IprError>;

    fn match_len(&self, app: &AppName) -> Result<usize, IprError>;

    fn match_row(&self, app: &AppName, index: usize) -> Result<Option<MatchRecord>, IprError>;

    fn counts(&self, app: &AppName, limit: usize) -> Result<Vec<CountRecord>, IprError>;
}

pub fn open_backend(kind: BackendKind, session: &Session) -> Result<Box<dyn CacheBackend>, IprError> {
    match kind {
        BackendKind::Memory => Ok(Box::new(MemoryBackend::new())),
        BackendKind::Durable => Ok(Box::new(DurableBackend::create(
            session.results_path().as_std_path(),
        )?)),
    }
}

/// Runs the count and match queries for every app, in order, into `backend`.
pub fn populate(
    source: &mut dyn AnnotationSource,
    go: &mut GoLookup,
    backend: &mut dyn CacheBackend,
    apps: &[AppName],
) -> Result<(), IprError> {
    for app in apps {
        backend.create_count_group(app)?;
        let counts = source.count_rows(app)?;
        for record in &counts {
            backend.insert_count(app, record)?;
        }
        backend.commit()?;

        backend.create_match_group(app)?;
        let matches = source.match_rows(app)?;
        for row in matches {
            let go_name = go.resolve(row.go_id.as_deref());
            backend.insert_match(
                app,
                &MatchRecord {
                    name: row.name,
                    count: row.count,
                    go_id: row.go_id,
                    db_id: row.db_id,
                    go_name,
                },
            )?;
        }
        backend.commit()?;
        debug!(
            app = %app,
            counts = counts.len(),
            engine = %source.engine(),
            "populated app"
        );
    }
    backend.close_writing(&go.status())
}

pub struct Cache {
    apps: Vec<AppName>,
    max_table_results: i64,
    max_chart_results: i64,
    backend: Box<dyn CacheBackend>,
    links: LinkTable,
    fallback: GoFallback,
    go: GoStatus,
}

impl Cache {
    /// Connects to the session store (with engine fallback) and the GO
    /// lookup, then populates the configured backend.
    pub fn construct<S, G>(
        settings: &Settings,
        session: &Session,
        server: &S,
        go: &G,
    ) -> Result<Self, IprError>
    where
        S: SourceConnector + ?Sized,
        G: GoConnector + ?Sized,
    {
        let mut source = connect_store(settings, session, server)?;
        let lookup = connect_go(settings, go);
        let backend = open_backend(settings.backend(), session)?;
        info!(
            session = %session.id(),
            engine = %source.engine(),
            backend = %settings.backend(),
            go_lookup = lookup.is_enabled(),
            "building cache"
        );
        Self::from_source(settings, source.as_mut(), lookup, backend)
    }

    pub fn from_source(
        settings: &Settings,
        source: &mut dyn AnnotationSource,
        mut go: GoLookup,
        mut backend: Box<dyn CacheBackend>,
    ) -> Result<Self, IprError> {
        populate(source, &mut go, backend.as_mut(), settings.apps())?;
        Ok(Self::with_backend(settings, backend, go.status()))
    }

    /// Reopens a durable store left by a completed population without
    /// touching the session schema.
    pub fn reopen(settings: &Settings, session: &Session) -> Result<Self, IprError> {
        let (backend, go) = DurableBackend::open_populated(session.results_path().as_std_path())?;
        info!(session = %session.id(), "reopened cached results");
        Ok(Self::with_backend(settings, Box::new(backend), go))
    }

    pub fn with_backend(settings: &Settings, backend: Box<dyn CacheBackend>, go: GoStatus) -> Self {
        Self {
            apps: settings.apps().to_vec(),
            max_table_results: settings.max_table_results(),
            max_chart_results: settings.chart().max_results(),
            backend,
            links: LinkTable::default(),
            fallback: GoFallback::default(),
            go,
        }
    }

    pub fn with_links(mut self, links: LinkTable) -> Self {
        self.links = links;
        self
    }

    pub fn with_go_fallback(mut self, fallback: GoFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn apps(&self) -> &[AppName] {
        &self.apps
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn go_status(&self) -> &GoStatus {
        &self.go
    }

    fn known(&self, app: &str) -> Option<&AppName> {
        self.apps.iter().find(|known| *known == app)
    }

    pub fn get_count_length(&self, app: &str) -> usize {
        let Some(app) = self.known(app) else {
            return 0;
        };
        let len = absorb(app, self.backend.count_len(app)).unwrap_or(0);
        clip(len, self.max_chart_results)
    }

    pub fn get_match_length(&self, app: &str) -> usize {
        let Some(app) = self.known(app) else {
            return 0;
        };
        let len = absorb(app, self.backend.match_len(app)).unwrap_or(0);
        clip(len, self.max_table_results)
    }

    /// Match record at rank `row`, or `None` past the visible length.
    pub fn get_one_row(&self, app: &str, row: usize) -> Option<MatchRecord> {
        if row >= self.get_match_length(app) {
            return None;
        }
        let app = self.known(app)?;
        absorb(app, self.backend.match_row(app, row)).flatten()
    }

    pub fn get_one_cell(&self, app: &str, row: usize, column: usize) -> Option<CellValue> {
        self.get_one_row(app, row)?.column(column)
    }

    pub fn get_url(&self, app: &str, row: usize, go_link: bool) -> Option<String> {
        let record = self.get_one_row(app, row)?;
        let id = if go_link {
            record.go_id.as_deref()
        } else {
            Some(record.db_id.as_str())
        };
        self.links.resolve(app, id, go_link, self.fallback)
    }

    /// Count values and labels in rank order, or `None` when there is
    /// nothing to chart.
    pub fn get_counts(&self, app: &str) -> Option<(Vec<i64>, Vec<String>)> {
        let len = self.get_count_length(app);
        if len == 0 {
            return None;
        }
        let app = self.known(app)?;
        let records = absorb(app, self.backend.counts(app, len))?;
        if records.is_empty() {
            return None;
        }
        Some(
            records
                .into_iter()
                .map(|record| (record.count, record.name))
                .unzip(),
        )
    }
}

fn clip(len: usize, max: i64) -> usize {
    // negative means unbounded
    usize::try_from(max).map_or(len, |max| len.min(max))
}

fn absorb<T>(app: &AppName, result: Result<T, IprError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(app = %app, error = %err, "cache read failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_treats_negative_as_unbounded() {
        assert_eq!(clip(7, -1), 7);
        assert_eq!(clip(7, 3), 3);
        assert_eq!(clip(2, 3), 2);
        assert_eq!(clip(7, 0), 0);
    }
}
