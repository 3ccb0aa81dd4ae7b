use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use iprstats::cache::{
    Cache, CacheBackend, DurableBackend, GoFallback, LinkTable, MemoryBackend, populate,
};
use iprstats::config::{Capabilities, Config, ConfigLoader, Settings};
use iprstats::domain::{AppName, BackendKind, CellValue, CountRecord, MatchRecord};
use iprstats::error::IprError;
use iprstats::go::{GoLookup, GoStatus, GoTermLookup};
use iprstats::source::{AnnotationSource, Engine, SourceMatchRow};
use iprstats::store::SessionStore;

#[derive(Default)]
struct FixedSource {
    counts: HashMap<String, Vec<CountRecord>>,
    matches: HashMap<String, Vec<SourceMatchRow>>,
}

impl FixedSource {
    fn pfam() -> Self {
        let mut source = Self::default();
        source.counts.insert(
            "PFAM".to_string(),
            vec![count("nameA", 50), count("nameB", 30), count("nameC", 30)],
        );
        source.matches.insert(
            "PFAM".to_string(),
            vec![
                row("nameA", "PF01", None, 50),
                row("nameB", "PF02", Some("GO:0005515"), 30),
                row("nameC", "PF03", Some("GO:0016301"), 30),
            ],
        );
        source
    }
}

impl AnnotationSource for FixedSource {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn count_rows(&mut self, app: &AppName) -> Result<Vec<CountRecord>, IprError> {
        Ok(self.counts.get(app.as_str()).cloned().unwrap_or_default())
    }

    fn match_rows(&mut self, app: &AppName) -> Result<Vec<SourceMatchRow>, IprError> {
        Ok(self.matches.get(app.as_str()).cloned().unwrap_or_default())
    }
}

/// Answers from a fixed table; fails every call after `fail_after` calls.
struct FixedGo {
    names: HashMap<String, String>,
    calls: AtomicUsize,
    fail_after: usize,
}

impl FixedGo {
    fn new(fail_after: usize) -> Self {
        let names = [
            ("GO:0005515", "protein binding"),
            ("GO:0016301", "kinase activity"),
        ]
        .into_iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();
        Self {
            names,
            calls: AtomicUsize::new(0),
            fail_after,
        }
    }
}

impl GoTermLookup for FixedGo {
    fn term_name(&self, go_id: &str) -> Result<Option<String>, IprError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
            return Err(IprError::LookupUnavailable("connection lost".to_string()));
        }
        Ok(self.names.get(go_id).cloned())
    }
}

fn count(name: &str, count: i64) -> CountRecord {
    CountRecord {
        name: name.to_string(),
        count,
    }
}

fn row(name: &str, db_id: &str, go_id: Option<&str>, count: i64) -> SourceMatchRow {
    SourceMatchRow {
        name: name.to_string(),
        db_id: db_id.to_string(),
        go_id: go_id.map(str::to_string),
        count,
    }
}

fn settings(apps: &[&str], max_table: i64, max_chart: i64) -> Settings {
    let config = Config {
        apps: apps.iter().map(|app| app.to_string()).collect(),
        ..Config::default()
    };
    ConfigLoader::resolve_config(config, Capabilities::embedded())
        .unwrap()
        .with_limits(max_table, max_chart)
}

/// Builds the same cache on each backend.
fn build_all(
    settings: &Settings,
    source: impl Fn() -> FixedSource,
    go: impl Fn() -> GoLookup,
) -> (tempfile::TempDir, Vec<Cache>) {
    let temp = tempfile::tempdir().unwrap();
    let backends: Vec<Box<dyn CacheBackend>> = vec![
        Box::new(MemoryBackend::new()),
        Box::new(DurableBackend::create(&temp.path().join("results")).unwrap()),
    ];
    let caches = backends
        .into_iter()
        .map(|backend| Cache::from_source(settings, &mut source(), go(), backend).unwrap())
        .collect();
    (temp, caches)
}

fn disabled() -> GoLookup {
    GoLookup::Disabled("disabled in configuration".to_string())
}

#[test]
fn ranked_rows_and_links() {
    let settings = settings(&["PFAM", "PIR"], -1, 10);
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, disabled);

    for cache in &caches {
        assert_eq!(cache.get_match_length("PFAM"), 3);
        assert_eq!(
            cache.get_one_row("PFAM", 0),
            Some(MatchRecord {
                name: "nameA".to_string(),
                count: 50,
                go_id: None,
                db_id: "PF01".to_string(),
                go_name: None,
            })
        );
        assert_eq!(cache.get_one_row("PFAM", 1).unwrap().name, "nameB");
        assert_eq!(
            cache.get_url("PFAM", 0, false).as_deref(),
            Some("http://pfam.janelia.org/family?acc=PF01")
        );
        assert_eq!(cache.get_url("PFAM", 0, true), None);
        assert_eq!(
            cache.get_url("PFAM", 1, true).as_deref(),
            Some("http://www.ebi.ac.uk/QuickGO/GTerm?id=GO:0005515#ancchart")
        );
        assert_eq!(
            cache.get_one_cell("PFAM", 2, 1),
            Some(CellValue::Integer(30))
        );
        assert_eq!(cache.get_one_cell("PFAM", 2, 9), None);
    }
    assert_eq!(caches[0].backend_kind(), BackendKind::Memory);
    assert_eq!(caches[1].backend_kind(), BackendKind::Durable);
}

#[test]
fn empty_app_has_no_rows() {
    let settings = settings(&["PFAM", "PIR"], -1, -1);
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, disabled);

    for cache in &caches {
        assert_eq!(cache.get_match_length("PIR"), 0);
        assert_eq!(cache.get_count_length("PIR"), 0);
        assert_eq!(cache.get_one_row("PIR", 0), None);
        assert_eq!(cache.get_url("PIR", 0, false), None);
        assert_eq!(cache.get_counts("PIR"), None);
    }
}

#[test]
fn unknown_app_reads_as_empty() {
    let settings = settings(&["PFAM"], -1, -1);
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, disabled);

    for cache in &caches {
        assert_eq!(cache.get_match_length("SMART"), 0);
        assert_eq!(cache.get_count_length("nope\"; --"), 0);
        assert_eq!(cache.get_one_row("SMART", 0), None);
        assert_eq!(cache.get_counts("SMART"), None);
    }
}

#[test]
fn limits_clip_lengths() {
    let settings = settings(&["PFAM"], 2, 1);
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, disabled);

    for cache in &caches {
        assert_eq!(cache.get_match_length("PFAM"), 2);
        assert_eq!(cache.get_one_row("PFAM", 2), None);
        assert_eq!(cache.get_url("PFAM", 2, false), None);
        assert_eq!(cache.get_count_length("PFAM"), 1);
        assert_eq!(
            cache.get_counts("PFAM"),
            Some((vec![50], vec!["nameA".to_string()]))
        );
    }
}

#[test]
fn counts_follow_rank_order() {
    let settings = settings(&["PFAM"], -1, -1);
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, disabled);

    for cache in &caches {
        let (values, labels) = cache.get_counts("PFAM").unwrap();
        assert_eq!(values, vec![50, 30, 30]);
        assert_eq!(labels, vec!["nameA", "nameB", "nameC"]);
    }
}

#[test]
fn duplicate_keys_keep_first_record() {
    let settings = settings(&["PFAM"], -1, -1);
    let source = || {
        let mut source = FixedSource::pfam();
        source.counts.get_mut("PFAM").unwrap().push(count("nameA", 1));
        let matches = source.matches.get_mut("PFAM").unwrap();
        matches.push(row("renamed", "PF01", None, 1));
        matches.push(row("nameB", "PF02", Some("GO:0005515"), 99));
        matches.push(row("nameB", "PF02", Some("GO:0000001"), 30));
        source
    };
    let (_temp, caches) = build_all(&settings, source, disabled);

    for cache in &caches {
        assert_eq!(cache.get_count_length("PFAM"), 3);
        assert_eq!(cache.get_match_length("PFAM"), 4);
        assert_eq!(cache.get_one_row("PFAM", 0).unwrap().name, "nameA");
        assert_eq!(cache.get_one_row("PFAM", 1).unwrap().count, 30);
        assert_eq!(
            cache.get_one_row("PFAM", 3).unwrap().go_id.as_deref(),
            Some("GO:0000001")
        );
    }
}

#[test]
fn go_names_resolved() {
    let settings = settings(&["PFAM"], -1, -1);
    let enabled = || GoLookup::Enabled(Box::new(FixedGo::new(usize::MAX)));
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, enabled);

    for cache in &caches {
        assert_eq!(cache.go_status(), &GoStatus::Enabled);
        assert_eq!(cache.get_one_row("PFAM", 0).unwrap().go_name, None);
        assert_eq!(
            cache.get_one_row("PFAM", 1).unwrap().go_name.as_deref(),
            Some("protein binding")
        );
        assert_eq!(
            cache.get_one_cell("PFAM", 2, 4),
            Some(CellValue::Text("kinase activity".to_string()))
        );
    }
}

#[test]
fn failing_lookup_disables_go_for_the_session() {
    let settings = settings(&["PFAM"], -1, -1);
    let flaky = || GoLookup::Enabled(Box::new(FixedGo::new(1)));
    let (_temp, caches) = build_all(&settings, FixedSource::pfam, flaky);

    for cache in &caches {
        assert_matches!(cache.go_status(), GoStatus::Disabled(reason) if reason.contains("connection lost"));
        // the name resolved before the failure is dropped too
        let second = cache.get_one_row("PFAM", 1).unwrap();
        assert_eq!(second.go_id.as_deref(), Some("GO:0005515"));
        assert_eq!(second.go_name, None);
        let third = cache.get_one_row("PFAM", 2).unwrap();
        assert_eq!(third.go_id.as_deref(), Some("GO:0016301"));
        assert_eq!(third.go_name, None);
    }
}

#[test]
fn unknown_template_fallback() {
    let settings = settings(&["COILS"], -1, -1);
    let source = || {
        let mut source = FixedSource::default();
        source
            .matches
            .insert("COILS".to_string(), vec![row("Coil", "Coil", None, 4)]);
        source
    };
    let (_temp, caches) = build_all(&settings, source, disabled);
    let mut caches = caches.into_iter();

    let cache = caches.next().unwrap();
    assert_eq!(
        cache.get_url("COILS", 0, false).as_deref(),
        Some("http://www.ebi.ac.uk/QuickGO/GTerm?id=Coil#ancchart")
    );
    let cache = cache.with_go_fallback(GoFallback::NoLink);
    assert_eq!(cache.get_url("COILS", 0, false), None);

    let cache = caches
        .next()
        .unwrap()
        .with_links(LinkTable::default().with_template("COILS", "https://coils.example/%s"));
    assert_eq!(
        cache.get_url("COILS", 0, false).as_deref(),
        Some("https://coils.example/Coil")
    );
}

#[test]
fn closed_backend_rejects_writes() {
    let temp = tempfile::tempdir().unwrap();
    let app: AppName = "PFAM".parse().unwrap();
    let backends: Vec<Box<dyn CacheBackend>> = vec![
        Box::new(MemoryBackend::new()),
        Box::new(DurableBackend::create(&temp.path().join("results")).unwrap()),
    ];
    for mut backend in backends {
        let mut go = disabled();
        populate(
            &mut FixedSource::pfam(),
            &mut go,
            backend.as_mut(),
            std::slice::from_ref(&app),
        )
        .unwrap();
        let err = backend.insert_count(&app, &count("late", 1)).unwrap_err();
        assert_matches!(err, IprError::CacheClosed);
        let err = backend.create_match_group(&app).unwrap_err();
        assert_matches!(err, IprError::CacheClosed);
        assert_eq!(backend.match_len(&app).unwrap(), 3);
    }
}

#[test]
fn durable_store_reopens_without_source() {
    let temp = tempfile::tempdir().unwrap();
    let store = SessionStore::new_with_paths(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
    let session = store.new_session(None).unwrap();
    let settings = settings(&["PFAM", "PIR"], -1, -1);

    let backend = DurableBackend::create(session.results_path().as_std_path()).unwrap();
    let flaky = GoLookup::Enabled(Box::new(FixedGo::new(0)));
    let built =
        Cache::from_source(&settings, &mut FixedSource::pfam(), flaky, Box::new(backend)).unwrap();
    let expected: Vec<_> = (0..3).map(|index| built.get_one_row("PFAM", index)).collect();
    drop(built);

    let reopened = Cache::reopen(&settings, &session).unwrap();
    let rows: Vec<_> = (0..3).map(|index| reopened.get_one_row("PFAM", index)).collect();
    assert_eq!(rows, expected);
    assert_eq!(reopened.get_count_length("PFAM"), 3);
    assert_matches!(reopened.go_status(), GoStatus::Disabled(_));
}

#[test]
fn interrupted_population_is_not_reopened() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("results");

    let err = DurableBackend::open_populated(&path).err().unwrap();
    assert_matches!(err, IprError::NotPopulated(_));

    let app: AppName = "PFAM".parse().unwrap();
    let mut backend = DurableBackend::create(&path).unwrap();
    backend.create_count_group(&app).unwrap();
    backend.insert_count(&app, &count("nameA", 50)).unwrap();
    backend.commit().unwrap();
    drop(backend);

    let err = DurableBackend::open_populated(&path).err().unwrap();
    assert_matches!(err, IprError::NotPopulated(_));
}
