use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use iprstats::app::{App, ProgressEvent, ProgressSink};
use iprstats::config::{Capabilities, Config, ConfigLoader, GoDbEntry, LocalDbEntry, Settings};
use iprstats::domain::{AppName, BackendKind, SessionId};
use iprstats::error::IprError;
use iprstats::go::{FileGoConnector, GoClient};
use iprstats::source::NoServer;
use iprstats::store::SessionStore;

const SAMPLE: &str = include_str!("data/sample.xml");
const OBO: &str = include_str!("data/go-basic.obo");

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

struct FakeGoClient;

impl GoClient for FakeGoClient {
    fn download_obo(&self, destination: &Path) -> Result<Vec<u8>, IprError> {
        fs::write(destination, OBO).map_err(|err| IprError::Filesystem(err.to_string()))?;
        Ok(OBO.as_bytes().to_vec())
    }
}

struct FailingGoClient;

impl GoClient for FailingGoClient {
    fn download_obo(&self, _destination: &Path) -> Result<Vec<u8>, IprError> {
        Err(IprError::GoStatus {
            status: 503,
            message: "unavailable".to_string(),
        })
    }
}

struct Env {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    xml: Utf8PathBuf,
}

impl Env {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let xml = root.join("sample.xml");
        fs::write(xml.as_std_path(), SAMPLE).unwrap();
        Self {
            _temp: temp,
            root,
            xml,
        }
    }

    fn store(&self) -> SessionStore {
        SessionStore::new_with_paths(self.root.join(".iprstats"))
    }

    fn app(&self, settings: Settings) -> App<NoServer, FileGoConnector> {
        let store = self.store();
        let go = FileGoConnector::new(store.data_dir().to_path_buf());
        App::new(store, settings, NoServer, go)
    }
}

fn config() -> Config {
    Config {
        apps: vec!["PFAM".to_string(), "SMART".to_string(), "PIR".to_string()],
        ..Config::default()
    }
}

fn settings(config: Config) -> Settings {
    ConfigLoader::resolve_config(config, Capabilities::embedded()).unwrap()
}

#[test]
fn open_xml_builds_cache_and_charts() {
    let env = Env::new();
    let app = env.app(settings(config()));
    let sink = RecordingSink::default();

    let loaded = app.open_xml(env.xml.as_std_path(), &sink).unwrap();
    assert_eq!(loaded.import.as_ref().unwrap().proteins, 3);
    assert!(loaded.session.has_results());
    assert!(
        loaded
            .session
            .dir()
            .join("pfam_matchessvgbar.svg")
            .as_std_path()
            .exists()
    );
    // nothing to chart for PIR
    assert!(
        !loaded
            .session
            .dir()
            .join("pir_matchessvgbar.svg")
            .as_std_path()
            .exists()
    );

    let summary = app.summary(&loaded, 2);
    assert_eq!(summary.backend, BackendKind::Durable);
    assert_eq!(summary.apps.len(), 3);
    assert_eq!(summary.apps[0].app, "PFAM");
    assert_eq!(summary.apps[0].count_rows, 2);
    assert_eq!(summary.apps[0].match_rows, 3);
    assert_eq!(summary.apps[0].top.len(), 2);
    assert_eq!(summary.apps[0].top[0].db_id, "PF00069");
    assert_eq!(summary.apps[2].match_rows, 0);
    assert!(summary.go_lookup.starts_with("disabled"));

    let messages = sink.messages();
    assert!(messages[0].starts_with("phase=Session;"));
    assert!(messages.iter().any(|message| message.starts_with("phase=Import;")));
    assert!(messages.iter().any(|message| message == "phase=Chart; 2 charts"));
    assert!(messages.last().unwrap().starts_with("phase=Ready;"));
}

#[test]
fn failed_import_removes_session() {
    let env = Env::new();
    let app = env.app(settings(config()));
    let broken = env.root.join("broken.xml");
    fs::write(broken.as_std_path(), "<protein id=\"P1\"></match>").unwrap();

    let err = app
        .open_xml(broken.as_std_path(), &RecordingSink::default())
        .err()
        .unwrap();
    assert_matches!(err, IprError::Import { .. });
    assert!(app.list_sessions().unwrap().sessions.is_empty());
}

#[test]
fn reopen_uses_completed_results() {
    let env = Env::new();
    let app = env.app(settings(config()));
    let id = {
        let loaded = app.open_xml(env.xml.as_std_path(), &RecordingSink::default()).unwrap();
        loaded.session.id().clone()
    };

    // the source database is not needed once results are complete
    fs::remove_file(env.store().session_dir(&id).join("iprstats.db").as_std_path()).unwrap();

    let sink = RecordingSink::default();
    let reopened = app.reopen_session(&id, &sink).unwrap();
    assert!(reopened.import.is_none());
    assert_eq!(reopened.cache.get_match_length("PFAM"), 3);
    assert!(sink.messages()[0].contains("reopened"));
}

#[test]
fn memory_backend_rebuilds_on_reopen() {
    let env = Env::new();
    let app = env.app(settings(config()).with_backend(BackendKind::Memory));
    let id = app
        .open_xml(env.xml.as_std_path(), &RecordingSink::default())
        .unwrap()
        .session
        .id()
        .clone();

    let reopened = app.reopen_session(&id, &RecordingSink::default()).unwrap();
    assert_eq!(reopened.cache.backend_kind(), BackendKind::Memory);
    assert_eq!(reopened.cache.get_count_length("SMART"), 1);
    assert!(!reopened.session.has_results());
}

#[test]
fn session_without_data_cannot_connect() {
    let env = Env::new();
    let app = env.app(settings(config()));
    let session = app.store().new_session(None).unwrap();

    let err = app
        .reopen_session(session.id(), &RecordingSink::default())
        .err()
        .unwrap();
    assert_matches!(err, IprError::Connection(_));

    let missing: SessionId = "ZZZZzzzz".parse().unwrap();
    let err = app
        .reopen_session(&missing, &RecordingSink::default())
        .err()
        .unwrap();
    assert_matches!(err, IprError::SessionNotFound(_));
}

#[test]
fn unreachable_server_falls_back_to_sqlite() {
    let env = Env::new();
    let server_config = Config {
        local_db: LocalDbEntry {
            use_sqlite: false,
            ..LocalDbEntry::default()
        },
        ..config()
    };
    let settings =
        ConfigLoader::resolve_config(server_config, Capabilities::embedded().with_server())
            .unwrap();
    let app = env.app(settings);

    let loaded = app.open_xml(env.xml.as_std_path(), &RecordingSink::default()).unwrap();
    assert_eq!(loaded.cache.get_match_length("PFAM"), 3);
}

#[test]
fn go_names_from_fetched_terms() {
    let env = Env::new();
    let go_config = Config {
        go_db: GoDbEntry {
            go_lookup: true,
            ..GoDbEntry::default()
        },
        ..config()
    };
    let app = env.app(settings(go_config));

    // no term file yet: lookup is disabled, the import still succeeds
    let before = app.open_xml(env.xml.as_std_path(), &RecordingSink::default()).unwrap();
    assert!(!before.cache.go_status().is_enabled());
    assert_eq!(before.cache.get_one_row("PFAM", 0).unwrap().go_name, None);

    let fetched = app.fetch_go_terms(&FakeGoClient, &RecordingSink::default()).unwrap();
    assert_eq!(fetched.terms, 2);
    assert_eq!(fetched.version.as_deref(), Some("releases/2024-01-17"));
    assert!(Path::new(&fetched.path).exists());

    let after = app.open_xml(env.xml.as_std_path(), &RecordingSink::default()).unwrap();
    assert!(after.cache.go_status().is_enabled());
    assert_eq!(
        after.cache.get_one_row("PFAM", 0).unwrap().go_name.as_deref(),
        Some("protein kinase activity")
    );
}

#[test]
fn go_download_failure_surfaces() {
    let env = Env::new();
    let app = env.app(settings(config()));
    let err = app
        .fetch_go_terms(&FailingGoClient, &RecordingSink::default())
        .unwrap_err();
    assert_matches!(err, IprError::GoStatus { status: 503, .. });
}

#[test]
fn exports_and_archives() {
    let env = Env::new();
    let app = env.app(settings(config()));
    let sink = RecordingSink::default();
    let loaded = app.open_xml(env.xml.as_std_path(), &sink).unwrap();

    let html = app.export_html(&loaded, &env.root.join("report"), &sink).unwrap();
    assert_eq!(html.paths.len(), 3);

    let xls_path = env.root.join("stats.xlsx");
    let xls = app
        .export_xls(&loaded, None, Some(xls_path.as_std_path()), &sink)
        .unwrap();
    assert_eq!(xls.paths, vec![xls_path.to_string()]);

    let unknown: AppName = "GENE3D".parse().unwrap();
    let err = app
        .export_xls(&loaded, Some(&unknown), None, &sink)
        .unwrap_err();
    assert_matches!(err, IprError::ConfigInvalid(_));

    let id = loaded.session.id().clone();
    drop(loaded);
    let saved = app.save_session(&id, &env.root.join("backup"), &sink).unwrap();
    assert_eq!(saved.paths, vec![env.root.join("backup.ips").to_string()]);

    app.clear_session(Some(&id)).unwrap();
    assert!(app.list_sessions().unwrap().sessions.is_empty());

    let restored = app
        .open_archive(&env.root.join("backup.ips"), &sink)
        .unwrap();
    assert_eq!(restored.session.id(), &id);
    assert_eq!(restored.cache.get_match_length("PFAM"), 3);
}

#[test]
fn clear_all_sessions() {
    let env = Env::new();
    let app = env.app(settings(config()));
    for _ in 0..2 {
        app.open_xml(env.xml.as_std_path(), &RecordingSink::default())
            .unwrap();
    }
    assert_eq!(app.list_sessions().unwrap().sessions.len(), 2);

    let cleared = app.clear_session(None).unwrap();
    assert_eq!(cleared.cleared, 2);
    assert_eq!(cleared.session, None);
    assert!(app.list_sessions().unwrap().sessions.is_empty());
}
