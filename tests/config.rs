use assert_matches::assert_matches;

use iprstats::config::{Capabilities, Config, ConfigLoader, GoDbEntry, LocalDbEntry};
use iprstats::domain::{BackendKind, ChartGenerator, ChartType};
use iprstats::error::IprError;

#[test]
fn parse_json_config() {
    let config: Config = serde_json::from_str(
        r#"{
            "apps": ["PFAM", "SMART"],
            "max_table_results": 25,
            "max_chart_results": -1,
            "chart_type": "pie",
            "cache_backend": "memory",
            "local_db": { "db": "results.db", "use_sqlite": true },
            "go_db": { "host": "go.example.org", "port": 3307, "go_lookup": true }
        }"#,
    )
    .unwrap();

    let settings = ConfigLoader::resolve_config(config, Capabilities::embedded()).unwrap();
    assert_eq!(settings.schema_version, 1);
    assert_eq!(settings.apps().len(), 2);
    assert!(settings.has_app("SMART"));
    assert!(!settings.has_app("PIR"));
    assert_eq!(settings.max_table_results(), 25);
    assert_eq!(settings.chart().max_results(), -1);
    assert_eq!(settings.chart().chart_type, ChartType::Pie);
    assert_eq!(settings.chart().generator, ChartGenerator::Svg);
    assert_eq!(settings.backend(), BackendKind::Memory);
    assert_eq!(settings.local_db().db, "results.db");
    assert_eq!(settings.go_db().host, "go.example.org");
    assert_eq!(settings.go_db().port, 3307);
    assert!(settings.go_lookup());
}

#[test]
fn empty_app_list_rejected() {
    let config = Config {
        apps: Vec::new(),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config, Capabilities::embedded()).unwrap_err();
    assert_matches!(err, IprError::ConfigInvalid(_));
}

#[test]
fn duplicate_app_rejected() {
    let config = Config {
        apps: vec!["PFAM".to_string(), "PFAM".to_string()],
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config, Capabilities::embedded()).unwrap_err();
    assert_matches!(err, IprError::ConfigInvalid(_));
}

#[test]
fn apps_differing_only_in_case_rejected() {
    let config = Config {
        apps: vec!["PFAM".to_string(), "SMART".to_string(), "pfam".to_string()],
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config, Capabilities::embedded()).unwrap_err();
    assert_matches!(err, IprError::ConfigInvalid(message) if message.contains("pfam"));
}

#[test]
fn server_engine_requires_capability() {
    let server_config = || Config {
        local_db: LocalDbEntry {
            use_sqlite: false,
            ..LocalDbEntry::default()
        },
        ..Config::default()
    };

    let err = ConfigLoader::resolve_config(server_config(), Capabilities::embedded()).unwrap_err();
    assert_matches!(err, IprError::EngineUnavailable(_));

    let settings =
        ConfigLoader::resolve_config(server_config(), Capabilities::embedded().with_server())
            .unwrap();
    assert!(!settings.use_sqlite());
}

#[test]
fn no_engine_rejected() {
    let capabilities = Capabilities {
        sqlite: false,
        server: false,
    };
    let err = ConfigLoader::resolve_config(Config::default(), capabilities).unwrap_err();
    assert_matches!(err, IprError::EngineUnavailable(_));
}

#[test]
fn default_config_written_when_missing() {
    let temp = tempfile::tempdir().unwrap();
    let settings = ConfigLoader::resolve(None, temp.path(), Capabilities::embedded()).unwrap();

    assert!(temp.path().join("iprstats.json").exists());
    assert_eq!(settings.apps()[0], "PFAM");
    assert_eq!(settings.backend(), BackendKind::Durable);
    assert!(!settings.go_lookup());
}

#[test]
fn explicit_config_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("nope.json");
    let err =
        ConfigLoader::resolve(Some(&missing), temp.path(), Capabilities::embedded()).unwrap_err();
    assert_matches!(err, IprError::ConfigRead(_));
}

#[test]
fn invalid_json_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ apps: ").unwrap();
    let err = ConfigLoader::resolve(Some(&path), temp.path(), Capabilities::embedded()).unwrap_err();
    assert_matches!(err, IprError::ConfigParse(_));
}

#[test]
fn go_lookup_flag() {
    let config = Config {
        go_db: GoDbEntry {
            go_lookup: true,
            ..GoDbEntry::default()
        },
        ..Config::default()
    };
    let settings = ConfigLoader::resolve_config(config, Capabilities::embedded()).unwrap();
    assert!(settings.go_lookup());
    assert_eq!(settings.go_db().db, "go-basic.obo");
}
