use super::settings::{PartialSettings, Settings};
use super::load_config_from;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.upstream.name_server, "127.0.0.1:9876");
    assert_eq!(settings.upstream.group, "gateway-group");
    assert_eq!(settings.upstream.retry, 2);
    assert_eq!(settings.callback.url, None);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_partial_merge_keeps_defaults_for_missing_fields() {
    let partial: PartialSettings = serde_json::from_str(
        r#"{ "server": { "port": 7000 }, "callback": { "url": "  " } }"#,
    )
    .unwrap();
    let settings = partial.merge_with_defaults();
    assert_eq!(settings.server.port, 7000);
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.callback.url, None);
    assert_eq!(settings.upstream, Settings::default().upstream);
}

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("gateway.toml");
    fs::write(&path, body).expect("write config file");
    dir.path().join("gateway").to_str().unwrap().to_string()
}

#[test]
#[serial]
fn load_config_without_file_returns_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let missing = tmp.path().join("nothing-here");
    let cfg = load_config_from(missing.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg, Settings::default());
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = write_config(
        &tmp,
        r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [upstream]
            name_server = "10.0.0.5:9876"
            group = "file-group"
            retry = 5

            [callback]
            url = "http://127.0.0.1:8000/callback"
        "#,
    );

    let cfg = load_config_from(&path).expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.upstream.name_server, "10.0.0.5:9876");
    assert_eq!(cfg.upstream.group, "file-group");
    assert_eq!(cfg.upstream.topic, "gateway-topic");
    assert_eq!(cfg.upstream.retry, 5);
    assert_eq!(
        cfg.callback.url.as_deref(),
        Some("http://127.0.0.1:8000/callback")
    );
}

#[test]
#[serial]
fn load_config_reads_environment_overrides() {
    let tmp = TempDir::new().expect("create tempdir");
    let missing = tmp.path().join("nothing-here");
    temp_env::with_vars(
        [
            ("MQGATE__SERVER__PORT", Some("9100")),
            ("MQGATE__UPSTREAM__GROUP", Some("env-group")),
            ("MQGATE__LOG__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config_from(missing.to_str().unwrap()).expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.upstream.group, "env-group");
            assert_eq!(cfg.log.level, "debug");
        },
    );
}

#[test]
#[serial]
fn file_configuration_wins_over_environment() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = write_config(
        &tmp,
        r#"
            [server]
            port = 9200
        "#,
    );
    temp_env::with_vars(
        [
            ("MQGATE__SERVER__PORT", Some("9100")),
            ("MQGATE__SERVER__HOST", Some("0.0.0.0")),
        ],
        || {
            let cfg = load_config_from(&path).expect("load_config failed");
            assert_eq!(cfg.server.port, 9200);
            assert_eq!(cfg.server.host, "0.0.0.0");
        },
    );
}
