use rayport_daemon::config::{ConfigError, DaemonConfig, EngineConfig};
use std::fs;
use std::net::SocketAddr;
use tempfile::NamedTempFile;

#[test]
fn empty_file_uses_defaults() {
    let cfg = DaemonConfig::from_toml("").expect("parse");
    assert_eq!(cfg, DaemonConfig::default());
    assert_eq!(cfg.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
    assert_eq!(cfg.log_level, None);
    assert_eq!(cfg.engine.name, "rayport");
    assert_eq!((cfg.engine.default_width, cfg.engine.default_height), (640, 480));
    assert_eq!(cfg.engine.max_snapshot_pixels, 16_777_216);
}

#[test]
fn parses_listen_and_engine_table() {
    let input = r#"
listen = "0.0.0.0:6100"
log_level = "debug"

[engine]
name = "bench"
default_width = 32
default_height = 16
"#;
    let cfg = DaemonConfig::from_toml(input).expect("parse");
    assert_eq!(cfg.listen.port(), 6100);
    assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    assert_eq!(
        cfg.engine,
        EngineConfig {
            name: "bench".into(),
            default_width: 32,
            default_height: 16,
            max_snapshot_pixels: 16_777_216,
        }
    );
}

#[test]
fn rejects_unknown_keys_and_bad_values() {
    assert!(matches!(DaemonConfig::from_toml("port = 1"), Err(ConfigError::Parse(_))));
    assert!(matches!(
        DaemonConfig::from_toml("[engine]\nwidth = 3"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(DaemonConfig::from_toml("listen = \"nowhere\""), Err(ConfigError::Parse(_))));
    assert!(matches!(
        DaemonConfig::from_toml("[engine]\ndefault_width = 0"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        DaemonConfig::from_toml("[engine]\nmax_snapshot_pixels = 100"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn loads_config_from_file() {
    let file = NamedTempFile::new().expect("temp file");
    fs::write(file.path(), "listen = \"127.0.0.1:7001\"\n").expect("write");

    let cfg = DaemonConfig::from_path(file.path()).expect("load");
    assert_eq!(cfg.listen.port(), 7001);

    let missing = file.path().with_extension("missing");
    let err = DaemonConfig::from_path(&missing).expect_err("missing file");
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("missing"));
}
