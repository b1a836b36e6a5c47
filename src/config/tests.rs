use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use super::{AuthMode, Endpoint, NetConfig, Settings, load_config_from};
use crate::utils::Error;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.net.address, "tcp://127.0.0.1:23100");
    assert_eq!(settings.net.auth, AuthMode::None);
    assert_eq!(settings.client.request_timeout(), Duration::from_secs(30));
    assert!(settings.client.handle_concurrent);
    assert!(settings.client.name.is_empty());
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_endpoint_parsing() {
    let endpoint = NetConfig::new("tcp://hub.local:4000").endpoint().unwrap();
    assert_eq!(
        endpoint,
        Endpoint {
            host: "hub.local".to_string(),
            port: 4000,
            tls: false
        }
    );
    assert_eq!(endpoint.addr(), "hub.local:4000");

    let endpoint = NetConfig::new("tcp+tls://hub.local").endpoint().unwrap();
    assert!(endpoint.tls);
    assert_eq!(endpoint.port, 23443);

    let endpoint = NetConfig::new("hub.local").endpoint().unwrap();
    assert!(!endpoint.tls);
    assert_eq!(endpoint.port, 23100);

    let endpoint = NetConfig::new("tcp://").endpoint().unwrap();
    assert_eq!(endpoint.addr(), "localhost:23100");
    assert_eq!(endpoint.listen_addr(), "0.0.0.0:23100");

    let endpoint = NetConfig::new("tcp://[::1]").endpoint().unwrap();
    assert_eq!(endpoint.addr(), "[::1]:23100");
}

#[test]
fn test_endpoint_rejects_bad_addresses() {
    assert!(matches!(
        NetConfig::new("udp://hub:1").endpoint(),
        Err(Error::InvalidAddress(_))
    ));
    assert!(matches!(
        NetConfig::new("tcp://hub:port").endpoint(),
        Err(Error::InvalidAddress(_))
    ));
}

#[test]
fn test_keepalive_defaults_when_zero() {
    let mut cfg = NetConfig::default();
    assert_eq!(cfg.keepalive(), Duration::from_secs(30));
    cfg.keepalive_secs = 5;
    assert_eq!(cfg.keepalive(), Duration::from_secs(5));
}

#[test]
#[serial]
fn test_file_values_merge_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("homebus.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[client]
name = "kitchen"

[net]
address = "tcp+tls://hub:23443"
auth = "certificate"
authority = "/etc/homebus/ca.pem"
"#
    )
    .unwrap();

    let base = dir.path().join("homebus");
    let settings = load_config_from(base.to_str().unwrap()).unwrap();

    assert_eq!(settings.client.name, "kitchen");
    assert_eq!(settings.client.request_timeout_ms, 30_000);
    assert_eq!(settings.net.address, "tcp+tls://hub:23443");
    assert_eq!(settings.net.auth, AuthMode::Certificate);
    assert_eq!(
        settings.net.authority,
        Some(PathBuf::from("/etc/homebus/ca.pem"))
    );
    assert_eq!(settings.net.certificate, None);
    assert_eq!(settings.log.level, "info");
}

#[test]
#[serial]
fn test_environment_overrides() {
    temp_env::with_vars(
        [
            ("HOMEBUS__NET__ADDRESS", Some("tcp://10.0.0.2:4000")),
            ("HOMEBUS__CLIENT__HANDLE_CONCURRENT", Some("false")),
            ("HOMEBUS__LOG__LEVEL", Some("debug")),
        ],
        || {
            let settings = load_config_from("does/not/exist").unwrap();
            assert_eq!(settings.net.address, "tcp://10.0.0.2:4000");
            assert!(!settings.client.handle_concurrent);
            assert_eq!(settings.log.level, "debug");
            assert_eq!(settings.client.request_timeout_ms, 30_000);
        },
    );
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    let settings = load_config_from("does/not/exist").unwrap();
    assert_eq!(settings, Settings::default());
}
