use hub_config::{ConfigError, HubConfig};
use std::collections::HashMap;
use std::path::PathBuf;

fn load(pairs: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    HubConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn defaults_apply_when_unset() {
    let config = load(&[]).expect("config");
    assert_eq!(config.data_dir, PathBuf::from("./data"));
    assert_eq!(config.store_engine, "sqlite");
    assert_eq!(config.mqtt_addr, "127.0.0.1:8883");
    assert_eq!(config.mqtt_max_packet_bytes, 1_048_576);
    assert_eq!(config.subscriber_queue, 1024);
    assert_eq!(config.retention_file, None);
    assert_eq!(config.retention_sweep_seconds, 3600);
    assert_eq!(config.retention_batch, 500);
    assert_eq!(config.latest_flush_seconds, 60);
    assert_eq!(config.password_admin, None);
    assert!(config.history_ingest);
    assert_eq!(config.service_dir("history"), PathBuf::from("./data/history"));
}

#[test]
fn overrides_are_parsed() {
    let config = load(&[
        ("HUB_DATA_DIR", "/var/lib/hub"),
        ("HUB_STORE_ENGINE", "memory"),
        ("HUB_SUBSCRIBER_QUEUE", "16"),
        ("HUB_RETENTION_FILE", "/etc/hub/retention.json"),
        ("HUB_PASSWORD_ADMIN", "s3cret"),
        ("HUB_HISTORY_INGEST", "off"),
        ("HUB_MQTT_ADDR", ""),
    ])
    .expect("config");
    assert_eq!(config.store_engine, "memory");
    assert_eq!(config.subscriber_queue, 16);
    assert_eq!(config.retention_file, Some(PathBuf::from("/etc/hub/retention.json")));
    assert_eq!(config.password_admin.as_deref(), Some("s3cret"));
    assert!(!config.history_ingest);
    assert_eq!(config.mqtt_addr, "127.0.0.1:8883");
    assert_eq!(config.service_dir("auth"), PathBuf::from("/var/lib/hub/auth"));
}

#[test]
fn invalid_values_are_reported_with_their_key() {
    let err = load(&[("HUB_RETENTION_BATCH", "many")]).expect_err("not a number");
    assert!(matches!(err, ConfigError::Invalid(key, value) if key == "HUB_RETENTION_BATCH" && value == "many"));

    let err = load(&[("HUB_SUBSCRIBER_QUEUE", "0")]).expect_err("zero queue");
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "HUB_SUBSCRIBER_QUEUE"));

    let err = load(&[("HUB_STORE_ENGINE", "rocksdb")]).expect_err("unknown engine");
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "HUB_STORE_ENGINE"));

    assert!(load(&[("HUB_HISTORY_INGEST", "maybe")]).is_err());
}

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("HUB_MQTT_ADDR", "0.0.0.0:1883");
        std::env::set_var("HUB_LATEST_FLUSH_SECONDS", "5");
    }

    let config = HubConfig::from_env().expect("config");
    assert_eq!(config.mqtt_addr, "0.0.0.0:1883");
    assert_eq!(config.latest_flush_seconds, 5);
}
