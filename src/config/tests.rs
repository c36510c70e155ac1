use super::types::*;

#[test]
fn test_ship_defaults() {
    let cfg = ShipConfig::default();
    assert_eq!(cfg.offshore_host, "localhost");
    assert_eq!(cfg.offshore_port, 9999);
    assert_eq!(cfg.listen_port, 8080);
    assert_eq!(cfg.queue_capacity, 1024);
    assert_eq!(cfg.max_reconnect_attempts, 5);
}

#[test]
fn test_offshore_defaults() {
    let cfg = OffshoreConfig::default();
    assert_eq!(cfg.bind_host, "0.0.0.0");
    assert_eq!(cfg.bind_port, 9999);
    assert!(!cfg.insecure_skip_tls_verify);
}

#[test]
fn test_load_ship_toml_config() {
    let toml = r#"
        offshore_host = "offshore.example.internal"
        offshore_port = 7777
        listen_port = 8888
        queue_capacity = 256
    "#;
    let tmp = std::env::temp_dir().join("shiplink_test_ship_config.toml");
    std::fs::write(&tmp, toml).unwrap();
    let cfg = ShipConfig::load(Some(&tmp)).unwrap();
    assert_eq!(cfg.offshore_host, "offshore.example.internal");
    assert_eq!(cfg.offshore_port, 7777);
    assert_eq!(cfg.listen_port, 8888);
    assert_eq!(cfg.queue_capacity, 256);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let path = std::env::temp_dir().join("shiplink_test_does_not_exist.toml");
    std::fs::remove_file(&path).ok();
    let cfg = ShipConfig::load(Some(&path)).unwrap();
    assert_eq!(cfg.offshore_port, 9999);
}

#[test]
fn test_validate_empty_offshore_host_fails() {
    let cfg = ShipConfig {
        offshore_host: String::new(),
        ..ShipConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_zero_queue_capacity_fails() {
    let cfg = ShipConfig {
        queue_capacity: 0,
        ..ShipConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_offshore_env_override_insecure_tls() {
    std::env::set_var("OFFSHORE_INSECURE_TLS", "true");
    let mut cfg = OffshoreConfig::default();
    // exercise the same code path `load` would, without touching the fs
    if let Ok(v) = std::env::var("OFFSHORE_INSECURE_TLS") {
        cfg.insecure_skip_tls_verify = v == "true" || v == "1";
    }
    assert!(cfg.insecure_skip_tls_verify);
    std::env::remove_var("OFFSHORE_INSECURE_TLS");
}
