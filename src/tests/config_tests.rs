use super::*;

#[test]
fn test_empty_yaml_uses_defaults() {
    let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.auto_start.cadence_secs, 300);
    assert_eq!(config.auto_start.debounce_secs, 10);
}

#[test]
fn test_partial_yaml_overrides() {
    let yaml = r#"
request_timeout_secs: 5
retry:
  max_retries: 0
auto_start:
  cadence_secs: 60
api:
  web_base: "http://localhost:9999"
"#;
    let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.request_timeout_secs, 5);
    assert_eq!(config.retry.max_retries, 0);
    assert_eq!(config.retry.backoff_ms, 1000);
    assert_eq!(config.auto_start.cadence_secs, 60);
    assert_eq!(config.auto_start.debounce_secs, 10);
    assert_eq!(config.api.web_base, "http://localhost:9999");
    assert_eq!(config.api.oauth_base, "https://api.anthropic.com");
}

#[test]
fn test_load_missing_file_is_default() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::load_from(&dir.path().join("config.yaml")).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_load_rejects_zero_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "request_timeout_secs: 0\n").unwrap();
    let err = EngineConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("request_timeout_secs"));
}

#[test]
fn test_retry_delay_grows_exponentially() {
    let policy = RetryPolicy {
        max_retries: 3,
        backoff_ms: 100,
        jitter_ms: 0,
    };
    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(400));
}

#[test]
fn test_retry_jitter_is_bounded() {
    let policy = RetryPolicy {
        max_retries: 1,
        backoff_ms: 100,
        jitter_ms: 50,
    };
    for _ in 0..20 {
        let delay = policy.delay_for(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(150));
    }
}
