use super::*;
use std::collections::HashMap;

fn http_config() -> AppConfig {
    let mut config = default_config();
    config.model.endpoint = Some("http://127.0.0.1:8080/converse".to_string());
    config
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn defaults_need_only_an_endpoint() {
    let err = validate_config(&default_config()).unwrap_err();
    assert!(err.to_string().contains("model.endpoint"), "{err}");
    validate_config(&http_config()).expect("valid");
}

#[test]
fn defaults_carry_service_limits() {
    let config = default_config();
    assert_eq!(config.model.max_tokens, 24_000);
    assert_eq!(config.model.thinking.budget_tokens, 16_000);
    assert_eq!(config.model.connect_timeout_ms, 10_000);
    assert_eq!(config.model.call_timeout_ms, 30_000);
    assert_eq!(config.pipeline.discrepancy_threshold, 5);
    assert_eq!(config.templates.eviction_policy, "lru");
}

#[test]
fn connect_timeout_must_be_below_call_timeout() {
    let mut config = http_config();
    config.model.connect_timeout_ms = 30_000;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("connect_timeout_ms"), "{err}");

    let mut config = http_config();
    config.model.call_timeout_ms = 200_000;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("stage_timeout_ms"), "{err}");
}

#[test]
fn rejects_out_of_range_model_settings() {
    let mut config = http_config();
    config.model.temperature = 1.5;
    assert!(validate_config(&config).is_err());

    let mut config = http_config();
    config.model.max_tokens = 0;
    assert!(validate_config(&config).is_err());

    let mut config = http_config();
    config.model.thinking.budget_tokens = config.model.max_tokens;
    assert!(validate_config(&config).is_err());

    let mut config = http_config();
    config.model.thinking.enabled = false;
    config.model.thinking.budget_tokens = config.model.max_tokens;
    validate_config(&config).expect("budget ignored when thinking is off");
}

#[test]
fn rejects_bad_template_and_store_settings() {
    let mut config = http_config();
    config.templates.eviction_policy = "random".to_string();
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("eviction_policy"), "{err}");

    let mut config = http_config();
    config.templates.cache_capacity = 0;
    assert!(validate_config(&config).is_err());

    let mut config = http_config();
    config.store.bucket = "a/b".to_string();
    assert!(validate_config(&config).is_err());

    for reserved in ["records", ".."] {
        let mut config = http_config();
        config.store.bucket = reserved.to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("reserved"), "{err}");
    }

    let mut config = http_config();
    config.schema_version = 99;
    assert!(validate_config(&config).is_err());
}

#[cfg(unix)]
#[test]
fn command_backend_resolves_program_on_path() {
    let mut config = default_config();
    config.model.backend = BackendKind::Command;
    config.model.command = Some("sh -c 'cat'".to_string());
    validate_config(&config).expect("sh is on PATH");

    config.model.command = Some("lvf-no-such-model-binary --json".to_string());
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");

    config.model.command = None;
    assert!(validate_config(&config).is_err());
}

#[test]
fn env_overrides_switch_backend_and_paths() {
    let mut config = default_config();
    apply_env_overrides(
        &mut config,
        env(&[
            (ENV_MODEL_COMMAND, "sh -c cat"),
            (ENV_MODEL_ID, "local-vision"),
            (ENV_STORE_ROOT, "/tmp/lvf-store"),
            (ENV_MODEL_ENDPOINT, "  "),
        ]),
    );
    assert_eq!(config.model.backend, BackendKind::Command);
    assert_eq!(config.model.command.as_deref(), Some("sh -c cat"));
    assert_eq!(config.model.endpoint, None);
    assert_eq!(config.model.model_id, "local-vision");
    assert_eq!(config.store.root, Some(PathBuf::from("/tmp/lvf-store")));
}

#[test]
fn write_then_load_preserves_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
    let mut config = http_config();
    config.pipeline.discrepancy_threshold = 2;
    config.templates.dir = Some(dir.path().join("prompts"));
    write_config(&path, &config).expect("write");
    let loaded = load_config_file(&path).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn partial_files_fill_in_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        r#"{"schema_version":1,"model":{"endpoint":"https://models.internal/converse"}}"#,
    )
    .expect("write");
    let loaded = load_config_file(&path).expect("load");
    assert_eq!(loaded.model.max_tokens, 24_000);
    assert_eq!(loaded.store.bucket, "verification-state");
    validate_config(&loaded).expect("valid");
}

#[test]
fn explicit_path_wins_and_must_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.json");
    let resolved = resolve_config_path(Some(&missing)).expect("resolve");
    assert_eq!(resolved, Some(missing.clone()));
    assert!(load_config(Some(&missing)).is_err());
}

#[test]
fn stub_is_valid_json_for_the_current_schema() {
    let parsed: AppConfig = serde_json::from_str(&config_stub()).expect("parse stub");
    assert_eq!(parsed.schema_version, CONFIG_SCHEMA_VERSION);
}
