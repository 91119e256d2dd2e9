//! Process configuration.
//!
//! Loaded from `lvf.json` (explicit path, `$LVF_CONFIG`, or the per-user data
//! dir), then patched by environment overrides and validated before any stage
//! runs. Missing files fall back to [`default_config`].
use crate::cache::EvictionPolicy;
use crate::conversation::{ModelSettings, ThinkingSettings};
use crate::record::RECORDS_DIR;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "lvf.json";
const APP_DIR_NAME: &str = "layout-verify";

pub const ENV_CONFIG: &str = "LVF_CONFIG";
pub const ENV_MODEL_ENDPOINT: &str = "LVF_MODEL_ENDPOINT";
pub const ENV_MODEL_COMMAND: &str = "LVF_MODEL_COMMAND";
pub const ENV_MODEL_ID: &str = "LVF_MODEL_ID";
pub const ENV_STORE_ROOT: &str = "LVF_STORE_ROOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for blobs and records. Defaults to the data dir.
    pub root: Option<PathBuf>,
    pub bucket: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            bucket: "verification-state".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingConfig {
    pub enabled: bool,
    pub budget_tokens: u32,
    /// Longest thinking trace kept in turn metadata, in characters.
    pub max_trace_chars: usize,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_tokens: 16_000,
            max_trace_chars: 64_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: BackendKind,
    pub endpoint: Option<String>,
    /// Shell-words command line for the command backend.
    pub command: Option<String>,
    /// Name of the env var holding a bearer token for the HTTP backend.
    pub api_key_env: Option<String>,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub thinking: ThinkingConfig,
    pub connect_timeout_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            endpoint: None,
            command: None,
            api_key_env: None,
            model_id: "vision-model".to_string(),
            max_tokens: 24_000,
            temperature: 0.7,
            thinking: ThinkingConfig::default(),
            connect_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl ModelConfig {
    pub fn settings(&self) -> ModelSettings {
        ModelSettings {
            model_id: self.model_id.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            thinking_budget_tokens: self.thinking.enabled.then_some(self.thinking.budget_tokens),
        }
    }

    pub fn thinking_settings(&self) -> ThinkingSettings {
        ThinkingSettings {
            enabled: self.thinking.enabled,
            max_chars: self.thinking.max_trace_chars,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stage_timeout_ms: u64,
    /// MISSING/MISPLACED count that forces an INCORRECT outcome. 0 disables.
    pub discrepancy_threshold: u32,
    pub turn1_prompt_version: String,
    pub turn2_prompt_version: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 120_000,
            discrepancy_threshold: 5,
            turn1_prompt_version: "v1.0".to_string(),
            turn2_prompt_version: "v1.0".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory of `<name>.md` overrides for the built-in templates.
    pub dir: Option<PathBuf>,
    pub cache_capacity: usize,
    pub eviction_policy: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: None,
            cache_capacity: 16,
            eviction_policy: EvictionPolicy::default().to_string(),
        }
    }
}

pub fn default_config() -> AppConfig {
    AppConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        store: StoreConfig::default(),
        model: ModelConfig::default(),
        pipeline: PipelineConfig::default(),
        templates: TemplateConfig::default(),
    }
}

/// Pretty JSON of the defaults, for `lvf.json` stubs.
pub fn config_stub() -> String {
    serde_json::to_string_pretty(&default_config()).expect("serialize config stub")
}

/// Per-user data directory for configs and the default store.
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("unable to resolve a data directory"))?;
    Ok(base.join(APP_DIR_NAME))
}

/// Pick the config file: explicit path, then `$LVF_CONFIG`, then the data dir.
///
/// Returns `None` when no explicit path was given and the default file does
/// not exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }
    if let Some(raw) = std::env::var_os(ENV_CONFIG).filter(|raw| !raw.is_empty()) {
        return Ok(Some(PathBuf::from(raw)));
    }
    let default_path = data_dir()?.join(CONFIG_FILE_NAME);
    Ok(default_path.is_file().then_some(default_path))
}

pub fn load_config_file(path: &Path) -> Result<AppConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: AppConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

/// Resolve, load, apply env overrides and validate.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut config = match resolve_config_path(explicit)? {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config_file(&path)?
        }
        None => default_config(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Patch `config` from the environment. `lookup` is injected for tests.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
    if let Some(endpoint) = lookup(ENV_MODEL_ENDPOINT) {
        config.model.backend = BackendKind::Http;
        config.model.endpoint = Some(endpoint);
    }
    if let Some(command) = lookup(ENV_MODEL_COMMAND) {
        config.model.backend = BackendKind::Command;
        config.model.command = Some(command);
    }
    if let Some(model_id) = lookup(ENV_MODEL_ID) {
        config.model.model_id = model_id;
    }
    if let Some(root) = lookup(ENV_STORE_ROOT) {
        config.store.root = Some(PathBuf::from(root));
    }
}

pub fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Store root, falling back to `<data dir>/store`.
pub fn store_root(config: &AppConfig) -> Result<PathBuf> {
    match &config.store.root {
        Some(root) => Ok(root.clone()),
        None => Ok(data_dir()?.join("store")),
    }
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.store.bucket.trim().is_empty() {
        return Err(anyhow!("store.bucket must be non-empty"));
    }
    if config.store.bucket.contains(['/', '\\']) {
        return Err(anyhow!(
            "store.bucket must not contain path separators (got {:?})",
            config.store.bucket
        ));
    }
    if matches!(config.store.bucket.as_str(), "." | ".." | RECORDS_DIR) {
        return Err(anyhow!(
            "store.bucket {:?} is reserved under the store root",
            config.store.bucket
        ));
    }

    let model = &config.model;
    match model.backend {
        BackendKind::Http => {
            let endpoint = model.endpoint.as_deref().unwrap_or("").trim();
            if endpoint.is_empty() {
                return Err(anyhow!(
                    "model.endpoint is required for the http backend (or set {ENV_MODEL_ENDPOINT})"
                ));
            }
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(anyhow!("model.endpoint must be an http(s) URL (got {endpoint:?})"));
            }
        }
        BackendKind::Command => {
            let raw = model.command.as_deref().unwrap_or("");
            let argv = shell_words::split(raw).context("parse model.command")?;
            let program = argv.first().ok_or_else(|| {
                anyhow!(
                    "model.command is required for the command backend (or set {ENV_MODEL_COMMAND})"
                )
            })?;
            if !Path::new(program).is_file() {
                which::which(program)
                    .with_context(|| format!("model command {program:?} not found on PATH"))?;
            }
        }
    }
    if model.model_id.trim().is_empty() {
        return Err(anyhow!("model.model_id must be non-empty"));
    }
    if model.max_tokens == 0 {
        return Err(anyhow!("model.max_tokens must be positive"));
    }
    if !(0.0..=1.0).contains(&model.temperature) {
        return Err(anyhow!(
            "model.temperature must be within [0, 1] (got {})",
            model.temperature
        ));
    }
    if model.thinking.enabled && model.thinking.budget_tokens >= model.max_tokens {
        return Err(anyhow!(
            "model.thinking.budget_tokens ({}) must be below model.max_tokens ({})",
            model.thinking.budget_tokens,
            model.max_tokens
        ));
    }
    if model.connect_timeout_ms == 0 || model.connect_timeout_ms >= model.call_timeout_ms {
        return Err(anyhow!(
            "model.connect_timeout_ms ({}) must be positive and below model.call_timeout_ms ({})",
            model.connect_timeout_ms,
            model.call_timeout_ms
        ));
    }
    if model.call_timeout_ms > config.pipeline.stage_timeout_ms {
        return Err(anyhow!(
            "model.call_timeout_ms ({}) must not exceed pipeline.stage_timeout_ms ({})",
            model.call_timeout_ms,
            config.pipeline.stage_timeout_ms
        ));
    }

    if config.templates.cache_capacity == 0 {
        return Err(anyhow!("templates.cache_capacity must be positive"));
    }
    config
        .templates
        .eviction_policy
        .parse::<EvictionPolicy>()
        .map_err(|err| anyhow!("templates.eviction_policy: {err}"))?;
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
