//! Per-process service wiring.
use crate::cache::EvictionPolicy;
use crate::classify::ErrorClassifier;
use crate::config::{self, AppConfig, BackendKind};
use crate::conversation::{CommandModelService, HttpModelService, ModelService};
use crate::record::{FsRecordStore, RecordStore};
use crate::state::{FsBlobStore, StateStore};
use crate::templates::TemplateLoader;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

/// Everything a stage needs, built once per process and passed in.
pub struct Services {
    pub state: StateStore,
    pub records: Arc<dyn RecordStore>,
    pub model: Arc<dyn ModelService>,
    pub templates: TemplateLoader,
    pub classifier: ErrorClassifier,
    pub config: AppConfig,
}

impl Services {
    /// Wire explicit stores and model around `config`.
    pub fn new(
        config: AppConfig,
        state: StateStore,
        records: Arc<dyn RecordStore>,
        model: Arc<dyn ModelService>,
    ) -> Self {
        let policy = config
            .templates
            .eviction_policy
            .parse::<EvictionPolicy>()
            .unwrap_or_default();
        let templates = TemplateLoader::new(
            config.templates.dir.clone(),
            config.templates.cache_capacity.max(1),
            policy,
        );
        Self {
            state,
            records,
            model,
            templates,
            classifier: ErrorClassifier::new(),
            config,
        }
    }

    /// Filesystem stores under the configured root plus the configured model
    /// backend. `config` must already be validated.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let root = config::store_root(&config)?;
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create store root {}", root.display()))?;
        let blobs = FsBlobStore::new(&root, config.store.bucket.clone());
        let records = FsRecordStore::new(&root);
        let model = model_service_from_config(&config)?;
        tracing::debug!(root = %root.display(), bucket = %config.store.bucket, "services ready");
        Ok(Self::new(
            config,
            StateStore::new(Arc::new(blobs)),
            Arc::new(records),
            model,
        ))
    }
}

pub fn model_service_from_config(config: &AppConfig) -> Result<Arc<dyn ModelService>> {
    let model = &config.model;
    match model.backend {
        BackendKind::Http => {
            let endpoint = model
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow!("model.endpoint is not set"))?;
            let api_key = match &model.api_key_env {
                Some(name) => Some(
                    std::env::var(name)
                        .with_context(|| format!("read model api key from ${name}"))?,
                ),
                None => None,
            };
            Ok(Arc::new(HttpModelService::new(
                endpoint,
                api_key,
                model.connect_timeout(),
            )))
        }
        BackendKind::Command => {
            let command = model
                .command
                .as_deref()
                .ok_or_else(|| anyhow!("model.command is not set"))?;
            Ok(Arc::new(CommandModelService::new(command)))
        }
    }
}
