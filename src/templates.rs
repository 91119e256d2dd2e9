//! Prompt templates.
//!
//! Built-in templates are compiled in from `prompts/*.md`. A configured
//! directory may override any of them with `<dir>/<name>.md`. Loaded sources
//! are kept in a [`BoundedCache`]; rendering always starts from the source, so
//! a cache hit and a miss render identically.
use crate::cache::{BoundedCache, CacheStats, EvictionPolicy};
use crate::error::TemplateError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const SYSTEM_PROMPT_MD: &str = include_str!("../prompts/system.md");
pub const TURN1_PROMPT_MD: &str = include_str!("../prompts/turn1.md");
pub const TURN2_PROMPT_MD: &str = include_str!("../prompts/turn2.md");

pub const SYSTEM_TEMPLATE: &str = "system";
pub const TURN1_TEMPLATE: &str = "turn1";
pub const TURN2_TEMPLATE: &str = "turn2";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (SYSTEM_TEMPLATE, SYSTEM_PROMPT_MD),
    (TURN1_TEMPLATE, TURN1_PROMPT_MD),
    (TURN2_TEMPLATE, TURN2_PROMPT_MD),
];

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("regex for placeholders"))
}

/// Placeholder names a template expects, in sorted order.
pub fn placeholders(source: &str) -> BTreeSet<String> {
    placeholder_regex()
        .captures_iter(source)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPrompt {
    pub template: String,
    pub text: String,
    pub char_count: usize,
    /// Rough size in model tokens (four characters per token).
    pub token_estimate: usize,
}

pub struct TemplateLoader {
    dir: Option<PathBuf>,
    cache: BoundedCache<String, String>,
}

impl TemplateLoader {
    pub fn new(dir: Option<PathBuf>, capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            dir,
            cache: BoundedCache::new(capacity, policy),
        }
    }

    /// Built-ins only, no overrides.
    pub fn builtin() -> Self {
        Self::new(None, BUILTIN_TEMPLATES.len(), EvictionPolicy::Lru)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Template source, from the override dir when present there.
    pub fn source(&self, name: &str) -> Result<String, TemplateError> {
        self.cache
            .get_or_try_insert(name.to_string(), || self.read_source(name))
    }

    fn read_source(&self, name: &str) -> Result<String, TemplateError> {
        let builtin = BUILTIN_TEMPLATES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, source)| *source)
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))?;
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{name}.md"));
            if path.is_file() {
                tracing::debug!(path = %path.display(), "using template override");
                return std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        }
        Ok(builtin.to_string())
    }

    /// Substitute `{name}` placeholders. Every placeholder the template uses
    /// must be supplied; extra values are ignored.
    pub fn render(&self, name: &str, values: &[(&str, String)]) -> Result<RenderedPrompt, TemplateError> {
        let source = self.source(name)?;
        let missing: Vec<String> = placeholders(&source)
            .into_iter()
            .filter(|placeholder| !values.iter().any(|(key, _)| *key == placeholder.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::Unresolved {
                name: name.to_string(),
                placeholders: missing,
            });
        }
        let text = placeholder_regex()
            .replace_all(&source, |caps: &regex::Captures<'_>| {
                values
                    .iter()
                    .find(|(key, _)| *key == &caps[1])
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .trim()
            .to_string();
        let char_count = text.chars().count();
        Ok(RenderedPrompt {
            template: name.to_string(),
            char_count,
            token_estimate: char_count / 4,
            text,
        })
    }
}
