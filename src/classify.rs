//! Failure classification into retry policies.
//!
//! Typed errors map directly onto a policy. Free-text errors (transport
//! failures, model command stderr, messages handed to `lvf classify`) go
//! through an ordered list of keyword rules; the first match wins.
use crate::error::{EnvelopeError, ModelServiceError, RecordError, StageError, StoreError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Capacity,
    Client,
    Network,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    None,
    Linear,
    Exponential,
    Jittered,
}

macro_rules! lowercase_display {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = serde_json::to_value(self)
                    .ok()
                    .and_then(|value| value.as_str().map(str::to_string))
                    .unwrap_or_default();
                f.write_str(&text)
            }
        }
    )*};
}

lowercase_display!(ErrorCategory, Severity, RetryStrategy);

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// A classified failure, surfaced to the stage sequencer and stored with
/// status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retry_strategy: RetryStrategy,
    pub max_retries: u32,
    pub retryable: bool,
    pub component: String,
    pub operation: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub recovery_hints: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    /// Delay before retry `attempt` (1-based), or `None` once retries are
    /// exhausted or the strategy forbids them.
    pub fn retry_delay(&self, attempt: u32, base: Duration) -> Option<Duration> {
        if !self.retryable || attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let exponential = || base.saturating_mul(2u32.saturating_pow(attempt - 1));
        let delay = match self.retry_strategy {
            RetryStrategy::None => return None,
            RetryStrategy::Linear => base.saturating_mul(attempt),
            RetryStrategy::Exponential => exponential(),
            RetryStrategy::Jittered => {
                let factor = rand::thread_rng().gen_range(0.5..1.5);
                exponential().mul_f64(factor)
            }
        };
        Some(delay.min(MAX_RETRY_DELAY))
    }
}

/// Where a failure happened.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub fields: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Policy {
    category: ErrorCategory,
    retry: RetryStrategy,
    max_retries: u32,
    severity: Severity,
}

const CAPACITY: Policy = Policy {
    category: ErrorCategory::Capacity,
    retry: RetryStrategy::Jittered,
    max_retries: 5,
    severity: Severity::Medium,
};
const CLIENT: Policy = Policy {
    category: ErrorCategory::Client,
    retry: RetryStrategy::None,
    max_retries: 0,
    severity: Severity::Critical,
};
const NETWORK: Policy = Policy {
    category: ErrorCategory::Network,
    retry: RetryStrategy::Linear,
    max_retries: 2,
    severity: Severity::High,
};
const TRANSIENT: Policy = Policy {
    category: ErrorCategory::Transient,
    retry: RetryStrategy::Exponential,
    max_retries: 3,
    severity: Severity::High,
};
const PERMANENT: Policy = Policy {
    category: ErrorCategory::Permanent,
    retry: RetryStrategy::None,
    max_retries: 0,
    severity: Severity::Critical,
};
const MISSING_ARTIFACT: Policy = Policy {
    category: ErrorCategory::Permanent,
    retry: RetryStrategy::None,
    max_retries: 0,
    severity: Severity::High,
};
const SERVER: Policy = Policy {
    category: ErrorCategory::Server,
    retry: RetryStrategy::Exponential,
    max_retries: 3,
    severity: Severity::High,
};

struct TextRule {
    needles: &'static [&'static str],
    policy: Policy,
}

/// Ordered; the first rule with a matching needle wins.
const TEXT_RULES: &[TextRule] = &[
    TextRule {
        needles: &[
            "throttl",
            "rate limit",
            "rate exceeded",
            "too many requests",
            "429",
            "capacity",
            "quota",
        ],
        policy: CAPACITY,
    },
    TextRule {
        needles: &["validation", "invalid", "malformed", "bad request", "unsupported"],
        policy: CLIENT,
    },
    TextRule {
        needles: &["timeout", "timed out", "deadline", "cancel"],
        policy: NETWORK,
    },
    TextRule {
        needles: &["template", "permanent"],
        policy: PERMANENT,
    },
    TextRule {
        needles: &[
            "internal server",
            "service unavailable",
            "bad gateway",
            "500",
            "502",
            "503",
        ],
        policy: SERVER,
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &StageError, context: &ErrorContext) -> ErrorInfo {
        let message = error.to_string();
        let policy = policy_for(error).unwrap_or_else(|| policy_for_text(&message));
        let mut info = build(error.error_type(), message, policy, context);
        if let StageError::Reference(problems) = error {
            for problem in problems {
                info.recovery_hints
                    .push(format!("re-run the stage that produces {}", problem.key()));
            }
        }
        info
    }

    /// Classify a raw message with no typed error behind it.
    pub fn classify_message(
        &self,
        error_type: &str,
        message: &str,
        context: &ErrorContext,
    ) -> ErrorInfo {
        build(
            error_type,
            message.to_string(),
            policy_for_text(message),
            context,
        )
    }
}

fn policy_for(error: &StageError) -> Option<Policy> {
    let policy = match error {
        StageError::Validation(_) => CLIENT,
        StageError::Reference(_) => MISSING_ARTIFACT,
        StageError::Envelope(EnvelopeError::MissingReferences { .. }) => MISSING_ARTIFACT,
        StageError::Envelope(_) => CLIENT,
        StageError::Store(store) => match store {
            StoreError::UnknownArtifact { .. }
            | StoreError::InvalidKey(_)
            | StoreError::InvalidVerificationId { .. }
            | StoreError::Encode { .. } => CLIENT,
            StoreError::AlreadyExists { .. } | StoreError::ReferenceNotFound { .. } => {
                MISSING_ARTIFACT
            }
            StoreError::Corrupt { .. } | StoreError::Decode { .. } => PERMANENT,
            StoreError::Io { .. } => TRANSIENT,
            StoreError::DeadlineExceeded { .. } => NETWORK,
        },
        StageError::Model(model) => match model {
            ModelServiceError::DeadlineExceeded { .. } | ModelServiceError::Cancelled => NETWORK,
            ModelServiceError::Throttled(_) => CAPACITY,
            ModelServiceError::Rejected { .. } => CLIENT,
            ModelServiceError::Server { .. } | ModelServiceError::InvalidReply(_) => SERVER,
            ModelServiceError::Transport(_) | ModelServiceError::Command(_) => return None,
        },
        StageError::Template(_) => PERMANENT,
        StageError::Record(record) => match record {
            RecordError::Io { .. } => TRANSIENT,
            RecordError::AlreadyExists(_) | RecordError::NotFound(_) => MISSING_ARTIFACT,
            RecordError::InvalidId { .. } => CLIENT,
            RecordError::Decode { .. } => PERMANENT,
        },
    };
    Some(policy)
}

fn policy_for_text(message: &str) -> Policy {
    let lowered = message.to_lowercase();
    TEXT_RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| lowered.contains(needle)))
        .map(|rule| rule.policy)
        .unwrap_or(TRANSIENT)
}

fn suggestions(category: ErrorCategory) -> Vec<String> {
    let lines: &[&str] = match category {
        ErrorCategory::Capacity => &[
            "Retry with jittered backoff; the model service is shedding load",
            "Check the account's request quota for the model",
        ],
        ErrorCategory::Client => &[
            "Fix the request input; retrying the same input will fail again",
            "Check image formats, prompts, and the envelope passed to this stage",
        ],
        ErrorCategory::Network => &[
            "Retry the stage; the call did not finish before its deadline",
            "Raise model.call_timeout_ms if large images routinely time out",
        ],
        ErrorCategory::Transient => &[
            "Retry with exponential backoff",
            "Check object store connectivity and permissions",
        ],
        ErrorCategory::Permanent => &[
            "Inspect the failing artifact or template; retrying will not help",
        ],
        ErrorCategory::Server => &[
            "Retry with exponential backoff; the model service reported a failure",
        ],
    };
    lines.iter().map(|line| line.to_string()).collect()
}

fn recovery_hints(category: ErrorCategory) -> Vec<String> {
    let lines: &[&str] = match category {
        ErrorCategory::Capacity | ErrorCategory::Network | ErrorCategory::Server => {
            &["Stage inputs are unchanged; the sequencer may re-invoke this stage as-is"]
        }
        ErrorCategory::Transient => &["Artifacts already written are immutable and safe to re-put"],
        ErrorCategory::Client | ErrorCategory::Permanent => {
            &["Finalize the run with `lvf fail` so the error is recorded"]
        }
    };
    lines.iter().map(|line| line.to_string()).collect()
}

fn build(error_type: &str, message: String, policy: Policy, context: &ErrorContext) -> ErrorInfo {
    ErrorInfo {
        error_type: error_type.to_string(),
        message,
        category: policy.category,
        severity: policy.severity,
        retry_strategy: policy.retry,
        max_retries: policy.max_retries,
        retryable: policy.retry != RetryStrategy::None,
        component: context.component.clone(),
        operation: context.operation.clone(),
        context: context.fields.clone(),
        suggestions: suggestions(policy.category),
        recovery_hints: recovery_hints(policy.category),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
