//! Typed errors for each component.
//!
//! Library code returns these; the binary wraps them with `anyhow` context.
//! Every stage failure funnels into [`StageError`], which the classifier turns
//! into an `ErrorInfo`.
use crate::state::ArtifactKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown artifact {category}/{name}")]
    UnknownArtifact { category: String, name: String },

    #[error("artifact already exists at {key}")]
    AlreadyExists { key: String },

    #[error("reference not found: {key} ({reason})")]
    ReferenceNotFound { key: String, reason: String },

    #[error("content mismatch at {key}: expected {expected}, found {actual}")]
    Corrupt {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("decode {key}: {message}")]
    Decode { key: String, message: String },

    #[error("encode {key}: {message}")]
    Encode { key: String, message: String },

    #[error("invalid verification id {id:?}: {reason}")]
    InvalidVerificationId { id: String, reason: String },

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("store operation on {key} exceeded the stage deadline after {elapsed_ms} ms")]
    DeadlineExceeded { key: String, elapsed_ms: u64 },

    #[error("store i/o at {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::DeadlineExceeded { .. })
    }
}

/// One problem found while validating an envelope's references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum ReferenceProblem {
    #[error("{key} is missing")]
    Missing { key: ArtifactKey },

    #[error("{key} is invalid: {reason}")]
    Invalid { key: ArtifactKey, reason: String },

    #[error("{key} could not be re-read: {reason}")]
    Unreadable { key: ArtifactKey, reason: String },
}

impl ReferenceProblem {
    pub fn key(&self) -> ArtifactKey {
        match self {
            Self::Missing { key } | Self::Invalid { key, .. } | Self::Unreadable { key, .. } => {
                *key
            }
        }
    }
}

fn join_problems(problems: &[ReferenceProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("verification id is empty")]
    EmptyVerificationId,

    #[error("verification id mismatch: expected {expected}, got {actual}")]
    VerificationIdMismatch { expected: String, actual: String },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("cannot enter {status}: {}", join_problems(.problems))]
    MissingReferences {
        status: String,
        problems: Vec<ReferenceProblem>,
    },
}

#[derive(Debug, Error)]
pub enum ModelServiceError {
    #[error("model call exceeded its deadline after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("model call cancelled by caller")]
    Cancelled,

    #[error("model service throttled the request: {0}")]
    Throttled(String),

    #[error("model service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("model service failed ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model reply could not be decoded: {0}")]
    InvalidReply(String),

    #[error("model command failed: {0}")]
    Command(String),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template {0:?}")]
    Unknown(String),

    #[error("template {name} has unresolved placeholders: {}", .placeholders.join(", "))]
    Unresolved {
        name: String,
        placeholders: Vec<String>,
    },

    #[error("read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("verification record {0} already exists")]
    AlreadyExists(String),

    #[error("verification record {0} not found")]
    NotFound(String),

    #[error("invalid verification id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("decode record {path}: {message}")]
    Decode { path: String, message: String },

    #[error("record store i/o at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a stage can fail with.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("reference check failed: {}", join_problems(.0))]
    Reference(Vec<ReferenceProblem>),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelServiceError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl StageError {
    /// Taxonomy name surfaced in `ErrorInfo::error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Reference(_) => "ReferenceError",
            Self::Envelope(EnvelopeError::MissingReferences { .. }) => "ReferenceError",
            Self::Envelope(_) => "ValidationError",
            Self::Store(StoreError::Io { .. }) => "StoreIOError",
            Self::Store(StoreError::ReferenceNotFound { .. }) => "ReferenceError",
            Self::Store(StoreError::DeadlineExceeded { .. }) => "StoreIOError",
            Self::Store(_) => "StoreError",
            Self::Model(_) => "ModelServiceError",
            Self::Template(_) => "TemplateError",
            Self::Record(RecordError::Io { .. }) => "StoreIOError",
            Self::Record(_) => "RecordError",
        }
    }
}
