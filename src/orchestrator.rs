//! Stage functions of the verification pipeline.
//!
//! Each stage takes the envelope the previous stage returned, checks that the
//! references it depends on are present and readable, does its work through
//! [`Services`], and returns an advanced copy of the envelope. A failing stage
//! returns a [`StageFailure`] and leaves the caller's envelope untouched; the
//! external sequencer decides whether to retry or to call
//! [`finalize_with_error`].
//!
//! Stages never retry on their own.
mod artifacts;
mod finalize;
mod initialize;
mod prompts;
mod services;
mod turns;

pub use artifacts::{
    ErrorArtifact, FinalResults, ImageMetadata, ImagesMetadata, InitializationRecord,
    ProcessingMetrics, TurnMetrics, Turn1Processed, Turn2Processed,
};
pub use finalize::{finalize, finalize_with_error};
pub use initialize::initialize;
pub use prompts::{prepare_turn1, prepare_turn2};
pub use services::{model_service_from_config, Services};
pub use turns::{execute_turn1, execute_turn2};

use crate::classify::{ErrorContext, ErrorInfo};
use crate::conversation::Deadline;
use crate::error::{ReferenceProblem, StageError, StoreError};
use crate::ids::validate_verification_id;
use crate::record::{StatusEntry, RECORDS_DIR};
use crate::state::{ArtifactKey, Envelope, LogicalName, StateStore, VerificationStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use thiserror::Error;

const COMPONENT: &str = "orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialize,
    PrepareTurn1,
    ExecuteTurn1,
    PrepareTurn2,
    ExecuteTurn2,
    Finalize,
    FinalizeWithError,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::PrepareTurn1 => "prepare_turn1",
            Self::ExecuteTurn1 => "execute_turn1",
            Self::PrepareTurn2 => "prepare_turn2",
            Self::ExecuteTurn2 => "execute_turn2",
            Self::Finalize => "finalize",
            Self::FinalizeWithError => "finalize_with_error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failed stage hands back to the sequencer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{stage} failed for {verification_id}: {}", .error.message)]
pub struct StageFailure {
    pub verification_id: String,
    pub stage: Stage,
    pub error: ErrorInfo,
}

/// Run `body` as `stage`, timing it and classifying any failure.
///
/// `body` gets the stage deadline and a state store bounded by it; record
/// writes go through [`within_deadline`] first.
fn run_stage<T>(
    services: &Services,
    stage: Stage,
    verification_id: &str,
    body: impl FnOnce(&StateStore, &Deadline) -> Result<T, StageError>,
) -> Result<T, StageFailure> {
    let start = Instant::now();
    let deadline = Deadline::after(services.config.pipeline.stage_timeout());
    let state = services.state.bounded(&deadline);
    tracing::info!(stage = stage.as_str(), verification_id, "stage started");
    match body(&state, &deadline) {
        Ok(value) => {
            tracing::info!(
                stage = stage.as_str(),
                verification_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "stage complete"
            );
            Ok(value)
        }
        Err(err) => {
            let context = ErrorContext::new(COMPONENT, stage.as_str())
                .with("verification_id", verification_id);
            let info = services.classifier.classify(&err, &context);
            tracing::warn!(
                stage = stage.as_str(),
                verification_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                error_type = %info.error_type,
                category = %info.category,
                retryable = info.retryable,
                error = %err,
                "stage failed"
            );
            Err(StageFailure {
                verification_id: verification_id.to_string(),
                stage,
                error: info,
            })
        }
    }
}

fn check_verification_id(envelope: &Envelope) -> Result<(), StageError> {
    validate_verification_id(&envelope.verification_id).map_err(StageError::Validation)
}

/// Validate `keys` on the envelope, then re-read every structurally valid
/// one from the store. Missing and invalid references are listed before
/// unreadable ones. Retryable store failures (i/o, deadline) are returned as
/// errors rather than problems.
pub fn check_references(
    state: &StateStore,
    envelope: &Envelope,
    keys: &[ArtifactKey],
) -> Result<Vec<ReferenceProblem>, StoreError> {
    let mut problems = envelope.validate(keys);
    for key in keys {
        if problems.iter().any(|problem| problem.key() == *key) {
            continue;
        }
        let Some(reference) = envelope.references.get(key) else {
            continue;
        };
        match state.get(reference) {
            Ok(_) => {}
            Err(err) if err.is_retryable() => return Err(err),
            Err(err) => problems.push(ReferenceProblem::Unreadable {
                key: *key,
                reason: err.to_string(),
            }),
        }
    }
    Ok(problems)
}

/// Fail with a store timeout once the stage deadline has passed.
fn within_deadline(deadline: &Deadline, verification_id: &str) -> Result<(), StageError> {
    match deadline.check() {
        Ok(()) => Ok(()),
        Err(_) => Err(StoreError::DeadlineExceeded {
            key: format!("{RECORDS_DIR}/{verification_id}"),
            elapsed_ms: deadline.elapsed_ms(),
        }
        .into()),
    }
}

/// Check `names` are present and re-readable before a stage does any work.
fn preflight(
    state: &StateStore,
    envelope: &Envelope,
    names: &[LogicalName],
) -> Result<(), StageError> {
    check_verification_id(envelope)?;
    let keys: Vec<ArtifactKey> = names.iter().map(|name| ArtifactKey::from(*name)).collect();
    let problems = check_references(state, envelope, &keys)?;
    if problems.is_empty() {
        Ok(())
    } else {
        Err(StageError::Reference(problems))
    }
}

/// Refuse to start a stage whose target status the table does not allow.
fn ensure_transition(envelope: &Envelope, to: VerificationStatus) -> Result<(), StageError> {
    if envelope.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(StageError::Validation(format!(
            "cannot move {} from {} to {}",
            envelope.verification_id, envelope.status, to
        )))
    }
}

/// Advance the envelope and append the matching history entry.
fn advance(
    services: &Services,
    deadline: &Deadline,
    envelope: &mut Envelope,
    to: VerificationStatus,
    stage: Stage,
    detail: Option<String>,
) -> Result<(), StageError> {
    envelope.advance(to)?;
    let mut entry = StatusEntry::new(to, stage.as_str());
    entry.detail = detail;
    within_deadline(deadline, &envelope.verification_id)?;
    services
        .records
        .append_status(&envelope.verification_id, &entry)?;
    tracing::debug!(
        verification_id = %envelope.verification_id,
        status = %to,
        stage = stage.as_str(),
        "status advanced"
    );
    Ok(())
}

fn reference_of<'a>(
    envelope: &'a Envelope,
    name: LogicalName,
) -> Result<&'a crate::state::Reference, StageError> {
    envelope.reference(name).ok_or_else(|| {
        StageError::Reference(vec![ReferenceProblem::Missing {
            key: ArtifactKey::from(name),
        }])
    })
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
