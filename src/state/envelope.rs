//! The envelope threaded between stages and its status table.
use super::reference::Reference;
use super::registry::{ArtifactKey, LogicalName};
use crate::error::{EnvelopeError, ReferenceProblem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Initialized,
    Turn1PromptReady,
    Turn1InProgress,
    Turn1Completed,
    Turn2PromptReady,
    Turn2InProgress,
    Turn2Completed,
    Finalized,
    Error,
}

const TURN1_OUTPUTS: &[LogicalName] = &[
    LogicalName::Turn1RawResponse,
    LogicalName::Turn1ProcessedResponse,
];

const TURN2_INPUTS: &[LogicalName] = &[
    LogicalName::Turn1RawResponse,
    LogicalName::Turn1ProcessedResponse,
    LogicalName::SystemPrompt,
    LogicalName::Turn2Prompt,
    LogicalName::ReferenceImageBase64,
    LogicalName::CheckingImageBase64,
];

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Turn1PromptReady => "TURN1_PROMPT_READY",
            Self::Turn1InProgress => "TURN1_IN_PROGRESS",
            Self::Turn1Completed => "TURN1_COMPLETED",
            Self::Turn2PromptReady => "TURN2_PROMPT_READY",
            Self::Turn2InProgress => "TURN2_IN_PROGRESS",
            Self::Turn2Completed => "TURN2_COMPLETED",
            Self::Finalized => "FINALIZED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Error)
    }

    /// The single forward successor on the happy path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Initialized => Some(Self::Turn1PromptReady),
            Self::Turn1PromptReady => Some(Self::Turn1InProgress),
            Self::Turn1InProgress => Some(Self::Turn1Completed),
            Self::Turn1Completed => Some(Self::Turn2PromptReady),
            Self::Turn2PromptReady => Some(Self::Turn2InProgress),
            Self::Turn2InProgress => Some(Self::Turn2Completed),
            Self::Turn2Completed => Some(Self::Finalized),
            Self::Finalized | Self::Error => None,
        }
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Error || self.next() == Some(to)
    }

    /// References that must be present and valid to enter this status.
    pub fn required_references(self) -> &'static [LogicalName] {
        match self {
            Self::Initialized | Self::Error => &[],
            Self::Turn1PromptReady => &[
                LogicalName::LayoutMetadata,
                LogicalName::ReferenceImageBase64,
            ],
            Self::Turn1InProgress => &[
                LogicalName::SystemPrompt,
                LogicalName::Turn1Prompt,
                LogicalName::ReferenceImageBase64,
            ],
            Self::Turn1Completed | Self::Turn2PromptReady => TURN1_OUTPUTS,
            Self::Turn2InProgress => TURN2_INPUTS,
            Self::Turn2Completed => &[
                LogicalName::Turn2RawResponse,
                LogicalName::Turn2ProcessedResponse,
            ],
            Self::Finalized => &[LogicalName::Turn2ProcessedResponse],
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub verification_id: String,
    pub status: VerificationStatus,
    #[serde(default)]
    pub references: BTreeMap<ArtifactKey, Reference>,
    #[serde(default)]
    pub summary: BTreeMap<String, Value>,
}

impl Envelope {
    pub fn new(verification_id: &str) -> Result<Self, EnvelopeError> {
        if verification_id.trim().is_empty() {
            return Err(EnvelopeError::EmptyVerificationId);
        }
        Ok(Self {
            verification_id: verification_id.to_string(),
            status: VerificationStatus::Initialized,
            references: BTreeMap::new(),
            summary: BTreeMap::new(),
        })
    }

    /// Record a reference, returning the one it replaced.
    pub fn add_reference(
        &mut self,
        key: impl Into<ArtifactKey>,
        reference: Reference,
    ) -> Option<Reference> {
        self.references.insert(key.into(), reference)
    }

    pub fn reference(&self, name: LogicalName) -> Option<&Reference> {
        self.references.get(&ArtifactKey::from(name))
    }

    pub fn set_summary(&mut self, key: &str, value: impl Into<Value>) {
        self.summary.insert(key.to_string(), value.into());
    }

    /// Check every required key and return all problems found.
    pub fn validate(&self, required: &[ArtifactKey]) -> Vec<ReferenceProblem> {
        required
            .iter()
            .filter_map(|key| match self.references.get(key) {
                None => Some(ReferenceProblem::Missing { key: *key }),
                Some(reference) => {
                    reference
                        .validate()
                        .err()
                        .map(|reason| ReferenceProblem::Invalid { key: *key, reason })
                }
            })
            .collect()
    }

    pub fn validate_for(&self, status: VerificationStatus) -> Vec<ReferenceProblem> {
        let required: Vec<ArtifactKey> = status
            .required_references()
            .iter()
            .map(|name| ArtifactKey::from(*name))
            .collect();
        self.validate(&required)
    }

    /// Move to `to` if the table allows it and its references are in place.
    pub fn advance(&mut self, to: VerificationStatus) -> Result<(), EnvelopeError> {
        if !self.status.can_transition_to(to) {
            return Err(EnvelopeError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let problems = self.validate_for(to);
        if !problems.is_empty() {
            return Err(EnvelopeError::MissingReferences {
                status: to.to_string(),
                problems,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Combine two views of the same run.
    ///
    /// The incoming envelope wins for keys both mention; keys only the
    /// existing envelope mentions are kept. Status follows the incoming
    /// envelope only along a legal transition, and only when the merged
    /// references satisfy the new status.
    pub fn merge(existing: &Envelope, incoming: &Envelope) -> Result<Envelope, EnvelopeError> {
        if existing.verification_id != incoming.verification_id {
            return Err(EnvelopeError::VerificationIdMismatch {
                expected: existing.verification_id.clone(),
                actual: incoming.verification_id.clone(),
            });
        }
        let status = if existing.status == incoming.status
            || existing.status.can_transition_to(incoming.status)
        {
            incoming.status
        } else {
            return Err(EnvelopeError::InvalidTransition {
                from: existing.status.to_string(),
                to: incoming.status.to_string(),
            });
        };
        let mut merged = existing.clone();
        merged.status = status;
        merged.references.extend(
            incoming
                .references
                .iter()
                .map(|(key, reference)| (*key, reference.clone())),
        );
        merged.summary.extend(
            incoming
                .summary
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        if status != existing.status {
            let problems = merged.validate_for(status);
            if !problems.is_empty() {
                return Err(EnvelopeError::MissingReferences {
                    status: status.to_string(),
                    problems,
                });
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
