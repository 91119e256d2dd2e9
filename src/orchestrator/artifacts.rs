//! JSON payloads the stages store under `processing/*`, `images/metadata` and
//! `responses/*-processed-response`.
use super::Stage;
use crate::classify::ErrorInfo;
use crate::conversation::{ImageFormat, ThinkingTrace, TokenUsage};
use crate::parser::{Discrepancy, Outcome, ReferenceAnalysis, Verdict};
use crate::state::VerificationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `processing/initialization`, written once when the run is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationRecord {
    pub verification_id: String,
    pub vending_machine_id: String,
    pub layout_id: i64,
    pub layout_prefix: String,
    pub created_at: DateTime<Utc>,
    pub turn1_prompt_version: String,
    pub turn2_prompt_version: String,
    pub discrepancy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub format: ImageFormat,
    pub byte_size: usize,
    /// Hash of the decoded image bytes, not of the base64 artifact.
    pub sha256: String,
}

/// `images/metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesMetadata {
    pub reference: ImageMetadata,
    pub checking: ImageMetadata,
}

/// `responses/turn1-processed-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn1Processed {
    pub verification_id: String,
    /// Answer with any thinking removed. Turn 2 replays this verbatim.
    pub answer: String,
    pub analysis: ReferenceAnalysis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingTrace>,
    pub processed_at: DateTime<Utc>,
}

/// `responses/turn2-processed-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn2Processed {
    pub verification_id: String,
    pub answer: String,
    /// Verdict as read from the answer.
    pub parsed: Verdict,
    /// Verdict after the discrepancy rules were applied.
    pub verdict: Verdict,
    pub discrepancy_threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingTrace>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetrics {
    pub turn_id: u8,
    pub stage_elapsed_ms: u64,
    pub model_latency_ms: u64,
    pub token_usage: TokenUsage,
    pub prompt_chars: usize,
    pub completed_at: DateTime<Utc>,
}

/// `processing/processing-metrics`, rewritten after each turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub verification_id: String,
    pub turns: Vec<TurnMetrics>,
    pub total_token_usage: TokenUsage,
    pub total_model_latency_ms: u64,
}

impl ProcessingMetrics {
    pub fn new(verification_id: &str) -> Self {
        Self {
            verification_id: verification_id.to_string(),
            turns: Vec::new(),
            total_token_usage: TokenUsage::default(),
            total_model_latency_ms: 0,
        }
    }

    /// Add or replace the entry for `turn.turn_id` and recompute totals.
    pub fn record_turn(&mut self, turn: TurnMetrics) {
        self.turns.retain(|existing| existing.turn_id != turn.turn_id);
        self.turns.push(turn);
        self.turns.sort_by_key(|entry| entry.turn_id);
        self.total_token_usage = self
            .turns
            .iter()
            .fold(TokenUsage::default(), |total, entry| total.add(entry.token_usage));
        self.total_model_latency_ms = self.turns.iter().map(|entry| entry.model_latency_ms).sum();
    }
}

/// `processing/final-results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResults {
    pub verification_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vending_machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_id: Option<i64>,
    pub status: VerificationStatus,
    pub outcome: Outcome,
    pub discrepancies: Vec<Discrepancy>,
    pub comparison_summary: String,
    /// True when the outcome came from the keyword fallback.
    pub heuristic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_usage: Option<TokenUsage>,
    pub finalized_at: DateTime<Utc>,
}

/// `processing/error-info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorArtifact {
    pub verification_id: String,
    pub failed_stage: Stage,
    pub status_at_failure: VerificationStatus,
    pub error: ErrorInfo,
    pub recorded_at: DateTime<Utc>,
}
