use super::{ImageFormat, ThinkingTrace, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingTrace>,
    pub image_format: ImageFormat,
    pub message_count: usize,
}

/// One completed model exchange, persisted as `responses/turnN-raw-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub turn_id: u8,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub content: String,
    pub stop_reason: String,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    pub model_id: String,
    pub metadata: TurnMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnExchange {
    pub turn_id: u8,
    pub user_prompt: String,
    pub assistant_content: String,
    pub timestamp: DateTime<Utc>,
}

/// Turn bookkeeping for one run. `current_turn` never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTracker {
    pub conversation_id: String,
    pub current_turn: u8,
    pub max_turns: u8,
    pub turn_status: TurnStatus,
    pub history: Vec<TurnExchange>,
}

impl ConversationTracker {
    pub const MAX_TURNS: u8 = 2;

    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            current_turn: 0,
            max_turns: Self::MAX_TURNS,
            turn_status: TurnStatus::Pending,
            history: Vec::new(),
        }
    }

    /// Rebuild the tracker a later process needs from the stored turn-1 response.
    pub fn resume_after_turn1(conversation_id: &str, turn1: &TurnResponse) -> Result<Self, String> {
        let mut tracker = Self::new(conversation_id);
        tracker.begin_turn(1)?;
        tracker.complete_turn(turn1)?;
        Ok(tracker)
    }

    pub fn begin_turn(&mut self, turn: u8) -> Result<(), String> {
        if turn != self.current_turn + 1 {
            return Err(format!(
                "turn {turn} cannot start after turn {}",
                self.current_turn
            ));
        }
        if turn > self.max_turns {
            return Err(format!("turn {turn} exceeds max turns {}", self.max_turns));
        }
        if turn > 1 && self.turn_status != TurnStatus::Completed {
            return Err(format!(
                "turn {turn} requires turn {} to be completed",
                self.current_turn
            ));
        }
        self.current_turn = turn;
        self.turn_status = TurnStatus::InProgress;
        Ok(())
    }

    pub fn complete_turn(&mut self, response: &TurnResponse) -> Result<(), String> {
        if self.turn_status != TurnStatus::InProgress || response.turn_id != self.current_turn {
            return Err(format!(
                "cannot complete turn {} while turn {} is {:?}",
                response.turn_id, self.current_turn, self.turn_status
            ));
        }
        self.history.push(TurnExchange {
            turn_id: response.turn_id,
            user_prompt: response.prompt.clone(),
            assistant_content: response.content.clone(),
            timestamp: response.timestamp,
        });
        self.turn_status = TurnStatus::Completed;
        Ok(())
    }

    pub fn fail_turn(&mut self) {
        self.turn_status = TurnStatus::Failed;
    }
}
