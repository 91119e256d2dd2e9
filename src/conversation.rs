//! Model conversation types and the model service port.
//!
//! The request shape is the one the orchestrator sends for both turns:
//! a system prompt on its own channel, an ordered list of user/assistant
//! messages, and inference settings.
mod command;
mod deadline;
mod http;
mod image;
mod request;
mod thinking;
mod tracker;

pub use command::CommandModelService;
pub use deadline::{CancelHandle, Deadline};
pub use http::HttpModelService;
pub use image::{EncodedImage, ImageFormat};
pub use request::{build_turn1_request, build_turn2_request, validate_request, ModelSettings};
pub use thinking::{extract_thinking, SplitAnswer, ThinkingSettings, ThinkingSource, ThinkingTrace};
pub use tracker::{ConversationTracker, TurnExchange, TurnMetadata, TurnResponse, TurnStatus};

use crate::error::ModelServiceError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { format: ImageFormat, data: String },
    Reasoning { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_with_image(text: &str, image: &EncodedImage) -> Self {
        Self {
            role: Role::User,
            content: vec![
                ContentBlock::Text {
                    text: text.to_string(),
                },
                ContentBlock::Image {
                    format: image.format,
                    data: image.data.clone(),
                },
            ],
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    pub fn text(&self) -> String {
        join_text(&self.content)
    }
}

fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    pub model_id: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub thinking_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Fill in `total_tokens` when the service left it out.
    pub fn normalized(self) -> Self {
        let total = if self.total_tokens == 0 {
            self.input_tokens
                .saturating_add(self.output_tokens)
                .saturating_add(self.thinking_tokens)
        } else {
            self.total_tokens
        };
        Self {
            total_tokens: total,
            ..self
        }
    }

    pub fn add(self, other: TokenUsage) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            thinking_tokens: self.thinking_tokens.saturating_add(other.thinking_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseReply {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub model_id: String,
}

impl ConverseReply {
    /// Final answer text, excluding reasoning blocks.
    pub fn answer_text(&self) -> String {
        join_text(&self.content)
    }

    pub fn reasoning_text(&self) -> Option<String> {
        let text = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Reasoning { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        (!text.trim().is_empty()).then_some(text)
    }
}

/// A vision-capable conversational model.
///
/// Implementations must give up once `deadline` passes or is cancelled and
/// report that as `DeadlineExceeded` or `Cancelled`.
pub trait ModelService: Send + Sync {
    fn converse(
        &self,
        request: &ConverseRequest,
        deadline: &Deadline,
    ) -> Result<ConverseReply, ModelServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_totals_saturate_instead_of_overflowing() {
        let huge = TokenUsage {
            input_tokens: u64::MAX,
            output_tokens: 10,
            thinking_tokens: 5,
            total_tokens: 0,
        };
        assert_eq!(huge.normalized().total_tokens, u64::MAX);

        let summed = huge.normalized().add(TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
            thinking_tokens: 3,
            total_tokens: 6,
        });
        assert_eq!(summed.input_tokens, u64::MAX);
        assert_eq!(summed.output_tokens, 12);
        assert_eq!(summed.total_tokens, u64::MAX);
    }
}
