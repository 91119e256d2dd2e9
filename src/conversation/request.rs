//! Turn request construction and pre-send validation.
use super::{ContentBlock, ConverseRequest, EncodedImage, InferenceConfig, Message, Role};
use serde::{Deserialize, Serialize};

/// Model settings copied out of configuration for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub thinking_budget_tokens: Option<u32>,
}

impl ModelSettings {
    fn inference(&self) -> InferenceConfig {
        InferenceConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            thinking_budget_tokens: self.thinking_budget_tokens,
        }
    }
}

/// System prompt plus one user message with the turn-1 text and reference image.
pub fn build_turn1_request(
    settings: &ModelSettings,
    system_prompt: &str,
    turn1_prompt: &str,
    reference_image: &EncodedImage,
) -> ConverseRequest {
    ConverseRequest {
        model_id: settings.model_id.clone(),
        system: system_prompt.to_string(),
        messages: vec![Message::user_with_image(turn1_prompt, reference_image)],
        inference: settings.inference(),
    }
}

/// Turn-1 exchange replayed, then the turn-2 text and checking image.
///
/// The turn-1 prompt and reference image go back byte for byte. The assistant
/// message is `turn1_answer`, which callers pass with thinking already
/// stripped; the raw turn-1 content, reasoning included, is not replayed.
pub fn build_turn2_request(
    settings: &ModelSettings,
    system_prompt: &str,
    turn1_prompt: &str,
    reference_image: &EncodedImage,
    turn1_answer: &str,
    turn2_prompt: &str,
    checking_image: &EncodedImage,
) -> ConverseRequest {
    ConverseRequest {
        model_id: settings.model_id.clone(),
        system: system_prompt.to_string(),
        messages: vec![
            Message::user_with_image(turn1_prompt, reference_image),
            Message::assistant(turn1_answer),
            Message::user_with_image(turn2_prompt, checking_image),
        ],
        inference: settings.inference(),
    }
}

/// Catch requests the model service would reject, before spending a call.
pub fn validate_request(request: &ConverseRequest) -> Result<(), String> {
    if request.model_id.trim().is_empty() {
        return Err("model id is empty".to_string());
    }
    if request.system.trim().is_empty() {
        return Err("system prompt is empty".to_string());
    }
    if request.inference.max_tokens == 0 {
        return Err("max tokens must be positive".to_string());
    }
    if !(0.0..=1.0).contains(&request.inference.temperature) {
        return Err(format!(
            "temperature {} is outside [0, 1]",
            request.inference.temperature
        ));
    }
    if request.messages.is_empty() {
        return Err("request has no messages".to_string());
    }
    let mut expected = Role::User;
    for (index, message) in request.messages.iter().enumerate() {
        if message.role != expected {
            return Err(format!(
                "message {index} has role {:?}; roles must alternate starting with user",
                message.role
            ));
        }
        if message.content.is_empty() {
            return Err(format!("message {index} has no content"));
        }
        for block in &message.content {
            match block {
                ContentBlock::Text { text } if text.trim().is_empty() => {
                    return Err(format!("message {index} has an empty text block"));
                }
                ContentBlock::Image { data, .. } if data.trim().is_empty() => {
                    return Err(format!("message {index} has an empty image"));
                }
                ContentBlock::Reasoning { .. } => {
                    return Err(format!("message {index} carries a reasoning block"));
                }
                _ => {}
            }
        }
        expected = match expected {
            Role::User => Role::Assistant,
            Role::Assistant => Role::User,
        };
    }
    if request.messages.last().map(|message| message.role) != Some(Role::User) {
        return Err("last message must come from the user".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ImageFormat;

    fn settings() -> ModelSettings {
        ModelSettings {
            model_id: "vision-model".into(),
            max_tokens: 24_000,
            temperature: 0.7,
            thinking_budget_tokens: Some(16_000),
        }
    }

    fn image(data: &str, format: ImageFormat) -> EncodedImage {
        EncodedImage {
            format,
            data: data.into(),
            byte_size: 3,
        }
    }

    #[test]
    fn turn1_request_keeps_system_prompt_out_of_messages() {
        let request = build_turn1_request(
            &settings(),
            "system",
            "describe",
            &image("AAA=", ImageFormat::Png),
        );
        assert_eq!(request.system, "system");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.messages[0].text(), "describe");
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn turn2_request_replays_turn1_verbatim() {
        let reference = image("UkVG", ImageFormat::Png);
        let checking = image("Q0hL", ImageFormat::Jpeg);
        let turn1 = build_turn1_request(&settings(), "system", "describe", &reference);
        let turn2 = build_turn2_request(
            &settings(),
            "system",
            "describe",
            &reference,
            "Row A: Coke x6",
            "compare",
            &checking,
        );
        assert_eq!(turn2.messages[0], turn1.messages[0]);
        assert_eq!(turn2.messages[1], Message::assistant("Row A: Coke x6"));
        assert_eq!(
            turn2.messages[2].content[1],
            ContentBlock::Image {
                format: ImageFormat::Jpeg,
                data: "Q0hL".into()
            }
        );
        assert!(validate_request(&turn2).is_ok());
    }

    #[test]
    fn malformed_requests_are_rejected() {
        let reference = image("UkVG", ImageFormat::Png);
        let mut request = build_turn1_request(&settings(), " ", "describe", &reference);
        assert!(validate_request(&request).unwrap_err().contains("system prompt"));

        request.system = "system".into();
        request.messages.push(Message::assistant("dangling"));
        assert!(validate_request(&request).unwrap_err().contains("last message"));

        let empty_answer = build_turn2_request(
            &settings(),
            "system",
            "describe",
            &reference,
            "",
            "compare",
            &reference,
        );
        assert!(validate_request(&empty_answer)
            .unwrap_err()
            .contains("empty text"));

        let no_image = build_turn1_request(&settings(), "system", "describe", &image("", ImageFormat::Png));
        assert!(validate_request(&no_image).unwrap_err().contains("empty image"));
    }
}
