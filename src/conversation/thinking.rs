//! Separating a model's deliberation from its final answer.
//!
//! Sources are tried in order: dedicated reasoning blocks in the reply, then
//! delimiters inside the answer text (`<reasoning>`, `<thinking>`, `<think>`,
//! a ```` ```thinking ```` fence, a `Thinking` header). When thinking is
//! enabled and none is found, a leading excerpt of the answer is attached and
//! flagged synthetic.
use super::ConverseReply;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const SYNTHETIC_EXCERPT_CHARS: usize = 1000;
const TRUNCATION_MARKER: &str = "... [truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingSource {
    ReasoningBlock,
    Tagged,
    Fenced,
    Header,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingTrace {
    pub text: String,
    pub source: ThinkingSource,
    pub synthetic: bool,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingSettings {
    pub enabled: bool,
    /// Longest trace kept, in characters.
    pub max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAnswer {
    pub answer: String,
    pub thinking: Option<ThinkingTrace>,
}

fn delimiters() -> &'static [(Regex, ThinkingSource)] {
    static DELIMITERS: OnceLock<Vec<(Regex, ThinkingSource)>> = OnceLock::new();
    DELIMITERS.get_or_init(|| {
        [
            (r"(?s)<reasoning>(.*?)</reasoning>", ThinkingSource::Tagged),
            (r"(?s)<thinking>(.*?)</thinking>", ThinkingSource::Tagged),
            (r"(?s)<think>(.*?)</think>", ThinkingSource::Tagged),
            (r"(?s)```thinking[^\S\n]*\n(.*?)```", ThinkingSource::Fenced),
            (
                r"(?ms)^(?:#{1,2}[^\S\n]*Thinking|Thinking:)[^\S\n]*\n(.*?)(?:\n[^\S\n]*\n|\z)",
                ThinkingSource::Header,
            ),
        ]
        .into_iter()
        .map(|(pattern, source)| {
            (
                Regex::new(pattern).expect("regex for thinking delimiter"),
                source,
            )
        })
        .collect()
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}{TRUNCATION_MARKER}", &text[..cut]), true),
        None => (text.to_string(), false),
    }
}

fn trace(text: &str, source: ThinkingSource, settings: &ThinkingSettings) -> ThinkingTrace {
    let (text, truncated) = truncate_chars(text.trim(), settings.max_chars);
    ThinkingTrace {
        text,
        source,
        synthetic: source == ThinkingSource::Synthetic,
        truncated,
    }
}

pub fn extract_thinking(reply: &ConverseReply, settings: &ThinkingSettings) -> SplitAnswer {
    let answer = reply.answer_text();
    if let Some(reasoning) = reply.reasoning_text() {
        return SplitAnswer {
            answer: answer.trim().to_string(),
            thinking: Some(trace(&reasoning, ThinkingSource::ReasoningBlock, settings)),
        };
    }

    for (regex, source) in delimiters() {
        let Some(caps) = regex.captures(&answer) else {
            continue;
        };
        let thinking = caps[1].trim();
        if thinking.is_empty() {
            continue;
        }
        let stripped = regex.replace(&answer, "").trim().to_string();
        return SplitAnswer {
            answer: stripped,
            thinking: Some(trace(thinking, *source, settings)),
        };
    }

    let answer = answer.trim().to_string();
    let thinking = (settings.enabled && !answer.is_empty()).then(|| {
        let (excerpt, _) = truncate_chars(&answer, SYNTHETIC_EXCERPT_CHARS);
        trace(&excerpt, ThinkingSource::Synthetic, settings)
    });
    SplitAnswer { answer, thinking }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ContentBlock, TokenUsage};

    fn reply(blocks: Vec<ContentBlock>) -> ConverseReply {
        ConverseReply {
            content: blocks,
            stop_reason: "end_turn".into(),
            usage: TokenUsage::default(),
            model_id: "m".into(),
        }
    }

    fn text(text: &str) -> ConverseReply {
        reply(vec![ContentBlock::Text { text: text.into() }])
    }

    const ON: ThinkingSettings = ThinkingSettings {
        enabled: true,
        max_chars: 64_000,
    };

    #[test]
    fn reasoning_blocks_take_priority() {
        let split = extract_thinking(
            &reply(vec![
                ContentBlock::Reasoning {
                    text: "check row A first".into(),
                },
                ContentBlock::Text {
                    text: "<thinking>ignored</thinking>Row A ok".into(),
                },
            ]),
            &ON,
        );
        let thinking = split.thinking.expect("thinking");
        assert_eq!(thinking.source, ThinkingSource::ReasoningBlock);
        assert_eq!(thinking.text, "check row A first");
        assert!(!thinking.synthetic);
    }

    #[test]
    fn tagged_thinking_is_removed_from_the_answer() {
        let split = extract_thinking(
            &text("<thinking>\ncount slots\n</thinking>\nVerification Outcome: CORRECT"),
            &ON,
        );
        assert_eq!(split.answer, "Verification Outcome: CORRECT");
        let thinking = split.thinking.expect("thinking");
        assert_eq!(thinking.text, "count slots");
        assert_eq!(thinking.source, ThinkingSource::Tagged);
    }

    #[test]
    fn fenced_and_header_forms_are_recognized() {
        let fenced = extract_thinking(&text("```thinking\nrow B\n```\nAnswer"), &ON);
        assert_eq!(fenced.thinking.expect("fenced").source, ThinkingSource::Fenced);
        assert_eq!(fenced.answer, "Answer");

        let header = extract_thinking(&text("## Thinking\nrow C looks off\n\nAnswer"), &ON);
        let thinking = header.thinking.expect("header");
        assert_eq!(thinking.source, ThinkingSource::Header);
        assert_eq!(thinking.text, "row C looks off");
        assert_eq!(header.answer, "Answer");
    }

    #[test]
    fn missing_delimiters_yield_a_flagged_synthetic_excerpt() {
        let long = "x".repeat(1500);
        let split = extract_thinking(&text(&long), &ON);
        let thinking = split.thinking.expect("synthetic");
        assert!(thinking.synthetic);
        assert_eq!(thinking.source, ThinkingSource::Synthetic);
        assert!(thinking.text.starts_with(&"x".repeat(1000)));
        assert!(thinking.text.ends_with(TRUNCATION_MARKER));
        assert_eq!(split.answer, long);
    }

    #[test]
    fn disabled_thinking_adds_nothing_synthetic() {
        let off = ThinkingSettings {
            enabled: false,
            max_chars: 10,
        };
        assert_eq!(extract_thinking(&text("plain answer"), &off).thinking, None);
        let tagged = extract_thinking(&text("<think>abcdefghijklmnop</think>done"), &off);
        let thinking = tagged.thinking.expect("genuine thinking is still separated");
        assert!(thinking.truncated);
        assert_eq!(thinking.text, format!("abcdefghij{TRUNCATION_MARKER}"));
    }
}
