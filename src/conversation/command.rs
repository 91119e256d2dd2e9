//! Local command model backend.
//!
//! Runs a user-configured command (split with shell-words), writes the
//! `ConverseRequest` JSON to its stdin, and reads the reply from stdout.
//! Stdout may be a `ConverseReply` JSON object or plain answer text; plain
//! text is wrapped as a single text block. The child is killed as soon as the
//! deadline passes or the call is cancelled.
use super::{ContentBlock, ConverseReply, ConverseRequest, Deadline, ModelService, TokenUsage};
use crate::error::ModelServiceError;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandModelService {
    command: String,
}

impl CommandModelService {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Parse stdout as a reply, falling back to plain answer text.
fn parse_reply(stdout: &[u8], model_id: &str) -> Result<ConverseReply, ModelServiceError> {
    let text = String::from_utf8(stdout.to_vec())
        .map_err(|err| ModelServiceError::InvalidReply(format!("stdout is not UTF-8: {err}")))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ModelServiceError::InvalidReply(
            "model command produced no output".to_string(),
        ));
    }
    if trimmed.starts_with('{') {
        if let Ok(reply) = serde_json::from_str::<ConverseReply>(trimmed) {
            return Ok(reply);
        }
    }
    Ok(ConverseReply {
        content: vec![ContentBlock::Text {
            text: trimmed.to_string(),
        }],
        stop_reason: "end_turn".to_string(),
        usage: TokenUsage::default(),
        model_id: model_id.to_string(),
    })
}

impl ModelService for CommandModelService {
    fn converse(
        &self,
        request: &ConverseRequest,
        deadline: &Deadline,
    ) -> Result<ConverseReply, ModelServiceError> {
        deadline.check()?;
        let args = shell_words::split(&self.command).map_err(|err| {
            ModelServiceError::Command(format!("parse model command {:?}: {err}", self.command))
        })?;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| ModelServiceError::Command("model command is empty".to_string()))?;
        let payload = serde_json::to_vec(request)
            .map_err(|err| ModelServiceError::Command(format!("encode request: {err}")))?;

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ModelServiceError::Command(format!("spawn {program}: {err}")))?;

        let request_bytes = payload.len();
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&payload);
            }
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    stop(&mut child);
                    return Err(ModelServiceError::Command(format!("wait for {program}: {err}")));
                }
            }
            if let Err(err) = deadline.check() {
                stop(&mut child);
                tracing::warn!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %err,
                    "model command stopped"
                );
                return Err(err);
            }
            thread::sleep(
                deadline
                    .remaining()
                    .map_or(POLL_INTERVAL, |left| left.min(POLL_INTERVAL)),
            );
        };

        let _ = writer.join();
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            request_bytes,
            response_bytes = stdout.len(),
            "model command complete"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(ModelServiceError::Command(format!(
                "{program} exited with {status}: {}",
                stderr.trim()
            )));
        }
        parse_reply(&stdout, &request.model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::InferenceConfig;

    fn request() -> ConverseRequest {
        ConverseRequest {
            model_id: "local-model".into(),
            system: "system".into(),
            messages: Vec::new(),
            inference: InferenceConfig {
                max_tokens: 16,
                temperature: 0.7,
                thinking_budget_tokens: None,
            },
        }
    }

    #[test]
    fn json_replies_are_used_as_is() {
        let stdout = br#"{"content":[{"type":"text","text":"hi"}],"stopReason":"end_turn","usage":{"inputTokens":3,"outputTokens":1}}"#;
        let reply = parse_reply(stdout, "local-model").expect("reply");
        assert_eq!(reply.answer_text(), "hi");
        assert_eq!(reply.usage.input_tokens, 3);
    }

    #[test]
    fn plain_text_is_wrapped() {
        let reply = parse_reply(b"  Row A is full.\n", "local-model").expect("reply");
        assert_eq!(reply.answer_text(), "Row A is full.");
        assert_eq!(reply.model_id, "local-model");
        assert!(parse_reply(b"   ", "m").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_output_becomes_the_reply() {
        let service = CommandModelService::new("sh -c 'cat >/dev/null; echo Verification Outcome: CORRECT'");
        let reply = service
            .converse(&request(), &Deadline::after(Duration::from_secs(10)))
            .expect("reply");
        assert_eq!(reply.answer_text(), "Verification Outcome: CORRECT");
    }

    #[cfg(unix)]
    #[test]
    fn slow_commands_are_killed_at_the_deadline() {
        let service = CommandModelService::new("sleep 5");
        let start = Instant::now();
        let err = service
            .converse(&request(), &Deadline::after(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, ModelServiceError::DeadlineExceeded { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn failing_commands_report_stderr() {
        let service = CommandModelService::new("sh -c 'echo boom >&2; exit 3'");
        let err = service
            .converse(&request(), &Deadline::after(Duration::from_secs(10)))
            .unwrap_err();
        match err {
            ModelServiceError::Command(message) => assert!(message.contains("boom"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
