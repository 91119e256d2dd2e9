//! JSON-over-HTTP model backend.
//!
//! POSTs the `ConverseRequest` as JSON and expects a `ConverseReply` back.
//! Connect and overall timeouts are derived from the caller's deadline on
//! every call, so a slow service surfaces as `DeadlineExceeded` instead of
//! hanging the stage.
use super::{ConverseReply, ConverseRequest, Deadline, ModelService};
use crate::error::ModelServiceError;
use std::time::{Duration, Instant};
use ureq::Agent;

#[derive(Debug, Clone)]
pub struct HttpModelService {
    endpoint: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl HttpModelService {
    pub fn new(endpoint: &str, api_key: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            connect_timeout,
        }
    }

    fn agent(&self, remaining: Duration) -> Agent {
        let config = Agent::config_builder()
            .timeout_connect(Some(self.connect_timeout.min(remaining)))
            .timeout_global(Some(remaining))
            .http_status_as_error(false)
            .build();
        Agent::new_with_config(config)
    }
}

fn transport_error(err: ureq::Error, deadline: &Deadline) -> ModelServiceError {
    match err {
        ureq::Error::Timeout(_) => ModelServiceError::DeadlineExceeded {
            elapsed_ms: deadline.elapsed_ms(),
        },
        other => ModelServiceError::Transport(other.to_string()),
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn status_error(status: u16, body: &str) -> ModelServiceError {
    let message = body.trim().chars().take(500).collect::<String>();
    let throttled = message.to_ascii_lowercase().contains("throttl");
    match status {
        429 => ModelServiceError::Throttled(message),
        408 | 504 => ModelServiceError::Transport(format!("upstream timeout ({status}): {message}")),
        503 if throttled => ModelServiceError::Throttled(message),
        400..=499 => ModelServiceError::Rejected { status, message },
        _ => ModelServiceError::Server { status, message },
    }
}

impl ModelService for HttpModelService {
    fn converse(
        &self,
        request: &ConverseRequest,
        deadline: &Deadline,
    ) -> Result<ConverseReply, ModelServiceError> {
        deadline.check()?;
        let remaining = deadline
            .remaining()
            .ok_or_else(|| ModelServiceError::DeadlineExceeded {
                elapsed_ms: deadline.elapsed_ms(),
            })?;
        let start = Instant::now();

        let mut call = self
            .agent(remaining)
            .post(&self.endpoint)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            call = call.header("authorization", format!("Bearer {key}"));
        }
        let mut response = call
            .send_json(request)
            .map_err(|err| transport_error(err, deadline))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            tracing::warn!(status, endpoint = %self.endpoint, "model service returned an error status");
            return Err(status_error(status, &body));
        }
        let reply: ConverseReply = response.body_mut().read_json().map_err(|err| match err {
            ureq::Error::Timeout(_) => ModelServiceError::DeadlineExceeded {
                elapsed_ms: deadline.elapsed_ms(),
            },
            other => ModelServiceError::InvalidReply(other.to_string()),
        })?;
        deadline.check()?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            status,
            output_tokens = reply.usage.output_tokens,
            "model http call complete"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::InferenceConfig;

    #[test]
    fn statuses_map_onto_the_taxonomy() {
        assert!(matches!(
            status_error(429, "slow down"),
            ModelServiceError::Throttled(_)
        ));
        assert!(matches!(
            status_error(503, "ThrottlingException"),
            ModelServiceError::Throttled(_)
        ));
        assert!(matches!(
            status_error(503, "maintenance"),
            ModelServiceError::Server { status: 503, .. }
        ));
        assert!(matches!(
            status_error(400, "ValidationException"),
            ModelServiceError::Rejected { status: 400, .. }
        ));
        match status_error(504, "") {
            ModelServiceError::Transport(message) => assert!(message.contains("timeout")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expired_deadline_fails_before_connecting() {
        let service = HttpModelService::new(
            "http://127.0.0.1:9/converse",
            None,
            Duration::from_millis(10),
        );
        let request = ConverseRequest {
            model_id: "m".into(),
            system: "s".into(),
            messages: Vec::new(),
            inference: InferenceConfig {
                max_tokens: 1,
                temperature: 0.0,
                thinking_budget_tokens: None,
            },
        };
        let err = service
            .converse(&request, &Deadline::after(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, ModelServiceError::DeadlineExceeded { .. }));
    }
}
