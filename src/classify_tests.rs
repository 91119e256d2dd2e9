use super::*;
use crate::error::{ReferenceProblem, TemplateError};
use crate::state::LogicalName;

fn ctx() -> ErrorContext {
    ErrorContext::new("orchestrator", "execute_turn2").with("verificationId", "verif-1")
}

fn text(message: &str) -> ErrorInfo {
    ErrorClassifier::new().classify_message("ModelServiceError", message, &ctx())
}

#[test]
fn throttling_text_is_capacity_with_jitter() {
    let info = text("ThrottlingException: Rate exceeded");
    assert_eq!(info.category, ErrorCategory::Capacity);
    assert_eq!(info.retry_strategy, RetryStrategy::Jittered);
    assert_eq!(info.max_retries, 5);
    assert_eq!(info.severity, Severity::Medium);
    assert!(info.retryable);
}

#[test]
fn validation_text_is_a_client_error() {
    let info = text("ValidationException: image format not accepted");
    assert_eq!(info.category, ErrorCategory::Client);
    assert_eq!(info.retry_strategy, RetryStrategy::None);
    assert_eq!(info.severity, Severity::Critical);
    assert!(!info.retryable);
}

#[test]
fn timeout_text_is_network_linear() {
    let info = text("operation timed out while reading response");
    assert_eq!(info.category, ErrorCategory::Network);
    assert_eq!(info.retry_strategy, RetryStrategy::Linear);
    assert_eq!(info.max_retries, 2);
    assert_eq!(info.severity, Severity::High);
}

#[test]
fn template_text_is_permanent() {
    let info = text("template render failed");
    assert_eq!(info.category, ErrorCategory::Permanent);
    assert_eq!(info.retry_strategy, RetryStrategy::None);
    assert_eq!(info.severity, Severity::Critical);
}

#[test]
fn unmatched_text_is_transient_exponential() {
    let info = text("connection reset by peer");
    assert_eq!(info.category, ErrorCategory::Transient);
    assert_eq!(info.retry_strategy, RetryStrategy::Exponential);
    assert_eq!(info.max_retries, 3);
    assert_eq!(info.severity, Severity::High);
}

#[test]
fn rules_apply_in_order() {
    let info = text("throttled: invalid burst rate");
    assert_eq!(info.category, ErrorCategory::Capacity);
}

#[test]
fn every_classification_carries_context_and_a_suggestion() {
    let samples = [
        text("anything"),
        text("throttling"),
        ErrorClassifier::new().classify(&StageError::Validation("empty prompt".into()), &ctx()),
    ];
    for info in samples {
        assert_eq!(info.component, "orchestrator");
        assert_eq!(info.operation, "execute_turn2");
        assert_eq!(info.context.get("verificationId").map(String::as_str), Some("verif-1"));
        assert!(!info.suggestions.is_empty());
    }
}

#[test]
fn deadline_and_cancellation_are_retryable_network_errors() {
    for error in [
        ModelServiceError::DeadlineExceeded { elapsed_ms: 30_000 },
        ModelServiceError::Cancelled,
    ] {
        let info = ErrorClassifier::new().classify(&StageError::Model(error), &ctx());
        assert_eq!(info.category, ErrorCategory::Network);
        assert_eq!(info.retry_strategy, RetryStrategy::Linear);
        assert!(info.retryable);
        assert_eq!(info.error_type, "ModelServiceError");
    }
}

#[test]
fn typed_errors_map_to_their_policies() {
    let classifier = ErrorClassifier::new();
    let cases = [
        (
            StageError::Model(ModelServiceError::Throttled("slow down".into())),
            ErrorCategory::Capacity,
        ),
        (
            StageError::Model(ModelServiceError::Rejected {
                status: 400,
                message: "bad".into(),
            }),
            ErrorCategory::Client,
        ),
        (
            StageError::Model(ModelServiceError::Server {
                status: 503,
                message: "down".into(),
            }),
            ErrorCategory::Server,
        ),
        (
            StageError::Store(StoreError::Io {
                key: "k".into(),
                source: std::io::Error::other("disk"),
            }),
            ErrorCategory::Transient,
        ),
        (
            StageError::Template(TemplateError::Unknown("turn9".into())),
            ErrorCategory::Permanent,
        ),
        (
            StageError::Model(ModelServiceError::Transport("request timed out".into())),
            ErrorCategory::Network,
        ),
    ];
    for (error, expected) in cases {
        let info = classifier.classify(&error, &ctx());
        assert_eq!(info.category, expected, "{error}");
    }
}

#[test]
fn reference_errors_are_permanent_with_hints_per_artifact() {
    let error = StageError::Reference(vec![
        ReferenceProblem::Missing {
            key: LogicalName::Turn1RawResponse.into(),
        },
        ReferenceProblem::Missing {
            key: LogicalName::Turn1ProcessedResponse.into(),
        },
    ]);
    let info = ErrorClassifier::new().classify(&error, &ctx());
    assert_eq!(info.error_type, "ReferenceError");
    assert_eq!(info.category, ErrorCategory::Permanent);
    assert!(!info.retryable);
    assert!(info
        .recovery_hints
        .iter()
        .any(|hint| hint.contains("responses_turn1-raw-response")));
}

#[test]
fn retry_delays_follow_the_strategy() {
    let base = Duration::from_millis(100);
    let network = text("timeout");
    assert_eq!(network.retry_delay(1, base), Some(Duration::from_millis(100)));
    assert_eq!(network.retry_delay(2, base), Some(Duration::from_millis(200)));
    assert_eq!(network.retry_delay(3, base), None);

    let transient = text("reset");
    assert_eq!(transient.retry_delay(3, base), Some(Duration::from_millis(400)));

    let capacity = text("throttling");
    for attempt in 1..=5 {
        let delay = capacity.retry_delay(attempt, base).expect("delay");
        let nominal = base * 2u32.pow(attempt - 1);
        assert!(delay >= nominal.mul_f64(0.5) && delay <= nominal.mul_f64(1.5));
    }

    let client = text("invalid");
    assert_eq!(client.retry_delay(1, base), None);
}

#[test]
fn error_info_serializes_in_camel_case() {
    let info = text("throttling");
    let json = serde_json::to_value(&info).expect("serialize");
    assert_eq!(json["retryStrategy"], "jittered");
    assert_eq!(json["maxRetries"], 5);
    assert_eq!(json["category"], "capacity");
    assert_eq!(info.category.to_string(), "capacity");
}
