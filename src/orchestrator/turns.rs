//! The two model turns.
//!
//! Turn 1 describes the reference image. Turn 2 replays turn 1 from the
//! stored artifacts (the prompt verbatim, the answer without its thinking),
//! adds the checking image, and produces the verdict.
//! Both turns check their inputs before the status moves, so a missing
//! artifact never costs a model call.
use super::artifacts::{ProcessingMetrics, TurnMetrics, Turn1Processed, Turn2Processed};
use super::{advance, ensure_transition, preflight, reference_of, run_stage, Services, Stage, StageFailure};
use crate::conversation::{
    build_turn1_request, build_turn2_request, extract_thinking, validate_request,
    ConversationTracker, ConverseReply, ConverseRequest, Deadline, EncodedImage, ImageFormat,
    SplitAnswer, TurnMetadata, TurnResponse,
};
use crate::error::{ModelServiceError, StageError};
use crate::parser::{interpret_discrepancies, parse_reference_analysis, parse_verdict, Outcome, Verdict};
use crate::state::{Envelope, LogicalName, Reference, StateStore, VerificationStatus};
use chrono::Utc;
use std::time::Instant;

struct ModelCall {
    reply: ConverseReply,
    latency_ms: u64,
}

fn converse(
    services: &Services,
    request: &ConverseRequest,
    stage_deadline: &Deadline,
    verification_id: &str,
    turn: u8,
) -> Result<ModelCall, StageError> {
    let deadline = stage_deadline.narrowed(services.config.model.call_timeout());
    let start = Instant::now();
    let reply = services.model.converse(request, &deadline)?;
    let latency_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        verification_id,
        turn,
        latency_ms,
        input_tokens = reply.usage.input_tokens,
        output_tokens = reply.usage.output_tokens,
        stop_reason = %reply.stop_reason,
        "model turn complete"
    );
    Ok(ModelCall { reply, latency_ms })
}

fn split_answer(services: &Services, call: &ModelCall) -> Result<SplitAnswer, StageError> {
    let split = extract_thinking(&call.reply, &services.config.model.thinking_settings());
    if split.answer.is_empty() {
        return Err(ModelServiceError::InvalidReply(
            "model reply has no answer text".to_string(),
        )
        .into());
    }
    Ok(split)
}

fn turn_response(
    services: &Services,
    turn_id: u8,
    prompt: &str,
    call: &ModelCall,
    split: &SplitAnswer,
    image_format: ImageFormat,
    message_count: usize,
) -> TurnResponse {
    let model_id = if call.reply.model_id.is_empty() {
        services.config.model.model_id.clone()
    } else {
        call.reply.model_id.clone()
    };
    TurnResponse {
        turn_id,
        timestamp: Utc::now(),
        prompt: prompt.to_string(),
        content: call.reply.answer_text(),
        stop_reason: call.reply.stop_reason.clone(),
        token_usage: call.reply.usage.normalized(),
        latency_ms: call.latency_ms,
        model_id,
        metadata: TurnMetadata {
            thinking: split.thinking.clone(),
            image_format,
            message_count,
        },
    }
}

/// Store a new version of `processing/processing-metrics` with this turn's
/// entry. The version the envelope pointed at stays readable.
fn record_metrics(
    state: &StateStore,
    envelope: &Envelope,
    turn: TurnMetrics,
) -> Result<Reference, StageError> {
    let mut metrics = match envelope.reference(LogicalName::ProcessingMetrics) {
        Some(reference) => state.get_json(reference)?,
        None => ProcessingMetrics::new(&envelope.verification_id),
    };
    metrics.record_turn(turn);
    Ok(state.put_json(
        &envelope.verification_id,
        LogicalName::ProcessingMetrics,
        &metrics,
    )?)
}

fn turn_metrics(response: &TurnResponse, started: Instant, prompt_chars: usize) -> TurnMetrics {
    TurnMetrics {
        turn_id: response.turn_id,
        stage_elapsed_ms: started.elapsed().as_millis() as u64,
        model_latency_ms: response.latency_ms,
        token_usage: response.token_usage,
        prompt_chars,
        completed_at: Utc::now(),
    }
}

/// Fill in an outcome the answer never stated, from its discrepancy list.
fn settle_outcome(verdict: Verdict) -> Verdict {
    if verdict.outcome.is_some() {
        return verdict;
    }
    let mut settled = verdict;
    settled.outcome = Some(if settled.discrepancies.is_empty() {
        Outcome::Correct
    } else {
        Outcome::Incorrect
    });
    settled.matched_rules.push("outcome_from_discrepancies".to_string());
    settled
}

pub fn execute_turn1(services: &Services, envelope: &Envelope) -> Result<Envelope, StageFailure> {
    run_stage(services, Stage::ExecuteTurn1, &envelope.verification_id, |state, deadline| {
        let started = Instant::now();
        let target = VerificationStatus::Turn1InProgress;
        preflight(state, envelope, target.required_references())?;
        ensure_transition(envelope, target)?;

        let verification_id = &envelope.verification_id;
        let system = state.get_text(reference_of(envelope, LogicalName::SystemPrompt)?)?;
        let prompt = state.get_text(reference_of(envelope, LogicalName::Turn1Prompt)?)?;
        let image: EncodedImage =
            state.get_json(reference_of(envelope, LogicalName::ReferenceImageBase64)?)?;
        let settings = services.config.model.settings();
        let request = build_turn1_request(&settings, &system, &prompt, &image);
        validate_request(&request).map_err(StageError::Validation)?;

        let mut tracker = ConversationTracker::new(verification_id);
        tracker.begin_turn(1).map_err(StageError::Validation)?;
        let mut next = envelope.clone();
        advance(services, deadline, &mut next, target, Stage::ExecuteTurn1, None)?;

        let call = converse(services, &request, deadline, verification_id, 1)?;
        let split = split_answer(services, &call)?;
        let response = turn_response(
            services,
            1,
            &prompt,
            &call,
            &split,
            image.format,
            request.messages.len(),
        );
        tracker
            .complete_turn(&response)
            .map_err(StageError::Validation)?;
        let processed = Turn1Processed {
            verification_id: verification_id.clone(),
            analysis: parse_reference_analysis(&split.answer),
            answer: split.answer,
            thinking: split.thinking,
            processed_at: Utc::now(),
        };

        next.add_reference(
            LogicalName::Turn1RawResponse,
            state.put_json(verification_id, LogicalName::Turn1RawResponse, &response)?,
        );
        next.add_reference(
            LogicalName::Turn1ProcessedResponse,
            state.put_json(verification_id, LogicalName::Turn1ProcessedResponse, &processed)?,
        );
        next.add_reference(
            LogicalName::Turn1Conversation,
            state.put_json(verification_id, LogicalName::Turn1Conversation, &tracker)?,
        );
        let metrics = record_metrics(
            state,
            &next,
            turn_metrics(&response, started, prompt.chars().count()),
        )?;
        next.add_reference(LogicalName::ProcessingMetrics, metrics);
        next.set_summary("turn1LatencyMs", response.latency_ms);
        next.set_summary("turn1TotalTokens", response.token_usage.total_tokens);
        let synthetic = processed.thinking.as_ref().is_some_and(|t| t.synthetic);
        next.set_summary("turn1ThinkingSynthetic", synthetic);
        advance(
            services,
            deadline,
            &mut next,
            VerificationStatus::Turn1Completed,
            Stage::ExecuteTurn1,
            Some(format!("model latency {} ms", response.latency_ms)),
        )?;
        Ok(next)
    })
}

pub fn execute_turn2(services: &Services, envelope: &Envelope) -> Result<Envelope, StageFailure> {
    run_stage(services, Stage::ExecuteTurn2, &envelope.verification_id, |state, deadline| {
        let started = Instant::now();
        let target = VerificationStatus::Turn2InProgress;
        preflight(state, envelope, target.required_references())?;
        ensure_transition(envelope, target)?;

        let verification_id = &envelope.verification_id;
        let turn1_raw: TurnResponse =
            state.get_json(reference_of(envelope, LogicalName::Turn1RawResponse)?)?;
        let turn1: Turn1Processed =
            state.get_json(reference_of(envelope, LogicalName::Turn1ProcessedResponse)?)?;
        let mut tracker = ConversationTracker::resume_after_turn1(verification_id, &turn1_raw)
            .map_err(StageError::Validation)?;
        let system = state.get_text(reference_of(envelope, LogicalName::SystemPrompt)?)?;
        let prompt = state.get_text(reference_of(envelope, LogicalName::Turn2Prompt)?)?;
        let reference: EncodedImage =
            state.get_json(reference_of(envelope, LogicalName::ReferenceImageBase64)?)?;
        let checking: EncodedImage =
            state.get_json(reference_of(envelope, LogicalName::CheckingImageBase64)?)?;

        let settings = services.config.model.settings();
        let request = build_turn2_request(
            &settings,
            &system,
            &turn1_raw.prompt,
            &reference,
            &turn1.answer,
            &prompt,
            &checking,
        );
        validate_request(&request).map_err(StageError::Validation)?;
        tracker.begin_turn(2).map_err(StageError::Validation)?;
        let mut next = envelope.clone();
        advance(services, deadline, &mut next, target, Stage::ExecuteTurn2, None)?;

        let call = converse(services, &request, deadline, verification_id, 2)?;
        let split = split_answer(services, &call)?;
        let response = turn_response(
            services,
            2,
            &prompt,
            &call,
            &split,
            checking.format,
            request.messages.len(),
        );
        tracker
            .complete_turn(&response)
            .map_err(StageError::Validation)?;

        let threshold = services.config.pipeline.discrepancy_threshold;
        let parsed = parse_verdict(&split.answer);
        let verdict = settle_outcome(interpret_discrepancies(&parsed, threshold));
        let processed = Turn2Processed {
            verification_id: verification_id.clone(),
            answer: split.answer,
            parsed,
            verdict,
            discrepancy_threshold: threshold,
            thinking: split.thinking,
            processed_at: Utc::now(),
        };

        next.add_reference(
            LogicalName::Turn2RawResponse,
            state.put_json(verification_id, LogicalName::Turn2RawResponse, &response)?,
        );
        next.add_reference(
            LogicalName::Turn2ProcessedResponse,
            state.put_json(verification_id, LogicalName::Turn2ProcessedResponse, &processed)?,
        );
        next.add_reference(
            LogicalName::Turn2Conversation,
            state.put_json(verification_id, LogicalName::Turn2Conversation, &tracker)?,
        );
        let metrics = record_metrics(
            state,
            &next,
            turn_metrics(&response, started, prompt.chars().count()),
        )?;
        next.add_reference(LogicalName::ProcessingMetrics, metrics);

        let outcome = processed
            .verdict
            .outcome
            .map_or("UNKNOWN", Outcome::as_str);
        next.set_summary("turn2LatencyMs", response.latency_ms);
        next.set_summary("turn2TotalTokens", response.token_usage.total_tokens);
        next.set_summary("verificationOutcome", outcome);
        next.set_summary("discrepancyCount", processed.verdict.discrepancies.len());
        next.set_summary("heuristicVerdict", processed.verdict.heuristic);
        advance(
            services,
            deadline,
            &mut next,
            VerificationStatus::Turn2Completed,
            Stage::ExecuteTurn2,
            Some(format!(
                "{outcome} with {} discrepancies",
                processed.verdict.discrepancies.len()
            )),
        )?;
        Ok(next)
    })
}
