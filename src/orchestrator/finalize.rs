use super::artifacts::{ErrorArtifact, FinalResults, ProcessingMetrics, Turn2Processed};
use super::{
    advance, ensure_transition, preflight, reference_of, run_stage, within_deadline, Services,
    Stage, StageFailure,
};
use crate::error::StageError;
use crate::layout::LayoutMetadata;
use crate::parser::Outcome;
use crate::record::StatusEntry;
use crate::state::{Envelope, LogicalName, VerificationStatus};
use chrono::Utc;

/// Write `processing/final-results` from the turn-2 verdict and finish the run.
pub fn finalize(services: &Services, envelope: &Envelope) -> Result<Envelope, StageFailure> {
    run_stage(services, Stage::Finalize, &envelope.verification_id, |state, deadline| {
        let target = VerificationStatus::Finalized;
        preflight(state, envelope, target.required_references())?;
        ensure_transition(envelope, target)?;

        let turn2: Turn2Processed =
            state.get_json(reference_of(envelope, LogicalName::Turn2ProcessedResponse)?)?;
        let layout: Option<LayoutMetadata> = envelope
            .reference(LogicalName::LayoutMetadata)
            .map(|reference| state.get_json(reference))
            .transpose()?;
        let metrics: Option<ProcessingMetrics> = envelope
            .reference(LogicalName::ProcessingMetrics)
            .map(|reference| state.get_json(reference))
            .transpose()?;

        let verdict = turn2.verdict;
        let outcome = verdict.outcome.unwrap_or(if verdict.discrepancies.is_empty() {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        });
        let results = FinalResults {
            verification_id: envelope.verification_id.clone(),
            vending_machine_id: layout.as_ref().map(|l| l.vending_machine_id.clone()),
            layout_id: layout.as_ref().map(|l| l.layout_id),
            status: target,
            outcome,
            discrepancies: verdict.discrepancies,
            comparison_summary: verdict.comparison_summary,
            heuristic: verdict.heuristic,
            total_token_usage: metrics.map(|m| m.total_token_usage),
            finalized_at: Utc::now(),
        };

        let mut next = envelope.clone();
        next.add_reference(
            LogicalName::FinalResults,
            state.put_json(&envelope.verification_id, LogicalName::FinalResults, &results)?,
        );
        next.set_summary("verificationOutcome", outcome.as_str());
        advance(
            services,
            deadline,
            &mut next,
            target,
            Stage::Finalize,
            Some(format!("outcome {}", outcome.as_str())),
        )?;
        Ok(next)
    })
}

/// Record `failure` as `processing/error-info` and move the run to ERROR.
pub fn finalize_with_error(
    services: &Services,
    envelope: &Envelope,
    failure: &StageFailure,
) -> Result<Envelope, StageFailure> {
    let id = &envelope.verification_id;
    run_stage(services, Stage::FinalizeWithError, id, |state, deadline| {
        super::check_verification_id(envelope)?;
        if failure.verification_id != envelope.verification_id {
            return Err(StageError::Validation(format!(
                "failure belongs to {}, not {}",
                failure.verification_id, envelope.verification_id
            )));
        }
        ensure_transition(envelope, VerificationStatus::Error)?;

        let artifact = ErrorArtifact {
            verification_id: envelope.verification_id.clone(),
            failed_stage: failure.stage,
            status_at_failure: envelope.status,
            error: failure.error.clone(),
            recorded_at: Utc::now(),
        };
        let mut next = envelope.clone();
        next.add_reference(
            LogicalName::ErrorInfo,
            state.put_json(&envelope.verification_id, LogicalName::ErrorInfo, &artifact)?,
        );
        next.advance(VerificationStatus::Error)?;
        next.set_summary("failedStage", failure.stage.as_str());
        next.set_summary("errorType", failure.error.error_type.clone());
        within_deadline(deadline, &envelope.verification_id)?;
        services.records.append_status(
            &envelope.verification_id,
            &StatusEntry::new(VerificationStatus::Error, Stage::FinalizeWithError.as_str())
                .with_detail(format!("{} failed", failure.stage))
                .with_error(failure.error.clone()),
        )?;
        Ok(next)
    })
}
