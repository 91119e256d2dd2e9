//! Prompt preparation stages.
use super::artifacts::Turn1Processed;
use super::{advance, ensure_transition, preflight, reference_of, run_stage, Services, Stage, StageFailure};
use crate::error::StageError;
use crate::layout::LayoutMetadata;
use crate::state::{Envelope, LogicalName, StateStore, VerificationStatus};
use crate::templates::{RenderedPrompt, SYSTEM_TEMPLATE, TURN1_TEMPLATE, TURN2_TEMPLATE};
use serde_json::Value;

const NO_HISTORY: &str = "None provided.";
const SUMMARY_FALLBACK_CHARS: usize = 1500;

/// Values every template may use, derived from the layout.
fn layout_values(layout: &LayoutMetadata) -> Vec<(&'static str, String)> {
    let structure = &layout.machine_structure;
    let rows = structure.rows();
    let columns = structure.columns();
    vec![
        ("vending_machine_id", layout.vending_machine_id.clone()),
        ("layout_id", layout.layout_id.to_string()),
        (
            "location",
            layout.location.clone().unwrap_or_else(|| "unknown".to_string()),
        ),
        ("row_count", structure.row_count.to_string()),
        ("columns_per_row", structure.columns_per_row.to_string()),
        ("row_labels", rows.join(", ")),
        ("column_labels", columns.join(", ")),
        ("top_row", rows.first().cloned().unwrap_or_default()),
        ("bottom_row", rows.last().cloned().unwrap_or_default()),
        ("last_column", columns.last().cloned().unwrap_or_default()),
        ("planogram", layout.planogram_lines().join("\n")),
    ]
}

fn record_prompt(envelope: &mut Envelope, key: &str, prompt: &RenderedPrompt, version: &str) {
    envelope.set_summary(
        key,
        serde_json::json!({
            "template": prompt.template,
            "version": version,
            "charCount": prompt.char_count,
            "tokenEstimate": prompt.token_estimate,
        }),
    );
}

fn load_layout(state: &StateStore, envelope: &Envelope) -> Result<LayoutMetadata, StageError> {
    let reference = reference_of(envelope, LogicalName::LayoutMetadata)?;
    Ok(state.get_json(reference)?)
}

/// Render the system and turn-1 prompts and move to TURN1_PROMPT_READY.
pub fn prepare_turn1(services: &Services, envelope: &Envelope) -> Result<Envelope, StageFailure> {
    run_stage(services, Stage::PrepareTurn1, &envelope.verification_id, |state, deadline| {
        let target = VerificationStatus::Turn1PromptReady;
        preflight(state, envelope, target.required_references())?;
        ensure_transition(envelope, target)?;

        let layout = load_layout(state, envelope)?;
        let values = layout_values(&layout);
        let system = services.templates.render(SYSTEM_TEMPLATE, &values)?;
        let turn1 = services.templates.render(TURN1_TEMPLATE, &values)?;

        let verification_id = &envelope.verification_id;
        let mut next = envelope.clone();
        next.add_reference(
            LogicalName::SystemPrompt,
            state.put_text(verification_id, LogicalName::SystemPrompt, &system.text)?,
        );
        next.add_reference(
            LogicalName::Turn1Prompt,
            state.put_text(verification_id, LogicalName::Turn1Prompt, &turn1.text)?,
        );
        let version = &services.config.pipeline.turn1_prompt_version;
        record_prompt(&mut next, "systemPrompt", &system, version);
        record_prompt(&mut next, "turn1Prompt", &turn1, version);
        advance(
            services,
            deadline,
            &mut next,
            target,
            Stage::PrepareTurn1,
            Some(format!(
                "system {} chars, turn1 {} chars",
                system.char_count, turn1.char_count
            )),
        )?;
        Ok(next)
    })
}

fn historical_context(state: &StateStore, envelope: &Envelope) -> Result<String, StageError> {
    let Some(reference) = envelope.reference(LogicalName::HistoricalContext) else {
        return Ok(NO_HISTORY.to_string());
    };
    let value: Value = state.get_json(reference)?;
    if value.is_null() {
        return Ok(NO_HISTORY.to_string());
    }
    Ok(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
}

/// Render the turn-2 prompt once turn 1's outputs re-read cleanly.
pub fn prepare_turn2(services: &Services, envelope: &Envelope) -> Result<Envelope, StageFailure> {
    run_stage(services, Stage::PrepareTurn2, &envelope.verification_id, |state, deadline| {
        let target = VerificationStatus::Turn2PromptReady;
        preflight(state, envelope, target.required_references())?;
        ensure_transition(envelope, target)?;

        let layout = load_layout(state, envelope)?;
        let turn1: Turn1Processed =
            state.get_json(reference_of(envelope, LogicalName::Turn1ProcessedResponse)?)?;
        let reference_summary = if turn1.analysis.reference_summary.is_empty() {
            turn1.answer.chars().take(SUMMARY_FALLBACK_CHARS).collect()
        } else {
            turn1.analysis.reference_summary.clone()
        };
        let mut values = layout_values(&layout);
        values.push(("reference_summary", reference_summary));
        values.push(("historical_context", historical_context(state, envelope)?));
        let turn2 = services.templates.render(TURN2_TEMPLATE, &values)?;

        let mut next = envelope.clone();
        next.add_reference(
            LogicalName::Turn2Prompt,
            state.put_text(&envelope.verification_id, LogicalName::Turn2Prompt, &turn2.text)?,
        );
        record_prompt(
            &mut next,
            "turn2Prompt",
            &turn2,
            &services.config.pipeline.turn2_prompt_version,
        );
        advance(
            services,
            deadline,
            &mut next,
            target,
            Stage::PrepareTurn2,
            Some(format!("turn2 {} chars", turn2.char_count)),
        )?;
        Ok(next)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MachineStructure;
    use crate::templates::{placeholders, SYSTEM_PROMPT_MD, TURN1_PROMPT_MD, TURN2_PROMPT_MD};
    use std::collections::BTreeMap;

    fn layout() -> LayoutMetadata {
        LayoutMetadata {
            layout_id: 7,
            layout_prefix: String::new(),
            vending_machine_id: "VM-1".into(),
            location: None,
            machine_structure: MachineStructure {
                row_count: 3,
                columns_per_row: 2,
                row_order: Vec::new(),
                column_order: Vec::new(),
            },
            product_positions: BTreeMap::new(),
        }
    }

    #[test]
    fn layout_values_cover_the_layout_placeholders() {
        let values = layout_values(&layout());
        let provided: Vec<&str> = values.iter().map(|(key, _)| *key).collect();
        for source in [SYSTEM_PROMPT_MD, TURN1_PROMPT_MD] {
            for name in placeholders(source) {
                assert!(provided.contains(&name.as_str()), "{name} not provided");
            }
        }
        let turn2_only: Vec<String> = placeholders(TURN2_PROMPT_MD)
            .into_iter()
            .filter(|name| !provided.contains(&name.as_str()))
            .collect();
        assert_eq!(turn2_only, vec!["historical_context", "reference_summary"]);
    }

    #[test]
    fn row_bounds_follow_the_structure() {
        let values: BTreeMap<_, _> = layout_values(&layout()).into_iter().collect();
        assert_eq!(values["top_row"], "A");
        assert_eq!(values["bottom_row"], "C");
        assert_eq!(values["last_column"], "02");
        assert_eq!(values["location"], "unknown");
    }
}
