use super::artifacts::{ImageMetadata, ImagesMetadata, InitializationRecord};
use super::{run_stage, within_deadline, Services, Stage, StageFailure};
use crate::conversation::{Deadline, EncodedImage};
use crate::error::{RecordError, StageError};
use crate::ids::{generate_verification_id, validate_verification_id};
use crate::layout::{ImageUpload, InitRequest};
use crate::record::{StatusEntry, VerificationRecord};
use crate::state::{content_hash, Envelope, LogicalName, VerificationStatus};
use chrono::Utc;

fn encode(label: &str, upload: &ImageUpload) -> Result<(EncodedImage, ImageMetadata), StageError> {
    let image = EncodedImage::from_bytes(&upload.bytes, upload.declared_format.as_deref())
        .map_err(|reason| StageError::Validation(format!("{label} image: {reason}")))?;
    let metadata = ImageMetadata {
        format: image.format,
        byte_size: image.byte_size,
        sha256: content_hash(&upload.bytes),
    };
    Ok((image, metadata))
}

/// Create the run's record, or take over the record of an initialization
/// that failed before reaching INITIALIZED for the same machine and layout.
fn claim_record(
    services: &Services,
    deadline: &Deadline,
    record: VerificationRecord,
) -> Result<VerificationRecord, StageError> {
    within_deadline(deadline, &record.verification_id)?;
    match services.records.put_if_absent(&record) {
        Ok(()) => Ok(record),
        Err(RecordError::AlreadyExists(id)) => {
            let existing = services.records.get(&id)?;
            let unfinished = services.records.history(&id)?.is_empty();
            let same_run = existing.vending_machine_id == record.vending_machine_id
                && existing.layout_id == record.layout_id
                && existing.layout_prefix == record.layout_prefix;
            if unfinished && same_run {
                tracing::info!(verification_id = %id, "resuming interrupted initialization");
                Ok(existing)
            } else {
                Err(RecordError::AlreadyExists(id).into())
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Create a run: record, create-once processing artifacts, encoded images.
///
/// A verification id whose run reached INITIALIZED, or whose record names a
/// different machine or layout, is refused and nothing of that run is
/// modified. A retry after a failure part way through reuses the first
/// attempt's record and rewrites the same artifacts.
pub fn initialize(services: &Services, request: &InitRequest) -> Result<Envelope, StageFailure> {
    let now = Utc::now();
    let verification_id = request
        .verification_id
        .clone()
        .unwrap_or_else(|| generate_verification_id(now));
    run_stage(services, Stage::Initialize, &verification_id, |state, deadline| {
        validate_verification_id(&verification_id).map_err(StageError::Validation)?;
        request
            .layout
            .validate()
            .map_err(|problems| StageError::Validation(problems.join("; ")))?;
        let (reference, reference_meta) = encode("reference", &request.reference_image)?;
        let (checking, checking_meta) = encode("checking", &request.checking_image)?;

        let layout = &request.layout;
        let pipeline = &services.config.pipeline;
        let record = claim_record(
            services,
            deadline,
            VerificationRecord {
                verification_id: verification_id.clone(),
                vending_machine_id: layout.vending_machine_id.clone(),
                layout_id: layout.layout_id,
                layout_prefix: layout.layout_prefix.clone(),
                created_at: now,
            },
        )?;

        let mut envelope = Envelope::new(&verification_id)?;
        let initialization = InitializationRecord {
            verification_id: verification_id.clone(),
            vending_machine_id: layout.vending_machine_id.clone(),
            layout_id: layout.layout_id,
            layout_prefix: layout.layout_prefix.clone(),
            created_at: record.created_at,
            turn1_prompt_version: pipeline.turn1_prompt_version.clone(),
            turn2_prompt_version: pipeline.turn2_prompt_version.clone(),
            discrepancy_threshold: pipeline.discrepancy_threshold,
        };
        envelope.add_reference(
            LogicalName::Initialization,
            state.put_json(&verification_id, LogicalName::Initialization, &initialization)?,
        );
        envelope.add_reference(
            LogicalName::LayoutMetadata,
            state.put_json(&verification_id, LogicalName::LayoutMetadata, layout)?,
        );
        envelope.add_reference(
            LogicalName::ReferenceImageBase64,
            state.put_json(&verification_id, LogicalName::ReferenceImageBase64, &reference)?,
        );
        envelope.add_reference(
            LogicalName::CheckingImageBase64,
            state.put_json(&verification_id, LogicalName::CheckingImageBase64, &checking)?,
        );
        let images = ImagesMetadata {
            reference: reference_meta,
            checking: checking_meta,
        };
        envelope.add_reference(
            LogicalName::Metadata,
            state.put_json(&verification_id, LogicalName::Metadata, &images)?,
        );
        if let Some(history) = &request.historical_context {
            envelope.add_reference(
                LogicalName::HistoricalContext,
                state.put_json(&verification_id, LogicalName::HistoricalContext, history)?,
            );
        }

        envelope.set_summary("vendingMachineId", layout.vending_machine_id.clone());
        envelope.set_summary("layoutId", layout.layout_id);
        envelope.set_summary("referenceImageFormat", images.reference.format.as_str());
        envelope.set_summary("checkingImageFormat", images.checking.format.as_str());
        within_deadline(deadline, &verification_id)?;
        services.records.append_status(
            &verification_id,
            &StatusEntry::new(VerificationStatus::Initialized, Stage::Initialize.as_str()),
        )?;
        Ok(envelope)
    })
}
