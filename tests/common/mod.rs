//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use layout_verify::config::{default_config, AppConfig, BackendKind};
use layout_verify::conversation::{
    ContentBlock, ConverseReply, ConverseRequest, Deadline, ModelService, TokenUsage,
};
use layout_verify::error::ModelServiceError;
use layout_verify::layout::{
    ImageUpload, InitRequest, LayoutMetadata, MachineStructure, ProductPosition,
};
use layout_verify::orchestrator::Services;
use layout_verify::record::MemoryRecordStore;
use layout_verify::state::{MemoryBlobStore, StateStore};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BUCKET: &str = "verification-state";

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F'];

pub const TURN1_ANSWER: &str = "**INITIAL CONFIRMATION:**
Successfully identified 2 physical rows (A-Top to B-Bottom).
Successfully identified 3 slots per row (01-Left to 03-Right).

**ROW STATUS ANALYSIS (Reference Image):**
* **Row A:** Coke, Sprite, Fanta.
* **Row B:** Water, Water, empty.

**REFERENCE IMAGE SUMMARY:**
Five of six slots are stocked; B03 is empty.";

pub const TURN2_CORRECT: &str = "**VERIFICATION OUTCOME:** CORRECT

**COMPARISON SUMMARY:** Every stocked slot matches the reference layout.";

pub const TURN2_INCORRECT: &str = "**VERIFICATION OUTCOME:** INCORRECT

**DISCREPANCIES:**
- Sprite: expected in A02, found in B03
- Fanta: expected in A03, not found

**COMPARISON SUMMARY:** Two products are out of place.";

pub fn layout() -> LayoutMetadata {
    LayoutMetadata {
        layout_id: 23591,
        layout_prefix: "2025-06".into(),
        vending_machine_id: "VM-3245".into(),
        location: Some("Office Building, Floor 3".into()),
        machine_structure: MachineStructure {
            row_count: 2,
            columns_per_row: 3,
            row_order: Vec::new(),
            column_order: Vec::new(),
        },
        product_positions: [("A01", "Coke"), ("A02", "Sprite"), ("A03", "Fanta"), ("B01", "Water")]
            .into_iter()
            .map(|(slot, name)| {
                (
                    slot.to_string(),
                    ProductPosition {
                        product_name: name.to_string(),
                        product_id: None,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn init_request(verification_id: Option<&str>) -> InitRequest {
    InitRequest {
        verification_id: verification_id.map(str::to_string),
        layout: layout(),
        reference_image: ImageUpload {
            bytes: PNG.to_vec(),
            declared_format: Some("png".into()),
        },
        checking_image: ImageUpload {
            bytes: JPEG.to_vec(),
            declared_format: Some("jpeg".into()),
        },
        historical_context: None,
    }
}

pub fn text_reply(text: &str) -> ConverseReply {
    ConverseReply {
        content: vec![ContentBlock::Text { text: text.into() }],
        stop_reason: "end_turn".into(),
        usage: TokenUsage {
            input_tokens: 1200,
            output_tokens: 300,
            thinking_tokens: 0,
            total_tokens: 0,
        },
        model_id: "vision-model".into(),
    }
}

pub fn reasoning_reply(reasoning: &str, text: &str) -> ConverseReply {
    let mut reply = text_reply(text);
    reply.content.insert(
        0,
        ContentBlock::Reasoning {
            text: reasoning.into(),
        },
    );
    reply.usage.thinking_tokens = 200;
    reply
}

/// Model fake that hands out scripted results in order.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ConverseReply, ModelServiceError>>>,
    requests: Mutex<Vec<ConverseRequest>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ConverseReply, ModelServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn answering(answers: &[&str]) -> Arc<Self> {
        Self::new(answers.iter().map(|answer| Ok(text_reply(answer))).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConverseRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ModelService for ScriptedModel {
    fn converse(
        &self,
        request: &ConverseRequest,
        _deadline: &Deadline,
    ) -> Result<ConverseReply, ModelServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(ModelServiceError::Transport("script exhausted".into())))
    }
}

pub struct MemoryHarness {
    pub services: Services,
    pub blobs: Arc<MemoryBlobStore>,
    pub records: Arc<MemoryRecordStore>,
    pub model: Arc<ScriptedModel>,
}

pub fn memory_harness(model: Arc<ScriptedModel>) -> MemoryHarness {
    memory_harness_with(default_config(), model)
}

pub fn memory_harness_with(config: AppConfig, model: Arc<ScriptedModel>) -> MemoryHarness {
    let blobs = Arc::new(MemoryBlobStore::new(BUCKET));
    let records = Arc::new(MemoryRecordStore::new());
    let services = Services::new(
        config,
        StateStore::new(blobs.clone()),
        records.clone(),
        model.clone(),
    );
    MemoryHarness {
        services,
        blobs,
        records,
        model,
    }
}

/// Config for the `lvf` binary: filesystem store under `root`, command backend.
pub fn command_config(root: &Path, command: &str) -> AppConfig {
    let mut config = default_config();
    config.store.root = Some(root.join("store"));
    config.model.backend = BackendKind::Command;
    config.model.command = Some(command.to_string());
    config.model.call_timeout_ms = 20_000;
    config.model.connect_timeout_ms = 1_000;
    config.pipeline.stage_timeout_ms = 30_000;
    config
}
