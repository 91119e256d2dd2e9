//! Command handlers behind the `lvf` binary.
//!
//! Handlers return the process exit code. Operational problems (unreadable
//! input, bad config) surface as `anyhow` errors; a failed stage is a normal
//! outcome that prints its `StageFailure` and exits with [`EXIT_STAGE_FAILED`].
use crate::classify::{ErrorClassifier, ErrorContext};
use crate::cli::{
    ClassifyArgs, Command, ConfigArgs, FailArgs, InitArgs, ParseArgs, RootArgs, StageArgs,
    StatusArgs, ValidateArgs,
};
use crate::config::{self, AppConfig};
use crate::layout::{ImageUpload, InitRequest, LayoutMetadata};
use crate::orchestrator::{self, Services, StageFailure};
use crate::parser::{interpret_discrepancies, parse_reference_analysis, parse_verdict};
use crate::record::{FsRecordStore, RecordStore};
use crate::state::{ArtifactKey, Envelope, FsBlobStore, StateStore, VerificationStatus};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// A stage ran and failed; stdout holds the `StageFailure` JSON.
pub const EXIT_STAGE_FAILED: u8 = 2;
/// `validate` found reference problems.
pub const EXIT_INVALID: u8 = 1;

const RETRY_BASE: Duration = Duration::from_secs(1);

type StageFn = fn(&Services, &Envelope) -> Result<Envelope, StageFailure>;

pub fn run(args: RootArgs) -> Result<ExitCode> {
    let explicit = args.config.as_deref();
    match args.command {
        Command::Init(init) => run_init(explicit, init),
        Command::PrepareTurn1(stage) => run_stage(explicit, stage, orchestrator::prepare_turn1),
        Command::Turn1(stage) => run_stage(explicit, stage, orchestrator::execute_turn1),
        Command::PrepareTurn2(stage) => run_stage(explicit, stage, orchestrator::prepare_turn2),
        Command::Turn2(stage) => run_stage(explicit, stage, orchestrator::execute_turn2),
        Command::Finalize(stage) => run_stage(explicit, stage, orchestrator::finalize),
        Command::Fail(fail) => run_fail(explicit, fail),
        Command::Validate(validate) => run_validate(explicit, validate),
        Command::Parse(parse) => run_parse(explicit, parse),
        Command::Classify(classify) => run_classify(classify),
        Command::Status(status) => run_status(explicit, status),
        Command::Config(config_args) => run_config(explicit, config_args),
    }
}

fn load_validated_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let config = config::load_config(explicit)?;
    config::validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

fn services(explicit: Option<&Path>) -> Result<Services> {
    Services::from_config(load_validated_config(explicit)?)
}

/// Read `path`, or stdin when it is absent or `-`.
fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != Path::new("-") => {
            fs::read(path).with_context(|| format!("read {}", path.display()))
        }
        _ => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("read stdin")?;
            Ok(buffer)
        }
    }
}

fn read_envelope(path: Option<&Path>) -> Result<Envelope> {
    let bytes = read_input(path)?;
    serde_json::from_slice(&bytes).context("parse envelope JSON")
}

fn write_output<T: Serialize>(out: Option<&Path>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    match out {
        Some(path) => fs::write(path, format!("{text}\n"))
            .with_context(|| format!("write {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn finish(outcome: Result<Envelope, StageFailure>, out: Option<&Path>) -> Result<ExitCode> {
    match outcome {
        Ok(envelope) => {
            write_output(out, &envelope)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            write_output(None, &failure)?;
            Ok(ExitCode::from(EXIT_STAGE_FAILED))
        }
    }
}

fn run_stage(explicit: Option<&Path>, args: StageArgs, stage: StageFn) -> Result<ExitCode> {
    let services = services(explicit)?;
    let envelope = read_envelope(args.envelope.as_deref())?;
    finish(stage(&services, &envelope), args.out.as_deref())
}

/// Declared format from the file extension, when it names one.
fn declared_format(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg").then_some(ext)
}

fn read_image(path: &Path) -> Result<ImageUpload> {
    Ok(ImageUpload {
        bytes: fs::read(path).with_context(|| format!("read image {}", path.display()))?,
        declared_format: declared_format(path),
    })
}

fn run_init(explicit: Option<&Path>, args: InitArgs) -> Result<ExitCode> {
    let services = services(explicit)?;
    let layout_bytes =
        fs::read(&args.layout).with_context(|| format!("read {}", args.layout.display()))?;
    let layout: LayoutMetadata = serde_json::from_slice(&layout_bytes)
        .with_context(|| format!("parse layout JSON {}", args.layout.display()))?;
    let historical_context = match &args.historical_context {
        Some(path) => {
            let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            Some(
                serde_json::from_slice::<Value>(&bytes)
                    .with_context(|| format!("parse historical context {}", path.display()))?,
            )
        }
        None => None,
    };
    let request = InitRequest {
        verification_id: args.verification_id,
        layout,
        reference_image: read_image(&args.reference_image)?,
        checking_image: read_image(&args.checking_image)?,
        historical_context,
    };
    finish(orchestrator::initialize(&services, &request), args.out.as_deref())
}

fn run_fail(explicit: Option<&Path>, args: FailArgs) -> Result<ExitCode> {
    let services = services(explicit)?;
    let bytes =
        fs::read(&args.failure).with_context(|| format!("read {}", args.failure.display()))?;
    let failure: StageFailure =
        serde_json::from_slice(&bytes).context("parse StageFailure JSON")?;
    let envelope = read_envelope(args.stage.envelope.as_deref())?;
    finish(
        orchestrator::finalize_with_error(&services, &envelope, &failure),
        args.stage.out.as_deref(),
    )
}

fn parse_status(raw: &str) -> Result<VerificationStatus> {
    let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
    serde_json::from_value(Value::String(normalized))
        .map_err(|_| anyhow!("unknown status {raw:?}"))
}

fn state_store(config: &AppConfig) -> Result<StateStore> {
    let root = config::store_root(config)?;
    Ok(StateStore::new(Arc::new(FsBlobStore::new(
        root,
        config.store.bucket.clone(),
    ))))
}

fn run_validate(explicit: Option<&Path>, args: ValidateArgs) -> Result<ExitCode> {
    let config = config::load_config(explicit)?;
    let envelope = read_envelope(args.envelope.as_deref())?;
    let keys: Vec<ArtifactKey> = match &args.status {
        Some(raw) => parse_status(raw)?
            .required_references()
            .iter()
            .map(|name| ArtifactKey::from(*name))
            .collect(),
        None => envelope.references.keys().copied().collect(),
    };
    let problems = orchestrator::check_references(&state_store(&config)?, &envelope, &keys)?;
    let checked: Vec<String> = keys.iter().map(ToString::to_string).collect();
    write_output(
        None,
        &json!({
            "verificationId": envelope.verification_id,
            "status": envelope.status,
            "checked": checked,
            "valid": problems.is_empty(),
            "problems": problems,
        }),
    )?;
    if problems.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_INVALID))
    }
}

fn run_parse(explicit: Option<&Path>, args: ParseArgs) -> Result<ExitCode> {
    let bytes = read_input(args.response.as_deref())?;
    let text = String::from_utf8(bytes).context("response is not UTF-8")?;
    if args.reference {
        write_output(None, &parse_reference_analysis(&text))?;
        return Ok(ExitCode::SUCCESS);
    }
    let threshold = match args.threshold {
        Some(threshold) => threshold,
        None => config::load_config(explicit)?.pipeline.discrepancy_threshold,
    };
    let parsed = parse_verdict(&text);
    let verdict = interpret_discrepancies(&parsed, threshold);
    write_output(
        None,
        &json!({
            "parsed": parsed,
            "verdict": verdict,
            "discrepancyThreshold": threshold,
        }),
    )?;
    Ok(ExitCode::SUCCESS)
}

fn run_classify(args: ClassifyArgs) -> Result<ExitCode> {
    let context = ErrorContext::new(&args.component, &args.operation);
    let info = ErrorClassifier::new().classify_message(&args.error_type, &args.message, &context);
    let mut value = serde_json::to_value(&info).context("serialize error info")?;
    if let (Some(attempt), Value::Object(map)) = (args.attempt, &mut value) {
        let delay = info
            .retry_delay(attempt, RETRY_BASE)
            .map(|delay| delay.as_millis() as u64);
        map.insert("retryDelayMs".to_string(), json!(delay));
    }
    write_output(None, &value)?;
    Ok(ExitCode::SUCCESS)
}

fn run_status(explicit: Option<&Path>, args: StatusArgs) -> Result<ExitCode> {
    let config = config::load_config(explicit)?;
    let records = FsRecordStore::new(config::store_root(&config)?);
    let record = records
        .get(&args.verification_id)
        .with_context(|| format!("load record {}", args.verification_id))?;
    let history = records
        .history(&args.verification_id)
        .with_context(|| format!("load history {}", args.verification_id))?;
    let current = history.last().map(|entry| entry.status);
    write_output(
        None,
        &json!({
            "record": record,
            "currentStatus": current,
            "history": history,
        }),
    )?;
    Ok(ExitCode::SUCCESS)
}

fn run_config(explicit: Option<&Path>, args: ConfigArgs) -> Result<ExitCode> {
    match &args.init {
        Some(path) => {
            if path.exists() && !args.force {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
            config::write_config(path, &config::default_config())?;
            eprintln!("wrote {}", path.display());
        }
        None => write_output(None, &config::load_config(explicit)?)?,
    }
    Ok(ExitCode::SUCCESS)
}
