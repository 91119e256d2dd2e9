//! CLI argument parsing for the stage-per-invocation pipeline.
//!
//! Every stage command reads an envelope (from a path or stdin) and writes
//! the advanced envelope as JSON. The sequencer that calls these commands in
//! order lives outside this binary.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "lvf",
    version,
    about = "Stage-checkpointed vending machine layout verification",
    after_help = "Commands:\n  init --layout <json> --reference-image <img> --checking-image <img>\n  prepare-turn1 [envelope]     Render system and turn-1 prompts\n  turn1 [envelope]             Analyze the reference image\n  prepare-turn2 [envelope]     Render the turn-2 prompt\n  turn2 [envelope]             Compare the checking image\n  finalize [envelope]          Write final results\n  fail --failure <json> [envelope]  Record a stage failure\n  validate [envelope]          Check references without running a stage\n  parse <response>             Extract a verdict from a turn-2 answer\n  classify --message <text>    Classify an error message\n  status <verification-id>     Show the record and status history\n  config                       Print the effective configuration\n\nExamples:\n  lvf init --layout layout.json --reference-image ref.png --checking-image chk.jpg > env.json\n  lvf prepare-turn1 env.json | lvf turn1 | lvf prepare-turn2 | lvf turn2 | lvf finalize\n  lvf status verif-20250611143005-ab12",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Config file (defaults to $LVF_CONFIG, then the data dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    #[command(name = "prepare-turn1", about = "Render the system and turn-1 prompts")]
    PrepareTurn1(StageArgs),
    #[command(name = "turn1", about = "Run turn 1 against the reference image")]
    Turn1(StageArgs),
    #[command(name = "prepare-turn2", about = "Render the turn-2 prompt")]
    PrepareTurn2(StageArgs),
    #[command(name = "turn2", about = "Run turn 2 against the checking image")]
    Turn2(StageArgs),
    #[command(about = "Write final results and finish the run")]
    Finalize(StageArgs),
    Fail(FailArgs),
    Validate(ValidateArgs),
    Parse(ParseArgs),
    Classify(ClassifyArgs),
    Status(StatusArgs),
    Config(ConfigArgs),
}

/// Where the envelope comes from and where the result goes.
#[derive(Args, Debug)]
pub struct StageArgs {
    /// Envelope JSON; `-` or omitted reads stdin
    #[arg(value_name = "ENVELOPE")]
    pub envelope: Option<PathBuf>,

    /// Write the resulting envelope here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Start a verification run from a layout and two images")]
pub struct InitArgs {
    /// Layout metadata JSON
    #[arg(long, value_name = "PATH")]
    pub layout: PathBuf,

    /// Reference (planogram) image, PNG or JPEG
    #[arg(long, value_name = "PATH")]
    pub reference_image: PathBuf,

    /// Checking (current state) image, PNG or JPEG
    #[arg(long, value_name = "PATH")]
    pub checking_image: PathBuf,

    /// Reuse an existing id instead of generating one
    #[arg(long, value_name = "ID")]
    pub verification_id: Option<String>,

    /// Prior verification JSON handed to the turn-2 prompt
    #[arg(long, value_name = "PATH")]
    pub historical_context: Option<PathBuf>,

    /// Write the envelope here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Record a StageFailure and move the run to ERROR")]
pub struct FailArgs {
    /// StageFailure JSON as printed by a failed stage
    #[arg(long, value_name = "PATH")]
    pub failure: PathBuf,

    #[command(flatten)]
    pub stage: StageArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Check an envelope's references and re-read them from the store")]
pub struct ValidateArgs {
    /// Envelope JSON; `-` or omitted reads stdin
    #[arg(value_name = "ENVELOPE")]
    pub envelope: Option<PathBuf>,

    /// Check the references required to enter this status instead of every
    /// reference present
    #[arg(long, value_name = "STATUS")]
    pub status: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Extract a verdict from a turn-2 answer")]
pub struct ParseArgs {
    /// Answer text; `-` or omitted reads stdin
    #[arg(value_name = "RESPONSE")]
    pub response: Option<PathBuf>,

    /// Discrepancy count that forces INCORRECT (defaults to the config)
    #[arg(long, value_name = "N")]
    pub threshold: Option<u32>,

    /// Parse a turn-1 answer into its reference analysis instead
    #[arg(long)]
    pub reference: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Classify an error message into a retry policy")]
pub struct ClassifyArgs {
    /// Error text to classify
    #[arg(long)]
    pub message: String,

    /// Taxonomy name to report
    #[arg(long, default_value = "ModelServiceError")]
    pub error_type: String,

    /// Component reported in the context
    #[arg(long, default_value = "cli")]
    pub component: String,

    /// Operation reported in the context
    #[arg(long, default_value = "classify")]
    pub operation: String,

    /// Also compute the delay before this retry attempt
    #[arg(long, value_name = "N")]
    pub attempt: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(about = "Show a run's record and status history")]
pub struct StatusArgs {
    pub verification_id: String,
}

#[derive(Parser, Debug)]
#[command(about = "Print the effective configuration or write a stub")]
pub struct ConfigArgs {
    /// Write a default config here instead of printing
    #[arg(long, value_name = "PATH")]
    pub init: Option<PathBuf>,

    /// Overwrite an existing file when writing
    #[arg(long, requires = "init")]
    pub force: bool,
}
