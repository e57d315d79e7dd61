//! CLI argument parsing for the stage runner.
use crate::checkpoint::DEFAULT_POLL_INTERVAL;
use crate::params::{
    HostOs, DEFAULT_MIN_NAUC_GROWING, DEFAULT_MIN_POINTS_RESISTANCE_AUC,
    DEFAULT_PSEUDOCOUNT_LOG2_CONCENTRATION,
};
use crate::sequencer::DEFAULT_GRACE_PERIOD;
use crate::stage::Pipeline;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "astrun",
    version,
    about = "Resumable stage runner for containerized plate-image susceptibility analysis",
    after_help = "Commands:\n  plate-layout --output <dir> --strains <file> --drugs <file>  Build the long-format plate layout\n  run --output <dir> --plate-layout <file> --images <dir>      Run (or resume) the image analysis\n  status --output <dir>                                        Show completed and pending stages\n\nExamples:\n  astrun plate-layout --output ./layout --strains strains.xlsx --drugs drugs.xlsx\n  astrun run --output ./results --plate-layout ./layout/plate_layout_long.xlsx --images ./images\n  astrun run --output ./results --plate-layout plate_layout_long.xlsx --images ./images --stop-after select_coordinates\n  astrun status --output ./results --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    PlateLayout(PlateLayoutArgs),
    Status(StatusArgs),
}

/// How worker modules are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    /// `docker run` against the analysis image
    Container,
    /// A local command line, for development and tests
    Process,
}

/// Worker engine settings shared by the pipeline commands.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Engine used to launch worker modules
    #[arg(long, value_enum, default_value_t = Engine::Container)]
    pub engine: Engine,

    /// Container image holding the analysis modules
    #[arg(long, value_name = "IMAGE", env = "ASTRUN_IMAGE")]
    pub image: Option<String>,

    /// Command line run inside the container instead of the default entry point
    #[arg(long, value_name = "CMD")]
    pub entry_command: Option<String>,

    /// Local worker command line (process engine)
    #[arg(long, value_name = "CMD", env = "ASTRUN_WORKER_COMMAND")]
    pub worker_command: Option<String>,

    /// Host directory mounted over the worker's own scripts
    #[arg(long, value_name = "DIR")]
    pub worker_code: Option<PathBuf>,

    /// Host operating system (auto-detected when omitted)
    #[arg(long = "os", value_enum)]
    pub host_os: Option<HostOs>,
}

/// Flags shared by both pipelines for workspace handling.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Output directory holding results and resume state
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Discard any previous results in the output directory first
    #[arg(long, conflicts_with = "no_invalidate")]
    pub replace: bool,

    /// Keep previous results even if the plate layout changed
    #[arg(long)]
    pub no_invalidate: bool,

    /// Seconds to wait before wiping results after a layout change
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    pub grace_secs: u64,

    /// Keep tmp_small_inputs and tmp_files after a successful run
    #[arg(long)]
    pub keep_tmp_files: bool,
}

/// Run (or resume) the image analysis pipeline.
#[derive(Parser, Debug)]
#[command(about = "Run or resume the image analysis pipeline")]
pub struct RunArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Long-format plate layout (.xlsx, .xls, .ods, .csv or .tsv)
    #[arg(long, value_name = "FILE")]
    pub plate_layout: PathBuf,

    /// Directory of raw plate images
    #[arg(long, value_name = "DIR")]
    pub images: PathBuf,

    /// Pseudocount added to concentrations before taking log2
    #[arg(long, value_name = "X", default_value_t = DEFAULT_PSEUDOCOUNT_LOG2_CONCENTRATION)]
    pub pseudocount_log2_concentration: f64,

    /// Minimum nAUC for a spot to count as growing
    #[arg(long = "min-nauc-growing", value_name = "X", default_value_t = DEFAULT_MIN_NAUC_GROWING)]
    pub min_nauc_to_be_considered_growing: f64,

    /// Minimum number of concentrations to compute a resistance AUC
    #[arg(long = "min-points-rauc", value_name = "N", default_value_t = DEFAULT_MIN_POINTS_RESISTANCE_AUC)]
    pub min_points_to_calculate_resistance_auc: u32,

    /// Skip contrast correction during image processing
    #[arg(long)]
    pub skip_contrast_correction: bool,

    /// Stop successfully once this stage has completed
    #[arg(long, value_name = "STAGE")]
    pub stop_after: Option<String>,

    /// Seconds between checks for a checkpoint confirmation
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_secs: u64,

    #[command(flatten)]
    pub worker: WorkerArgs,
}

/// Build the long-format plate layout from strains and drugs tables.
#[derive(Parser, Debug)]
#[command(about = "Build the long-format plate layout")]
pub struct PlateLayoutArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Strains table (.xlsx, .xls, .ods, .csv or .tsv)
    #[arg(long, value_name = "FILE")]
    pub strains: PathBuf,

    /// Drugs table (.xlsx, .xls, .ods, .csv or .tsv)
    #[arg(long, value_name = "FILE")]
    pub drugs: PathBuf,

    #[command(flatten)]
    pub worker: WorkerArgs,
}

/// Status command inputs for one output directory.
#[derive(Parser, Debug)]
#[command(about = "Summarize completed and pending stages")]
pub struct StatusArgs {
    /// Output directory of a previous run
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Pipeline whose stage list is reported
    #[arg(long, value_enum, default_value_t = Pipeline::AnalyzeImages)]
    pub pipeline: Pipeline,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}
