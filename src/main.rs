use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod checkpoint;
mod cli;
mod error;
mod history;
mod layout;
mod params;
mod paths;
mod sentinel;
mod sequencer;
mod stage;
mod status;
#[cfg(test)]
mod testing;
mod util;
mod worker;
mod workflow;
mod workspace;

use cli::{Command, RootArgs};
use error::PipelineError;
use workflow::Completion;

const EXIT_STAGE_FAILED: u8 = 1;
const EXIT_ENVIRONMENT: u8 = 2;
const EXIT_STOPPED_EARLY: u8 = 3;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_logging(args.verbose);

    match dispatch(args.command) {
        Ok(Completion::Finished) => ExitCode::SUCCESS,
        Ok(Completion::StoppedEarly) => ExitCode::from(EXIT_STOPPED_EARLY),
        Err(err) => report_failure(&err),
    }
}

fn dispatch(command: Command) -> Result<Completion> {
    match command {
        Command::Run(args) => workflow::run_analysis(&args),
        Command::PlateLayout(args) => workflow::run_plate_layout(&args),
        Command::Status(args) => {
            workflow::run_status(&args)?;
            Ok(Completion::Finished)
        }
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report_failure(err: &anyhow::Error) -> ExitCode {
    let Some(failure) = err.downcast_ref::<PipelineError>() else {
        eprintln!("error: {err:#}");
        return ExitCode::from(EXIT_STAGE_FAILED);
    };
    eprintln!("error: {failure}");
    if let Some(diagnostics) = failure.diagnostics() {
        eprintln!("--- worker diagnostics ---\n{diagnostics}\n--- end of diagnostics ---");
        eprintln!("fix the problem and rerun the same command; completed stages will be skipped");
    }
    match failure {
        PipelineError::Environment { .. } => ExitCode::from(EXIT_ENVIRONMENT),
        PipelineError::StageFailed { .. } | PipelineError::MissingSentinel { .. } => {
            ExitCode::from(EXIT_STAGE_FAILED)
        }
    }
}
