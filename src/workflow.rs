//! Command wiring: resolve inputs, preflight the environment, run a pipeline.
//!
//! Every check that can fail before a stage starts reports as an environment
//! error so nothing is launched against a broken setup.
use crate::checkpoint::Checkpoint;
use crate::cli::{Engine, PlateLayoutArgs, RunArgs, StatusArgs, WorkerArgs, WorkspaceArgs};
use crate::error::PipelineError;
use crate::layout;
use crate::params::{HostOs, RunParameters};
use crate::paths::resolve_path;
use crate::sequencer::{DriftPolicy, RunInputs, RunReport, Sequencer, StagedInput};
use crate::stage::Pipeline;
use crate::status;
use crate::worker::{ContainerWorker, ProcessWorker, Worker, WorkerInvoker};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of a pipeline command that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Finished,
    StoppedEarly,
}

pub fn run_analysis(args: &RunArgs) -> Result<Completion> {
    let pipeline = Pipeline::AnalyzeImages;
    let host_os = args.worker.host_os.unwrap_or_else(HostOs::detect);

    let plate_layout = existing_file(&args.plate_layout, "plate layout")?;
    let images = existing_dir(&args.images, "images directory")?;
    layout::load_table(&plate_layout).map_err(|err| {
        PipelineError::environment(format!(
            "plate layout {} is unreadable: {err:#}",
            plate_layout.display()
        ))
    })?;
    if let Some(stage) = &args.stop_after {
        if pipeline.stage(stage).is_none() {
            return Err(PipelineError::environment(format!(
                "unknown stage '{stage}' for --stop-after (expected one of: {})",
                pipeline.stage_names()
            ))
            .into());
        }
    }

    let params = RunParameters {
        pseudocount_log2_concentration: args.pseudocount_log2_concentration,
        min_nauc_to_be_considered_growing: args.min_nauc_to_be_considered_growing,
        min_points_to_calculate_resistance_auc: args.min_points_to_calculate_resistance_auc,
        keep_tmp_files: args.workspace.keep_tmp_files,
        skip_contrast_correction: args.skip_contrast_correction,
        stop_after: args.stop_after.clone(),
    };
    let inputs = RunInputs {
        staged: vec![staged_as(&plate_layout, "plate_layout_long")],
        plate_layout: Some(plate_layout),
        images: Some(images),
        worker_code: worker_code_dir(&args.worker)?,
    };
    let checkpoint = Checkpoint::new(Duration::from_secs(args.poll_secs.max(1)));
    execute(
        pipeline,
        &args.workspace,
        &params,
        &inputs,
        &args.worker,
        host_os,
        checkpoint,
    )
}

pub fn run_plate_layout(args: &PlateLayoutArgs) -> Result<Completion> {
    let pipeline = Pipeline::PlateLayout;
    let host_os = args.worker.host_os.unwrap_or_else(HostOs::detect);

    let strains = existing_file(&args.strains, "strains table")?;
    let drugs = existing_file(&args.drugs, "drugs table")?;
    for table in [&strains, &drugs] {
        layout::load_table(table).map_err(|err| {
            PipelineError::environment(format!("{} is unreadable: {err:#}", table.display()))
        })?;
    }

    let params = RunParameters {
        keep_tmp_files: args.workspace.keep_tmp_files,
        ..RunParameters::default()
    };
    let inputs = RunInputs {
        plate_layout: None,
        staged: vec![staged_as(&strains, "strains"), staged_as(&drugs, "drugs")],
        images: None,
        worker_code: worker_code_dir(&args.worker)?,
    };
    execute(
        pipeline,
        &args.workspace,
        &params,
        &inputs,
        &args.worker,
        host_os,
        Checkpoint::new(crate::checkpoint::DEFAULT_POLL_INTERVAL),
    )
}

pub fn run_status(args: &StatusArgs) -> Result<()> {
    let root = resolve_path(&args.output)?;
    if !root.is_dir() {
        return Err(PipelineError::environment(format!(
            "output directory {} does not exist",
            root.display()
        ))
        .into());
    }
    let workspace = Workspace::open(&root)?;
    let report = status::build_status(&workspace, args.pipeline)?;
    if args.json {
        println!("{}", status::render_json(&report)?);
    } else {
        print!("{}", status::render_text(&report));
    }
    Ok(())
}

fn execute(
    pipeline: Pipeline,
    workspace_args: &WorkspaceArgs,
    params: &RunParameters,
    inputs: &RunInputs,
    worker_args: &WorkerArgs,
    host_os: HostOs,
    checkpoint: Checkpoint,
) -> Result<Completion> {
    let worker = build_worker(worker_args, host_os)?;
    worker.probe()?;

    let root = resolve_path(&workspace_args.output)?;
    let workspace = Workspace::open(&root)?;
    let drift_policy = if workspace_args.replace {
        DriftPolicy::Replace
    } else if workspace_args.no_invalidate {
        DriftPolicy::Keep
    } else {
        DriftPolicy::Invalidate {
            grace: Duration::from_secs(workspace_args.grace_secs),
        }
    };
    tracing::info!(
        pipeline = pipeline.name(),
        workspace = %workspace.root().display(),
        ?host_os,
        "starting pipeline"
    );

    let report = Sequencer::new(
        pipeline,
        &workspace,
        params,
        inputs,
        WorkerInvoker::new(worker.as_ref()),
        checkpoint,
        drift_policy,
        host_os,
    )
    .run()?;
    print_summary(pipeline, &workspace, &report);

    Ok(match report.stopped_after {
        Some(_) => Completion::StoppedEarly,
        None => Completion::Finished,
    })
}

fn build_worker(args: &WorkerArgs, host_os: HostOs) -> Result<Box<dyn Worker>> {
    match args.engine {
        Engine::Container => {
            let image = args.image.as_deref().ok_or_else(|| {
                PipelineError::environment("no container image given (use --image or ASTRUN_IMAGE)")
            })?;
            Ok(Box::new(ContainerWorker::new(
                image,
                args.entry_command.as_deref(),
                host_os,
            )?))
        }
        Engine::Process => {
            let command = args.worker_command.as_deref().ok_or_else(|| {
                PipelineError::environment(
                    "no worker command given (use --worker-command or ASTRUN_WORKER_COMMAND)",
                )
            })?;
            let worker = ProcessWorker::from_command_line(command)
                .map_err(|err| PipelineError::environment(format!("{err:#}")))?;
            Ok(Box::new(worker))
        }
    }
}

fn print_summary(pipeline: Pipeline, workspace: &Workspace, report: &RunReport) {
    if report.invalidated {
        println!("previous results were discarded");
    }
    println!(
        "{}: {} stage(s) run, {} already complete",
        pipeline.name(),
        report.executed.len(),
        report.skipped.len()
    );
    match report.stopped_after {
        Some(stage) => println!(
            "stopped after {stage} as requested; rerun without --stop-after to continue"
        ),
        None => println!("results in {}", workspace.root().display()),
    }
}

/// Stage `source` as `<stem>.<source extension>`.
fn staged_as(source: &Path, stem: &str) -> StagedInput {
    let name = match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}.{}", ext.to_ascii_lowercase()),
        None => stem.to_string(),
    };
    StagedInput {
        source: source.to_path_buf(),
        name,
    }
}

fn worker_code_dir(args: &WorkerArgs) -> Result<Option<PathBuf>> {
    args.worker_code
        .as_deref()
        .map(|dir| existing_dir(dir, "worker code directory"))
        .transpose()
}

fn existing_file(path: &Path, what: &str) -> Result<PathBuf> {
    let resolved = resolve_path(path).with_context(|| format!("resolve {what}"))?;
    if !resolved.is_file() {
        return Err(PipelineError::environment(format!(
            "{what} {} does not exist",
            resolved.display()
        ))
        .into());
    }
    Ok(resolved)
}

fn existing_dir(path: &Path, what: &str) -> Result<PathBuf> {
    let resolved = resolve_path(path).with_context(|| format!("resolve {what}"))?;
    if !resolved.is_dir() {
        return Err(PipelineError::environment(format!(
            "{what} {} is not a directory",
            resolved.display()
        ))
        .into());
    }
    Ok(resolved)
}
