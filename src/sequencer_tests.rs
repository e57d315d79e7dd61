use super::*;
use crate::stage::{
    CURATE_BAD_SPOTS, FITNESS_MEASUREMENTS, PROCESS_IMAGES, RELATIVE_FITNESS_AND_SUSCEPTIBILITY,
    SELECT_COORDINATES,
};
use crate::testing::{Behavior, ScriptedWorker};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const LAYOUT: &str = "plate,row,column,strain,drug,concentration\n1,A,1,WT,FLZ,0\n1,A,2,WT,FLZ,2.0\n";

struct Scenario {
    _temp: TempDir,
    workspace: Workspace,
    layout: PathBuf,
    images: PathBuf,
}

impl Scenario {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let layout = temp.path().join("plate_layout_long.csv");
        fs::write(&layout, LAYOUT).expect("write layout");
        let images = temp.path().join("images");
        fs::create_dir_all(&images).expect("create images");
        let workspace = Workspace::open(&temp.path().join("output")).expect("open workspace");
        Self {
            _temp: temp,
            workspace,
            layout,
            images,
        }
    }

    fn inputs(&self) -> RunInputs {
        RunInputs {
            plate_layout: Some(self.layout.clone()),
            staged: vec![StagedInput {
                source: self.layout.clone(),
                name: "plate_layout_long.csv".to_string(),
            }],
            images: Some(self.images.clone()),
            worker_code: None,
        }
    }

    fn run(&self, worker: &ScriptedWorker, params: &RunParameters) -> Result<RunReport> {
        self.run_with(worker, params, DriftPolicy::Invalidate { grace: Duration::ZERO })
    }

    fn run_with(
        &self,
        worker: &ScriptedWorker,
        params: &RunParameters,
        policy: DriftPolicy,
    ) -> Result<RunReport> {
        let inputs = self.inputs();
        Sequencer::new(
            Pipeline::AnalyzeImages,
            &self.workspace,
            params,
            &inputs,
            WorkerInvoker::new(worker),
            Checkpoint::new(Duration::from_millis(5)),
            policy,
            HostOs::Linux,
        )
        .run()
    }

    fn root(&self) -> &Path {
        self.workspace.root()
    }

    fn store(&self) -> CompletionStore {
        CompletionStore::new(self.root())
    }

    fn history_events(&self) -> Vec<HistoryEvent> {
        History::new(self.workspace.paths().history_path())
            .load()
            .expect("load history")
            .into_iter()
            .map(|entry| entry.event)
            .collect()
    }
}

fn keep_tmp() -> RunParameters {
    RunParameters {
        keep_tmp_files: true,
        ..RunParameters::default()
    }
}

fn stop_after(stage: &str) -> RunParameters {
    RunParameters {
        stop_after: Some(stage.to_string()),
        ..RunParameters::default()
    }
}

#[test]
fn fresh_run_executes_every_stage_then_cleans_up() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);

    let report = scenario
        .run(&worker, &RunParameters::default())
        .expect("run");

    assert_eq!(
        report.executed,
        [
            "process_images",
            "select_coordinates",
            "fitness_measurements",
            "curate_bad_spots",
            "relative_fitness_and_susceptibility"
        ]
    );
    assert!(report.skipped.is_empty());
    assert_eq!(
        worker.calls(),
        [
            "process_images",
            "select_coordinates",
            "fitness_measurements",
            "curate_bad_spots",
            "relative_fitness_and_susceptibility"
        ]
    );
    assert!(scenario
        .store()
        .completed(Pipeline::AnalyzeImages.stages())
        .expect("completed")
        .is_empty());
    assert!(!scenario.workspace.paths().small_inputs_dir().exists());
    assert!(!scenario.workspace.paths().tmp_files_dir().exists());
    assert!(scenario.root().join("coordinates.json").is_file());
    assert!(scenario.workspace.paths().cached_layout_path().is_file());
    assert_eq!(
        scenario.history_events().last(),
        Some(&HistoryEvent::RunFinished)
    );
}

#[test]
fn invocations_carry_mounts_env_and_interactivity() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario.run(&worker, &keep_tmp()).expect("run");

    let invocations = worker.invocations();
    let process = &invocations[0];
    assert!(!process.interactive);
    assert_eq!(process.mount(MountRole::Output), Some(scenario.root()));
    assert_eq!(process.mount(MountRole::Images), Some(scenario.images.as_path()));
    assert_eq!(
        process.mount(MountRole::SmallInputs),
        Some(scenario.workspace.paths().small_inputs_dir().as_path())
    );
    assert_eq!(process.mount(MountRole::WorkerCode), None);
    assert_eq!(process.env.get("KEEP_TMP_FILES").map(String::as_str), Some("true"));
    assert!(invocations[1].interactive);

    assert!(scenario
        .workspace
        .paths()
        .small_inputs_dir()
        .join("plate_layout_long.csv")
        .is_file());
}

#[test]
fn completed_stages_are_skipped_on_resume() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    worker.set(
        "fitness_measurements",
        Behavior::Fail {
            diagnostics: "fit diverged",
            writes_sentinel: false,
        },
    );

    let err = scenario
        .run(&worker, &RunParameters::default())
        .expect_err("fitness measurements should fail");
    let failure = err.downcast_ref::<PipelineError>().expect("pipeline error");
    assert!(matches!(failure, PipelineError::StageFailed { stage, .. } if stage == "fitness_measurements"));
    assert_eq!(failure.diagnostics(), Some("fit diverged"));

    let store = scenario.store();
    assert!(store.is_complete(&PROCESS_IMAGES).expect("query"));
    assert!(store.is_complete(&SELECT_COORDINATES).expect("query"));
    assert!(!store.is_complete(&FITNESS_MEASUREMENTS).expect("query"));
    assert!(scenario.workspace.paths().small_inputs_dir().is_dir());

    worker.set("fitness_measurements", Behavior::Succeed);
    worker.reset_calls();
    let report = scenario
        .run(&worker, &RunParameters::default())
        .expect("resume");

    assert_eq!(report.skipped, ["process_images", "select_coordinates"]);
    assert_eq!(
        worker.calls(),
        [
            "fitness_measurements",
            "curate_bad_spots",
            "relative_fitness_and_susceptibility"
        ]
    );
    assert!(!report.invalidated);
}

#[test]
fn rerun_after_completion_with_kept_sentinels_launches_nothing() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("process_images"))
        .expect("first run");
    let store = scenario.store();
    for stage in Pipeline::AnalyzeImages.stages() {
        store.mark_complete(stage).expect("mark");
    }

    worker.reset_calls();
    let report = scenario
        .run(&worker, &RunParameters::default())
        .expect("second run");
    assert!(worker.calls().is_empty());
    assert_eq!(report.skipped.len(), 5);
    assert_eq!(report.stopped_after, None);
    assert!(store
        .completed(Pipeline::AnalyzeImages.stages())
        .expect("completed")
        .is_empty());
}

#[test]
fn stop_after_last_stage_finishes_and_cleans_up() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);

    let report = scenario
        .run(&worker, &stop_after("relative_fitness_and_susceptibility"))
        .expect("run");

    assert_eq!(report.stopped_after, None);
    assert_eq!(report.executed.len(), 5);
    assert!(scenario
        .store()
        .completed(Pipeline::AnalyzeImages.stages())
        .expect("completed")
        .is_empty());
    assert!(!scenario.workspace.paths().small_inputs_dir().exists());
    let events = scenario.history_events();
    assert!(!events.contains(&HistoryEvent::StoppedAfter));
    assert_eq!(events.last(), Some(&HistoryEvent::RunFinished));
}

#[test]
fn clean_exit_without_sentinel_fails_the_stage() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    worker.set("process_images", Behavior::ExitCleanWithoutSentinel);

    let err = scenario
        .run(&worker, &RunParameters::default())
        .expect_err("missing sentinel");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingSentinel { stage, .. }) if stage == "process_images"
    ));
    assert_eq!(worker.calls(), ["process_images"]);
    assert_eq!(
        scenario.history_events().last(),
        Some(&HistoryEvent::Failed)
    );
}

#[test]
fn stop_after_ends_successfully_without_cleanup() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);

    let report = scenario
        .run(&worker, &stop_after("select_coordinates"))
        .expect("run");
    assert_eq!(report.stopped_after, Some("select_coordinates"));
    assert_eq!(worker.calls(), ["process_images", "select_coordinates"]);
    assert!(scenario
        .store()
        .is_complete(&SELECT_COORDINATES)
        .expect("query"));
    assert!(scenario.workspace.paths().small_inputs_dir().is_dir());

    worker.reset_calls();
    scenario
        .run(&worker, &RunParameters::default())
        .expect("continue");
    assert_eq!(
        worker.calls(),
        [
            "fitness_measurements",
            "curate_bad_spots",
            "relative_fitness_and_susceptibility"
        ]
    );
}

#[test]
fn stop_after_an_already_complete_stage_launches_nothing() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("fitness_measurements"))
        .expect("first run");

    worker.reset_calls();
    let report = scenario
        .run(&worker, &stop_after("process_images"))
        .expect("second run");
    assert!(worker.calls().is_empty());
    assert_eq!(report.stopped_after, Some("process_images"));
}

#[test]
fn existing_confirmation_completes_checkpoint_without_presenter() {
    let scenario = Scenario::new();
    fs::write(scenario.root().join("coordinates.json"), "{\"spots\": []}").expect("write");
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);

    scenario
        .run(&worker, &stop_after("select_coordinates"))
        .expect("run");
    assert_eq!(worker.calls(), ["process_images"]);
}

#[test]
fn presenter_failure_fails_the_checkpoint() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    worker.set(
        "curate_bad_spots",
        Behavior::Fail {
            diagnostics: "cannot open display",
            writes_sentinel: false,
        },
    );

    let err = scenario
        .run(&worker, &RunParameters::default())
        .expect_err("presenter failure");
    let failure = err.downcast_ref::<PipelineError>().expect("pipeline error");
    assert!(matches!(failure, PipelineError::StageFailed { stage, .. } if stage == "curate_bad_spots"));
    assert!(!scenario
        .store()
        .is_complete(&CURATE_BAD_SPOTS)
        .expect("query"));
    assert!(!scenario
        .store()
        .is_complete(&RELATIVE_FITNESS_AND_SUSCEPTIBILITY)
        .expect("query"));
}

#[test]
fn changed_layout_invalidates_the_workspace() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("fitness_measurements"))
        .expect("first run");

    fs::write(&scenario.layout, LAYOUT.replace("2.0", "4")).expect("edit layout");
    worker.reset_calls();
    let report = scenario
        .run(&worker, &stop_after("process_images"))
        .expect("second run");

    assert!(report.invalidated);
    assert_eq!(worker.calls(), ["process_images"]);
    assert!(!scenario.root().join("coordinates.json").exists());
    let cached = layout::load_cached(&scenario.workspace.paths().cached_layout_path())
        .expect("load cached")
        .expect("cached layout");
    assert_eq!(cached.table.rows()[2][5], "4");
    assert_eq!(
        scenario.history_events().first(),
        Some(&HistoryEvent::Invalidated)
    );
}

#[test]
fn resaved_layout_with_same_values_keeps_progress() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("process_images"))
        .expect("first run");

    // Same cells, different formatting.
    fs::write(
        &scenario.layout,
        "plate,row,column,strain,drug,concentration\n1 ,A,1,WT,FLZ,0.0\n1,A,2,WT,FLZ,2\n\n",
    )
    .expect("resave layout");
    worker.reset_calls();
    let report = scenario
        .run(&worker, &stop_after("select_coordinates"))
        .expect("second run");

    assert!(!report.invalidated);
    assert_eq!(report.skipped, ["process_images"]);
    assert_eq!(worker.calls(), ["select_coordinates"]);
}

#[test]
fn keep_policy_preserves_progress_despite_drift() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("process_images"))
        .expect("first run");

    fs::write(&scenario.layout, LAYOUT.replace("WT", "erg3")).expect("edit layout");
    worker.reset_calls();
    let report = scenario
        .run_with(&worker, &stop_after("process_images"), DriftPolicy::Keep)
        .expect("second run");
    assert!(!report.invalidated);
    assert!(worker.calls().is_empty());
}

#[test]
fn sentinels_without_baseline_count_as_drift() {
    let scenario = Scenario::new();
    let store = scenario.store();
    store.mark_complete(&PROCESS_IMAGES).expect("mark");

    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    let report = scenario
        .run(&worker, &stop_after("process_images"))
        .expect("run");
    assert!(report.invalidated);
    assert_eq!(worker.calls(), ["process_images"]);
}

#[test]
fn replace_policy_always_starts_over() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("select_coordinates"))
        .expect("first run");

    worker.reset_calls();
    let report = scenario
        .run_with(&worker, &stop_after("select_coordinates"), DriftPolicy::Replace)
        .expect("second run");
    assert!(report.invalidated);
    assert_eq!(worker.calls(), ["process_images", "select_coordinates"]);
}

#[test]
fn run_record_names_pipeline_and_fingerprint() {
    let scenario = Scenario::new();
    let worker = ScriptedWorker::confirming(Pipeline::AnalyzeImages);
    scenario
        .run(&worker, &stop_after("process_images"))
        .expect("run");

    let text = fs::read_to_string(scenario.workspace.paths().run_parameters_path())
        .expect("read run record");
    let record: serde_json::Value = serde_json::from_str(&text).expect("parse run record");
    assert_eq!(record["pipeline"], "analyze_images");
    assert_eq!(record["host_os"], "linux");
    assert_eq!(record["params"]["stop_after"], "process_images");
    assert_eq!(
        record["layout_fingerprint"].as_str().map(str::len),
        Some(64)
    );
}
