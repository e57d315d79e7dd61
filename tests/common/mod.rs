//! Shared test infrastructure for integration tests.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const LAYOUT_CSV: &str = "plate,row,column,strain,drug,concentration\n1,A,1,WT,FLZ,0\n1,A,2,WT,FLZ,2.0\n";

fn manifest_dir() -> PathBuf {
    PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()))
}

/// A scratch directory with a plate layout, an images directory and an
/// output directory, driven through the compiled binary and the fake worker.
pub struct Harness {
    pub temp: TempDir,
    pub output: PathBuf,
    pub layout: PathBuf,
    pub images: PathBuf,
    pub calls_log: PathBuf,
}

/// Result of one binary invocation.
#[derive(Debug)]
pub struct RunResult {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl From<Output> for RunResult {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let layout = temp.path().join("plate_layout_long.csv");
        fs::write(&layout, LAYOUT_CSV).expect("write layout");
        let images = temp.path().join("images");
        fs::create_dir_all(&images).expect("create images");
        fs::write(images.join("plate1_day1.tif"), b"II*\0").expect("write image");
        Self {
            output: temp.path().join("output"),
            calls_log: temp.path().join("calls.log"),
            temp,
            layout,
            images,
        }
    }

    pub fn worker_command() -> String {
        let script = manifest_dir().join("tests/fake-worker.sh");
        format!("sh '{}'", script.display())
    }

    fn command(&self, fail_module: Option<&str>) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_astrun"));
        command
            .env("FAKE_CALLS_LOG", &self.calls_log)
            .env_remove("FAKE_FAIL_MODULE")
            .env_remove("ASTRUN_IMAGE")
            .env_remove("RUST_LOG");
        if let Some(module) = fail_module {
            command.env("FAKE_FAIL_MODULE", module);
        }
        command
    }

    /// Run `astrun run` with the process engine plus `extra` flags.
    pub fn run(&self, extra: &[&str], fail_module: Option<&str>) -> RunResult {
        let mut command = self.command(fail_module);
        command
            .arg("run")
            .arg("--output")
            .arg(&self.output)
            .arg("--plate-layout")
            .arg(&self.layout)
            .arg("--images")
            .arg(&self.images)
            .args(["--engine", "process", "--grace-secs", "0", "--poll-secs", "1"])
            .arg("--worker-command")
            .arg(Self::worker_command())
            .args(extra);
        command.output().expect("run astrun").into()
    }

    pub fn status_json(&self) -> serde_json::Value {
        let output = self
            .command(None)
            .args(["status", "--json", "--output"])
            .arg(&self.output)
            .output()
            .expect("run astrun status");
        assert!(
            output.status.success(),
            "status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("parse status json")
    }

    /// Modules launched since the last call, in order.
    pub fn take_calls(&self) -> Vec<String> {
        let calls = fs::read_to_string(&self.calls_log).unwrap_or_default();
        let _ = fs::remove_file(&self.calls_log);
        calls.lines().map(str::to_string).collect()
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.output.join(name)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}
