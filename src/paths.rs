//! Path normalization and typed paths into a run workspace.
//!
//! Every file the orchestrator reads or writes inside a workspace is named
//! here so the worker mount contract and the sentinel layout cannot drift.
use anyhow::{Context, Result};
use std::env;
use std::path::{Component, Path, PathBuf};

/// Scratch directory holding the small inputs mounted into the worker.
pub const SMALL_INPUTS_DIR: &str = "tmp_small_inputs";
/// Scratch directory workers may use for intermediate files.
pub const TMP_FILES_DIR: &str = "tmp_files";
/// File the worker's stderr is captured into.
pub const DIAGNOSTICS_FILE: &str = "worker_stderr.txt";
pub const CACHED_LAYOUT_FILE: &str = "cached_plate_layout.json";
pub const RUN_PARAMETERS_FILE: &str = "run_parameters.json";
pub const HISTORY_FILE: &str = "history.jsonl";

/// Make `input` absolute against the current directory.
pub fn resolve_path(input: &Path) -> Result<PathBuf> {
    let cwd = env::current_dir().context("resolve current directory")?;
    Ok(resolve_path_from(input, &cwd))
}

/// Make `input` absolute against `cwd` and fold `.`/`..` lexically.
///
/// The target does not need to exist, which is the case for an output
/// directory on first use.
pub fn resolve_path_from(input: &Path, cwd: &Path) -> PathBuf {
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        cwd.join(input)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Typed locations inside one workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn small_inputs_dir(&self) -> PathBuf {
        self.root.join(SMALL_INPUTS_DIR)
    }

    pub fn tmp_files_dir(&self) -> PathBuf {
        self.root.join(TMP_FILES_DIR)
    }

    /// Directories removed after a fully successful run.
    pub fn scratch_dirs(&self) -> [PathBuf; 2] {
        [self.small_inputs_dir(), self.tmp_files_dir()]
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.root.join(DIAGNOSTICS_FILE)
    }

    pub fn cached_layout_path(&self) -> PathBuf {
        self.root.join(CACHED_LAYOUT_FILE)
    }

    pub fn run_parameters_path(&self) -> PathBuf {
        self.root.join(RUN_PARAMETERS_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }
}
