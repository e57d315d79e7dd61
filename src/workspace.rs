//! Workspace lifecycle: creation, input staging, scratch cleanup and wipe.
//!
//! Durable files are only ever replaced by rename, so an interrupted run can
//! leave a stray temporary file but never a half-written artifact under its
//! final name.
use crate::paths::WorkspacePaths;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// An output directory owned by one pipeline run.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: WorkspacePaths,
}

impl Workspace {
    /// Create the workspace root if needed and resolve it.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve workspace root {}", root.display()))?;
        Ok(Self {
            paths: WorkspacePaths::new(root),
        })
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// Whether the workspace holds anything from a previous run.
    pub fn has_content(&self) -> Result<bool> {
        let mut entries = fs::read_dir(self.root())
            .with_context(|| format!("read {}", self.root().display()))?;
        Ok(entries.next().is_some())
    }

    /// Recreate the scratch skeleton; the small-inputs directory always starts
    /// empty so stale inputs from an earlier run are never mounted.
    pub fn prepare(&self) -> Result<()> {
        let small_inputs = self.paths.small_inputs_dir();
        remove_dir_if_exists(&small_inputs)?;
        fs::create_dir_all(&small_inputs)
            .with_context(|| format!("create {}", small_inputs.display()))?;
        let tmp_files = self.paths.tmp_files_dir();
        fs::create_dir_all(&tmp_files)
            .with_context(|| format!("create {}", tmp_files.display()))?;
        Ok(())
    }

    /// Copy an input artifact into the small-inputs directory under `name`.
    pub fn stage_input(&self, source: &Path, name: &str) -> Result<PathBuf> {
        let dest = self.paths.small_inputs_dir().join(name);
        copy_atomic(source, &dest)?;
        tracing::debug!(source = %source.display(), dest = %dest.display(), "staged input");
        Ok(dest)
    }

    /// Remove transient scratch directories; absent directories are fine.
    pub fn remove_scratch(&self) -> Result<()> {
        for dir in self.paths.scratch_dirs() {
            remove_dir_if_exists(&dir)?;
        }
        Ok(())
    }

    /// Discard everything in the workspace and start from an empty root.
    pub fn wipe(&self) -> Result<()> {
        let root = self.root();
        for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            } else {
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            }
        }
        tracing::info!(workspace = %root.display(), "workspace wiped");
        Ok(())
    }
}

/// Write `bytes` to a temporary sibling of `dest`, then rename it into place.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(dest)?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temporary file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write {}", dest.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", dest.display()))?;
    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

/// Copy `source` next to `dest` under a temporary name, then rename it.
pub fn copy_atomic(source: &Path, dest: &Path) -> Result<()> {
    let parent = parent_dir(dest)?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let mut reader =
        fs::File::open(source).with_context(|| format!("open {}", source.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temporary file in {}", parent.display()))?;
    io::copy(&mut reader, &mut tmp)
        .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", dest.display()))?;
    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))
}
