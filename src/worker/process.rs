//! Local-process worker engine.
//!
//! Runs a host command instead of a container. Mount directories are exported
//! as `ASTRUN_MOUNT_*` variables and stderr goes straight into the
//! diagnostics file, so the completion contract is identical.
use super::{MountRole, Worker, WorkerExit, WorkerInvocation};
use crate::error::PipelineError;
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::process::{Command, Stdio};

#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: String,
    args: Vec<String>,
}

impl ProcessWorker {
    /// Parse a shell-style command line such as `python3 worker.py --fast`.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut words = shell_words::split(command_line)
            .with_context(|| format!("parse worker command: {command_line}"))?;
        if words.is_empty() {
            return Err(anyhow!("worker command is empty"));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    fn build_command(&self, invocation: &WorkerInvocation) -> Result<Command> {
        let stderr = File::create(&invocation.diagnostics_path).with_context(|| {
            format!("create {}", invocation.diagnostics_path.display())
        })?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("MODULE", &invocation.module)
            .envs(&invocation.env)
            .stdin(Stdio::inherit())
            .stderr(Stdio::from(stderr));
        for mount in &invocation.mounts {
            command.env(mount.role.env_name(), &mount.host);
        }
        if let Some(output) = invocation.mount(MountRole::Output) {
            command.current_dir(output);
        }
        Ok(command)
    }
}

impl Worker for ProcessWorker {
    fn probe(&self) -> Result<()> {
        which::which(&self.program).map_err(|err| {
            PipelineError::environment(format!(
                "worker program {} is not runnable ({err})",
                self.program
            ))
        })?;
        Ok(())
    }

    fn run(&self, invocation: &WorkerInvocation) -> Result<WorkerExit> {
        let status = self
            .build_command(invocation)?
            .status()
            .with_context(|| format!("run worker program {}", self.program))?;
        Ok(status.into())
    }
}
