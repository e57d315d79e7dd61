//! Docker-backed worker engine.
use super::{MountRole, Worker, WorkerExit, WorkerInvocation};
use crate::error::PipelineError;
use crate::params::HostOs;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Command run inside the image; its stderr is redirected into the output mount.
pub const DEFAULT_ENTRY_COMMAND: &str = "source /opt/conda/etc/profile.d/conda.sh && conda activate main_env > /dev/null 2>&1 && /workdir_app/scripts/run_app.py";

/// Runs each module in a throwaway container of one image.
#[derive(Debug, Clone)]
pub struct ContainerWorker {
    docker: PathBuf,
    image: String,
    entry_command: String,
    host_os: HostOs,
}

impl ContainerWorker {
    /// Locate `docker` on PATH; its absence is an environment error.
    pub fn new(image: &str, entry_command: Option<&str>, host_os: HostOs) -> Result<Self> {
        let docker = which::which("docker").map_err(|err| {
            PipelineError::environment(format!("docker executable not found on PATH ({err})"))
        })?;
        Ok(Self::with_docker(docker, image, entry_command, host_os))
    }

    pub fn with_docker(
        docker: PathBuf,
        image: &str,
        entry_command: Option<&str>,
        host_os: HostOs,
    ) -> Self {
        Self {
            docker,
            image: image.to_string(),
            entry_command: entry_command.unwrap_or(DEFAULT_ENTRY_COMMAND).to_string(),
            host_os,
        }
    }

    /// Assemble the `docker run` command for one invocation.
    pub fn build_command(&self, invocation: &WorkerInvocation) -> Result<Command> {
        let diagnostics_name = invocation
            .diagnostics_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("diagnostics path has no file name"))?;

        let mut command = Command::new(&self.docker);
        command.args(["run", "--rm"]);
        command.arg("-e").arg(format!("MODULE={}", invocation.module));
        for (key, value) in &invocation.env {
            command.arg("-e").arg(format!("{key}={value}"));
        }
        let mut mounts = invocation.mounts.clone();
        mounts.sort_by_key(|mount| mount.role);
        for mount in &mounts {
            command.arg("-v").arg(volume_spec(&mount.host, mount.role)?);
        }
        if invocation.interactive {
            self.add_display(&mut command);
        }
        command.arg(&self.image);
        command.args(["bash", "-c"]);
        command.arg(format!(
            "{} 2>{}/{}",
            self.entry_command,
            MountRole::Output.container_path(),
            diagnostics_name
        ));
        Ok(command)
    }

    fn add_display(&self, command: &mut Command) {
        match self.host_os {
            HostOs::Linux => {
                command.args(["-e", "DISPLAY", "-v", "/tmp/.X11-unix:/tmp/.X11-unix"]);
            }
            HostOs::Mac => {
                command.args(["-e", "DISPLAY=host.docker.internal:0"]);
            }
            HostOs::Windows => {
                command.args(["-e", "DISPLAY=host.docker.internal:0.0"]);
            }
        }
    }

    /// Allow local containers onto the X server; failures only degrade the GUI.
    fn grant_display_access(&self) {
        if self.host_os != HostOs::Linux {
            return;
        }
        let granted = Command::new("xhost")
            .arg("+local:docker")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !granted {
            tracing::warn!("xhost +local:docker failed; the worker GUI may not open");
        }
    }
}

impl Worker for ContainerWorker {
    fn probe(&self) -> Result<()> {
        tracing::info!(image = %self.image, "probing worker image");
        let output = Command::new(&self.docker)
            .args(["run", "--rm", self.image.as_str(), "bash", "-c", "sleep 1"])
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                PipelineError::environment(format!(
                    "cannot run {} ({err}); is docker installed?",
                    self.docker.display()
                ))
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(PipelineError::environment(format!(
            "cannot start image {} (is it pulled and is docker running?): {}",
            self.image,
            stderr.trim()
        ))
        .into())
    }

    fn run(&self, invocation: &WorkerInvocation) -> Result<WorkerExit> {
        if invocation.interactive {
            self.grant_display_access();
        }
        let mut command = self.build_command(invocation)?;
        tracing::debug!(command = ?command, "docker run");
        let status = command
            .status()
            .with_context(|| format!("run {}", self.docker.display()))?;
        Ok(status.into())
    }
}

fn volume_spec(host: &Path, role: MountRole) -> Result<String> {
    let host = host
        .to_str()
        .ok_or_else(|| anyhow!("mount path {} is not valid UTF-8", host.display()))?;
    let mut spec = format!("{host}:{}", role.container_path());
    if role.read_only() {
        spec.push_str(":ro");
    }
    Ok(spec)
}
