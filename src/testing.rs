//! Scripted worker double shared by unit tests.
use crate::stage::{Pipeline, StageKind};
use crate::worker::{MountRole, Worker, WorkerExit, WorkerInvocation};
use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write `<module>_finished.txt` and exit 0.
    Succeed,
    /// Write diagnostics (and optionally the sentinel) and exit 1.
    Fail {
        diagnostics: &'static str,
        writes_sentinel: bool,
    },
    /// Exit 0 without writing anything.
    ExitCleanWithoutSentinel,
    /// Write one file into the output mount and exit 0.
    WriteArtifact {
        name: &'static str,
        contents: &'static str,
    },
    /// The engine cannot start the worker at all.
    Unlaunchable,
}

#[derive(Default)]
pub struct ScriptedWorker {
    behaviors: RefCell<BTreeMap<String, Behavior>>,
    invocations: RefCell<Vec<WorkerInvocation>>,
}

impl ScriptedWorker {
    /// Every presenter writes a well-formed confirmation; everything else succeeds.
    pub fn confirming(pipeline: Pipeline) -> Self {
        let worker = Self::default();
        for stage in pipeline.stages() {
            if let StageKind::Interactive {
                presenter: Some(module),
                confirmation,
                ..
            } = stage.kind
            {
                let contents = if confirmation.ends_with(".json") {
                    "{\"spots\": [[120, 88], [410, 92]]}"
                } else {
                    "plate_batch\tplate\trow\tcolumn\nB1\t1\tA\t3\n"
                };
                worker.set(
                    module,
                    Behavior::WriteArtifact {
                        name: confirmation,
                        contents,
                    },
                );
            }
        }
        worker
    }

    pub fn set(&self, module: &str, behavior: Behavior) {
        self.behaviors
            .borrow_mut()
            .insert(module.to_string(), behavior);
    }

    /// Modules launched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|invocation| invocation.module.clone())
            .collect()
    }

    pub fn invocations(&self) -> Vec<WorkerInvocation> {
        self.invocations.borrow().clone()
    }

    pub fn reset_calls(&self) {
        self.invocations.borrow_mut().clear();
    }
}

impl Worker for ScriptedWorker {
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn run(&self, invocation: &WorkerInvocation) -> Result<WorkerExit> {
        self.invocations.borrow_mut().push(invocation.clone());
        let behavior = self
            .behaviors
            .borrow()
            .get(&invocation.module)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        let output = invocation
            .mount(MountRole::Output)
            .ok_or_else(|| anyhow!("no output mount"))?
            .to_path_buf();
        let sentinel = output.join(format!("{}_finished.txt", invocation.module));
        let code = match behavior {
            Behavior::Succeed => {
                fs::write(&sentinel, "done\n")?;
                0
            }
            Behavior::Fail {
                diagnostics,
                writes_sentinel,
            } => {
                fs::write(&invocation.diagnostics_path, diagnostics)?;
                if writes_sentinel {
                    fs::write(&sentinel, "done\n")?;
                }
                1
            }
            Behavior::ExitCleanWithoutSentinel => 0,
            Behavior::WriteArtifact { name, contents } => {
                fs::write(output.join(name), contents)?;
                0
            }
            Behavior::Unlaunchable => return Err(anyhow!("no such image")),
        };
        Ok(WorkerExit { code: Some(code) })
    }
}
