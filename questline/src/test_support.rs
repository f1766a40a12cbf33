//! Test-only helpers: scripted tasks, spies and counting steps.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::types::{TaskFailure, TaskState};
use crate::io::config::{EngineConfig, write_config};
use crate::quest::BasicStep;
use crate::task::{Lifecycle, Task, TaskContext};

#[derive(Debug, Clone)]
enum Script {
    CompleteAfter(u32),
    FailAfter(u32, String),
    Forever,
}

/// Task whose outcome is fixed up front and reached after a number of ticks.
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    lifecycle: Lifecycle,
    script: Script,
    executable: bool,
    interruptible: bool,
}

impl ScriptedTask {
    pub fn completes_after(description: &str, ticks: u32) -> Self {
        Self::new(description, Script::CompleteAfter(ticks))
    }

    /// Fails with `TaskFailure::Domain(reason)` on tick `ticks`.
    pub fn fails_after(description: &str, ticks: u32, reason: &str) -> Self {
        Self::new(description, Script::FailAfter(ticks, reason.to_string()))
    }

    pub fn runs_forever(description: &str) -> Self {
        Self::new(description, Script::Forever)
    }

    /// Make `can_execute` return false.
    pub fn blocked(mut self) -> Self {
        self.executable = false;
        self
    }

    pub fn uninterruptible(mut self) -> Self {
        self.interruptible = false;
        self
    }

    fn new(description: &str, script: Script) -> Self {
        Self {
            lifecycle: Lifecycle::new(description),
            script,
            executable: true,
            interruptible: true,
        }
    }
}

impl Task for ScriptedTask {
    fn can_execute(&self, _ctx: &TaskContext<'_>) -> bool {
        self.executable
    }

    fn execute(&mut self, ctx: &TaskContext<'_>) {
        if !self.lifecycle.begin_tick(ctx.now) {
            return;
        }
        let ticks = self.lifecycle.ticks();
        match &self.script {
            Script::CompleteAfter(n) if ticks >= *n => self.lifecycle.complete(),
            Script::FailAfter(n, reason) if ticks >= *n => {
                let failure = TaskFailure::Domain(reason.clone());
                self.lifecycle.fail(failure);
            }
            _ => {}
        }
    }

    fn state(&self) -> TaskState {
        self.lifecycle.state()
    }

    fn description(&self) -> &str {
        self.lifecycle.description()
    }

    fn failure(&self) -> Option<&TaskFailure> {
        self.lifecycle.failure()
    }

    fn cancel(&mut self) {
        self.lifecycle.cancel();
    }

    fn idle_ticks(&self) -> Option<u32> {
        Some(self.lifecycle.idle_ticks())
    }

    fn is_interruptible(&self) -> bool {
        self.interruptible
    }
}

/// Never-ending task that counts how often it was executed.
#[derive(Debug)]
pub struct SpyTask {
    lifecycle: Lifecycle,
    executions: Rc<Cell<u32>>,
}

impl SpyTask {
    pub fn new(description: &str, executions: Rc<Cell<u32>>) -> Self {
        Self {
            lifecycle: Lifecycle::new(description),
            executions,
        }
    }
}

impl Task for SpyTask {
    fn execute(&mut self, ctx: &TaskContext<'_>) {
        if !self.lifecycle.begin_tick(ctx.now) {
            return;
        }
        self.executions.set(self.executions.get() + 1);
    }

    fn state(&self) -> TaskState {
        self.lifecycle.state()
    }

    fn description(&self) -> &str {
        self.lifecycle.description()
    }

    fn failure(&self) -> Option<&TaskFailure> {
        self.lifecycle.failure()
    }

    fn cancel(&mut self) {
        self.lifecycle.cancel();
    }
}

/// Step that counts `to_tasks` calls and builds tasks with `make`.
pub fn counting_step(
    text: &str,
    calls: Rc<Cell<u32>>,
    make: impl Fn() -> Vec<Box<dyn Task>> + 'static,
) -> BasicStep {
    BasicStep::new(text).tasks(move |_| {
        calls.set(calls.get() + 1);
        make()
    })
}

/// Temporary directory holding a `questline.toml`.
pub struct TempConfig {
    dir: TempDir,
}

impl TempConfig {
    /// Create an empty temp dir (no config file written yet).
    pub fn empty() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        Ok(Self { dir })
    }

    pub fn with(config: &EngineConfig) -> Result<Self> {
        let temp = Self::empty()?;
        write_config(&temp.path(), config)?;
        Ok(temp)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("questline.toml")
    }
}
