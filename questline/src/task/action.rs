//! Single-input task: inject one input and wait for its result.

use std::time::Duration;

use tracing::debug;

use crate::core::types::{TaskFailure, TaskState};
use crate::io::environment::{ActionPoll, Input, PendingAction};

use super::{Lifecycle, Predicate, Task, TaskContext};

/// Injects one [`Input`] and completes when the environment reports success.
///
/// An `Err` result fails the task with the environment's reason; an action
/// dropped without a result fails it as interrupted.
pub struct ActionTask {
    lifecycle: Lifecycle,
    input: Input,
    requires_idle: bool,
    precondition: Option<Predicate>,
    pending: PendingAction,
    launched: bool,
}

impl ActionTask {
    pub fn new(input: Input) -> Self {
        let description = input.to_string();
        Self {
            lifecycle: Lifecycle::new(description),
            input,
            requires_idle: false,
            precondition: None,
            pending: PendingAction::new(),
            launched: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.lifecycle.set_description(description);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_timeout(Some(timeout));
        self
    }

    /// Only start once the player is idle.
    pub fn requiring_idle(mut self) -> Self {
        self.requires_idle = true;
        self
    }

    pub fn with_precondition(
        mut self,
        precondition: impl Fn(&TaskContext<'_>) -> bool + 'static,
    ) -> Self {
        self.precondition = Some(Box::new(precondition));
        self
    }

    pub fn input(&self) -> &Input {
        &self.input
    }
}

impl Task for ActionTask {
    fn can_execute(&self, ctx: &TaskContext<'_>) -> bool {
        if self.requires_idle && !ctx.env.is_idle() {
            return false;
        }
        self.precondition.as_ref().is_none_or(|check| check(ctx))
    }

    fn execute(&mut self, ctx: &TaskContext<'_>) {
        if !self.lifecycle.begin_tick(ctx.now) {
            self.pending.abandon();
            return;
        }

        match self.pending.poll() {
            ActionPoll::Outstanding => {}
            ActionPoll::Resolved(Ok(())) => self.lifecycle.complete(),
            ActionPoll::Resolved(Err(reason)) => self.lifecycle.fail(TaskFailure::Domain(reason)),
            ActionPoll::Interrupted => self.lifecycle.fail(TaskFailure::Interrupted(format!(
                "{} dropped without result",
                self.input
            ))),
            ActionPoll::Idle if self.launched => {
                self.lifecycle.fail(TaskFailure::InvariantViolation(
                    "action slot idle after launch".to_string(),
                ));
            }
            ActionPoll::Idle => {
                debug!(input = %self.input, tick = ctx.tick, "injecting input");
                let handle = ctx.env.inject(self.input.clone());
                self.pending.launch(handle);
                self.launched = true;
                self.lifecycle.record_progress();
            }
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
        self.pending.abandon();
        self.lifecycle.cancel();
    }

    fn idle_ticks(&self) -> Option<u32> {
        Some(self.lifecycle.idle_ticks())
    }
}
