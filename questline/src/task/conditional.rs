//! Branching task: run one of two sub-tasks depending on a predicate.

use tracing::{debug, warn};

use crate::core::types::{TaskFailure, TaskState};

use super::composite::child_progressed;
use super::{Lifecycle, Predicate, Task, TaskContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    IfTrue,
    IfFalse,
}

/// Runs `if_true` when the condition holds, `if_false` (if any) otherwise.
///
/// The condition is evaluated on the first tick. With dynamic evaluation it
/// is re-checked every tick; if it flips while the selected branch is
/// running, that branch is cancelled and the other one takes over.
pub struct ConditionalTask {
    lifecycle: Lifecycle,
    condition: Predicate,
    if_true: Box<dyn Task>,
    if_false: Option<Box<dyn Task>>,
    dynamic: bool,
    selected: Option<Branch>,
}

impl ConditionalTask {
    pub fn if_then(
        condition: impl Fn(&TaskContext<'_>) -> bool + 'static,
        if_true: impl Task + 'static,
    ) -> Self {
        let description = format!("ConditionalTask[if: {}]", if_true.description());
        Self {
            lifecycle: Lifecycle::new(description),
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: None,
            dynamic: false,
            selected: None,
        }
    }

    pub fn or_else(mut self, if_false: impl Task + 'static) -> Self {
        if !self.has_custom_description() {
            self.lifecycle.set_description(format!(
                "ConditionalTask[if: {}, else: {}]",
                self.if_true.description(),
                if_false.description()
            ));
        }
        self.if_false = Some(Box::new(if_false));
        self
    }

    pub fn with_dynamic_evaluation(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.lifecycle.set_description(description);
        self
    }

    /// True once the condition has been evaluated.
    pub fn is_evaluated(&self) -> bool {
        self.selected.is_some()
    }

    /// Description of the branch selected by the last evaluation, if it has one.
    pub fn selected_description(&self) -> Option<&str> {
        self.selected
            .and_then(|branch| self.branch(branch))
            .map(|task| task.description())
    }

    fn has_custom_description(&self) -> bool {
        !self.lifecycle.description().starts_with("ConditionalTask[")
    }

    fn branch(&self, branch: Branch) -> Option<&dyn Task> {
        match branch {
            Branch::IfTrue => Some(self.if_true.as_ref()),
            Branch::IfFalse => self.if_false.as_deref(),
        }
    }

    fn branch_mut(&mut self, branch: Branch) -> Option<&mut Box<dyn Task>> {
        match branch {
            Branch::IfTrue => Some(&mut self.if_true),
            Branch::IfFalse => self.if_false.as_mut(),
        }
    }

    fn select(&mut self, ctx: &TaskContext<'_>) {
        if self.selected.is_some() && !self.dynamic {
            return;
        }
        let branch = if (self.condition)(ctx) {
            Branch::IfTrue
        } else {
            Branch::IfFalse
        };
        match self.selected {
            None => debug!(task = self.lifecycle.description(), ?branch, "condition evaluated"),
            Some(previous) if previous != branch => {
                warn!(
                    task = self.lifecycle.description(),
                    ?previous,
                    ?branch,
                    "condition flipped mid-execution, cancelling current branch"
                );
                if let Some(task) = self.branch_mut(previous) {
                    task.cancel();
                }
            }
            Some(_) => {}
        }
        self.selected = Some(branch);
    }
}

impl Task for ConditionalTask {
    fn execute(&mut self, ctx: &TaskContext<'_>) {
        if !self.lifecycle.begin_tick(ctx.now) {
            if self.lifecycle.timed_out() {
                if let Some(task) = self.selected.and_then(|branch| self.branch_mut(branch)) {
                    task.cancel();
                }
            }
            return;
        }
        self.select(ctx);
        let Some(branch) = self.selected else {
            self.lifecycle.fail(TaskFailure::InvariantViolation(
                "no branch selected after evaluation".to_string(),
            ));
            return;
        };

        let Some(task) = self.branch_mut(branch) else {
            debug!(?branch, "no task for selected branch");
            self.lifecycle.complete();
            return;
        };

        if task.state() == TaskState::Pending && !task.can_execute(ctx) {
            return;
        }
        let before = task.state();
        task.execute(ctx);
        let progressed = child_progressed(task.as_ref(), before);

        match task.state() {
            TaskState::Completed => self.lifecycle.complete(),
            TaskState::Failed | TaskState::Cancelled => {
                let failure = TaskFailure::ChildFailed {
                    description: task.description().to_string(),
                    reason: task
                        .failure()
                        .map_or_else(|| task.state().to_string(), ToString::to_string),
                };
                self.lifecycle.fail(failure);
            }
            TaskState::Pending | TaskState::Running => {
                if progressed {
                    self.lifecycle.record_progress();
                }
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
        if self.lifecycle.is_terminal() {
            return;
        }
        if let Some(branch) = self.selected {
            if let Some(task) = self.branch_mut(branch) {
                task.cancel();
            }
        }
        self.lifecycle.cancel();
    }

    fn idle_ticks(&self) -> Option<u32> {
        Some(self.lifecycle.idle_ticks())
    }
}
