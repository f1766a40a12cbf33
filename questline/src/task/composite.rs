//! Composite tasks: sequential and parallel groups of child tasks.
//!
//! A [`CompositeTask`] satisfies the [`Task`] contract itself, so the executor
//! never needs to know how deeply tasks are nested.

use tracing::{debug, warn};

use crate::core::types::{TaskFailure, TaskState};

use super::{Lifecycle, Task, TaskContext};

/// How a parallel composite reacts to a required child failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Cancel the remaining children and fail immediately.
    #[default]
    FailFast,
    /// Let the remaining children finish, then fail.
    RequireAll,
}

/// A child of a parallel composite.
pub struct ParallelChild {
    task: Box<dyn Task>,
    required: bool,
}

impl ParallelChild {
    /// Failures of an optional child never fail the composite.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Wrap a task as a required parallel child.
pub fn parallel_child(task: impl Task + 'static) -> ParallelChild {
    ParallelChild {
        task: Box::new(task),
        required: true,
    }
}

impl From<Box<dyn Task>> for ParallelChild {
    fn from(task: Box<dyn Task>) -> Self {
        Self {
            task,
            required: true,
        }
    }
}

enum Mode {
    Sequential { cursor: usize },
    Parallel { policy: FailurePolicy, required: Vec<bool> },
}

/// A task made of child tasks.
pub struct CompositeTask {
    lifecycle: Lifecycle,
    children: Vec<Box<dyn Task>>,
    mode: Mode,
}

impl CompositeTask {
    /// Run `children` one after another. A failed child fails the composite
    /// and later children are never ticked.
    pub fn sequential(children: Vec<Box<dyn Task>>) -> Self {
        let description = format!("CompositeTask[SEQUENTIAL, {} children]", children.len());
        Self {
            lifecycle: Lifecycle::new(description),
            children,
            mode: Mode::Sequential { cursor: 0 },
        }
    }

    /// Tick every non-terminal child once per call.
    pub fn parallel(children: Vec<ParallelChild>) -> Self {
        let description = format!("CompositeTask[PARALLEL, {} children]", children.len());
        let (children, required) = children
            .into_iter()
            .map(|child| (child.task, child.required))
            .unzip();
        Self {
            lifecycle: Lifecycle::new(description),
            children,
            mode: Mode::Parallel {
                policy: FailurePolicy::default(),
                required,
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.lifecycle.set_description(description);
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.lifecycle.set_timeout(Some(timeout));
        self
    }

    /// Fail as stalled after `ticks` ticks in which no child made progress.
    pub fn with_inactivity_limit(mut self, ticks: u32) -> Self {
        self.lifecycle.set_inactivity_limit(Some(ticks));
        self
    }

    /// Only meaningful for parallel composites.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        if let Mode::Parallel { policy: current, .. } = &mut self.mode {
            *current = policy;
        }
        self
    }

    pub fn children(&self) -> &[Box<dyn Task>] {
        &self.children
    }

    /// Description of the child currently being ticked (sequential only).
    pub fn current_child(&self) -> Option<&str> {
        match self.mode {
            Mode::Sequential { cursor } => self.children.get(cursor).map(|c| c.description()),
            Mode::Parallel { .. } => None,
        }
    }

    /// Fraction of children that reached a terminal state, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.children.is_empty() {
            return 1.0;
        }
        let done = match self.mode {
            Mode::Sequential { cursor } => cursor,
            Mode::Parallel { .. } => self
                .children
                .iter()
                .filter(|c| c.state().is_terminal())
                .count(),
        };
        done as f64 / self.children.len() as f64
    }

    fn execute_sequential(&mut self, ctx: &TaskContext<'_>) {
        let Mode::Sequential { cursor } = &mut self.mode else {
            return;
        };
        let Some(child) = self.children.get_mut(*cursor) else {
            self.lifecycle.complete();
            return;
        };

        if child.state() == TaskState::Pending && !child.can_execute(ctx) {
            debug!(index = *cursor, child = child.description(), "sequential child waiting on precondition");
            return;
        }

        let before = child.state();
        child.execute(ctx);
        if child_progressed(child.as_ref(), before) {
            self.lifecycle.record_progress();
        }

        match child.state() {
            TaskState::Completed => {
                *cursor += 1;
                debug!(completed = *cursor - 1, next = *cursor, "sequential child completed");
                if *cursor >= self.children.len() {
                    self.lifecycle.complete();
                }
            }
            TaskState::Failed | TaskState::Cancelled => {
                let failure = child_failure(child.as_ref());
                warn!(index = *cursor, child = child.description(), reason = %failure, "sequential child failed");
                self.lifecycle.fail(failure);
            }
            TaskState::Pending | TaskState::Running => {}
        }
    }

    fn execute_parallel(&mut self, ctx: &TaskContext<'_>) {
        let Mode::Parallel { policy, required } = &self.mode else {
            return;
        };
        let policy = *policy;

        for (index, child) in self.children.iter_mut().enumerate() {
            if child.state().is_terminal() {
                continue;
            }
            if child.state() == TaskState::Pending && !child.can_execute(ctx) {
                continue;
            }
            let before = child.state();
            child.execute(ctx);
            if child_progressed(child.as_ref(), before) {
                self.lifecycle.record_progress();
            }

            let failed = matches!(child.state(), TaskState::Failed | TaskState::Cancelled);
            if failed && required[index] {
                debug!(index, child = child.description(), "required parallel child failed");
                if policy == FailurePolicy::FailFast {
                    let failure = child_failure(child.as_ref());
                    cancel_remaining(&mut self.children);
                    self.lifecycle.fail(failure);
                    return;
                }
            }
        }

        if !self.children.iter().all(|c| c.state().is_terminal()) {
            return;
        }
        let failed_required: Vec<&dyn Task> = self
            .children
            .iter()
            .zip(required)
            .filter(|(child, required)| **required && child.state() != TaskState::Completed)
            .map(|(child, _)| child.as_ref())
            .collect();
        match failed_required.first() {
            None => self.lifecycle.complete(),
            Some(first) if failed_required.len() == 1 => {
                let failure = child_failure(*first);
                self.lifecycle.fail(failure);
            }
            Some(_) => self.lifecycle.fail(TaskFailure::Domain(format!(
                "{} required child tasks failed",
                failed_required.len()
            ))),
        }
    }
}

/// A state change or a child reporting fresh progress counts as progress.
pub(crate) fn child_progressed(child: &dyn Task, before: TaskState) -> bool {
    child.state() != before || child.idle_ticks() == Some(0)
}

fn child_failure(child: &dyn Task) -> TaskFailure {
    TaskFailure::ChildFailed {
        description: child.description().to_string(),
        reason: child
            .failure()
            .map_or_else(|| child.state().to_string(), ToString::to_string),
    }
}

fn cancel_remaining(children: &mut [Box<dyn Task>]) {
    for child in children.iter_mut().filter(|c| !c.state().is_terminal()) {
        child.cancel();
    }
}

impl Task for CompositeTask {
    fn can_execute(&self, _ctx: &TaskContext<'_>) -> bool {
        if self.children.is_empty() {
            warn!(task = self.lifecycle.description(), "composite task has no children");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &TaskContext<'_>) {
        if !self.lifecycle.begin_tick(ctx.now) {
            if self.lifecycle.timed_out() {
                cancel_remaining(&mut self.children);
            }
            return;
        }
        match self.mode {
            Mode::Sequential { .. } => self.execute_sequential(ctx),
            Mode::Parallel { .. } => self.execute_parallel(ctx),
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
        match self.mode {
            Mode::Sequential { cursor } => {
                if let Some(child) = self.children.get_mut(cursor) {
                    child.cancel();
                }
            }
            Mode::Parallel { .. } => cancel_remaining(&mut self.children),
        }
        self.lifecycle.cancel();
    }

    fn idle_ticks(&self) -> Option<u32> {
        Some(self.lifecycle.idle_ticks())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::io::sim::SimWorld;
    use crate::test_support::{ScriptedTask, SpyTask};

    fn ctx(world: &SimWorld) -> TaskContext<'_> {
        TaskContext::new(world, Instant::now(), 0)
    }

    #[test]
    fn sequential_runs_children_in_order() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::sequential(vec![
            Box::new(ScriptedTask::completes_after("a", 1)),
            Box::new(ScriptedTask::completes_after("b", 2)),
        ]);

        composite.execute(&ctx(&world));
        assert_eq!(composite.current_child(), Some("b"));
        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Running);
        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Completed);
        assert_eq!(composite.progress(), 1.0);
    }

    #[test]
    fn sequential_fails_fast_without_ticking_later_children() {
        let world = SimWorld::default();
        let b_ticks = Rc::new(Cell::new(0));
        let c_ticks = Rc::new(Cell::new(0));
        let mut composite = CompositeTask::sequential(vec![
            Box::new(ScriptedTask::fails_after("a", 1, "X")),
            Box::new(SpyTask::new("b", b_ticks.clone())),
            Box::new(SpyTask::new("c", c_ticks.clone())),
        ]);

        composite.execute(&ctx(&world));
        composite.execute(&ctx(&world));

        assert_eq!(composite.state(), TaskState::Failed);
        assert_eq!(
            composite.failure(),
            Some(&TaskFailure::ChildFailed {
                description: "a".to_string(),
                reason: "X".to_string(),
            })
        );
        assert_eq!(b_ticks.get(), 0);
        assert_eq!(c_ticks.get(), 0);
    }

    #[test]
    fn cancelling_sequential_cancels_active_child_only() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::sequential(vec![
            Box::new(ScriptedTask::runs_forever("a")),
            Box::new(ScriptedTask::runs_forever("b")),
        ]);
        composite.execute(&ctx(&world));
        composite.cancel();

        assert_eq!(composite.state(), TaskState::Cancelled);
        assert_eq!(composite.children()[0].state(), TaskState::Cancelled);
        assert_eq!(composite.children()[1].state(), TaskState::Pending);
    }

    #[test]
    fn empty_composite_cannot_execute() {
        let world = SimWorld::default();
        let composite = CompositeTask::sequential(Vec::new());
        assert!(!composite.can_execute(&ctx(&world)));
    }

    #[test]
    fn parallel_completes_when_all_children_complete() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::parallel(vec![
            parallel_child(ScriptedTask::completes_after("a", 1)),
            parallel_child(ScriptedTask::completes_after("b", 3)),
        ]);
        for _ in 0..2 {
            composite.execute(&ctx(&world));
            assert_eq!(composite.state(), TaskState::Running);
        }
        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Completed);
    }

    #[test]
    fn cancelling_parallel_cancels_every_child() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::parallel(vec![
            parallel_child(ScriptedTask::runs_forever("a")),
            parallel_child(ScriptedTask::runs_forever("b")).optional(),
        ]);
        composite.execute(&ctx(&world));
        composite.cancel();

        assert_eq!(composite.state(), TaskState::Cancelled);
        let states: Vec<TaskState> = composite.children().iter().map(|c| c.state()).collect();
        assert_eq!(states, vec![TaskState::Cancelled, TaskState::Cancelled]);
    }

    #[test]
    fn parallel_fail_fast_cancels_siblings() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::parallel(vec![
            parallel_child(ScriptedTask::fails_after("a", 1, "boom")),
            parallel_child(ScriptedTask::runs_forever("b")),
        ]);
        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Failed);
        assert_eq!(composite.children()[1].state(), TaskState::Cancelled);
    }

    #[test]
    fn parallel_require_all_lets_siblings_finish() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::parallel(vec![
            parallel_child(ScriptedTask::fails_after("a", 1, "boom")),
            parallel_child(ScriptedTask::completes_after("b", 2)),
        ])
        .with_failure_policy(FailurePolicy::RequireAll);

        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Running);
        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Failed);
        assert_eq!(composite.children()[1].state(), TaskState::Completed);
    }

    #[test]
    fn optional_parallel_child_failure_is_ignored() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::parallel(vec![
            parallel_child(ScriptedTask::fails_after("a", 1, "boom")).optional(),
            parallel_child(ScriptedTask::completes_after("b", 1)),
        ]);
        composite.execute(&ctx(&world));
        assert_eq!(composite.state(), TaskState::Completed);
    }

    #[test]
    fn composite_timeout_cancels_active_children() {
        let world = SimWorld::default();
        let start = Instant::now();
        let mut composite = CompositeTask::sequential(vec![Box::new(
            ScriptedTask::runs_forever("slow"),
        )])
        .with_timeout(Duration::from_secs(1));

        composite.execute(&TaskContext::new(&world, start, 0));
        composite.execute(&TaskContext::new(&world, start + Duration::from_secs(5), 1));

        assert_eq!(composite.state(), TaskState::Failed);
        assert_eq!(composite.failure(), Some(&TaskFailure::Timeout));
        assert_eq!(composite.children()[0].state(), TaskState::Cancelled);
    }

    #[test]
    fn blocked_child_stalls_composite() {
        let world = SimWorld::default();
        let mut composite = CompositeTask::sequential(vec![
            Box::new(ScriptedTask::completes_after("a", 1)),
            Box::new(ScriptedTask::completes_after("blocked", 1).blocked()),
        ])
        .with_inactivity_limit(3);

        composite.execute(&ctx(&world));
        assert_eq!(composite.current_child(), Some("blocked"));
        for _ in 0..3 {
            composite.execute(&ctx(&world));
            assert_eq!(composite.state(), TaskState::Running);
        }
        composite.execute(&ctx(&world));

        assert_eq!(composite.state(), TaskState::Failed);
        assert_eq!(composite.failure(), Some(&TaskFailure::Stalled { ticks: 4 }));
    }

    #[test]
    fn child_state_changes_keep_composite_alive() {
        let world = SimWorld::default();
        let children: Vec<Box<dyn Task>> = (0..6)
            .map(|i| Box::new(ScriptedTask::completes_after(&format!("step {i}"), 2)) as Box<dyn Task>)
            .collect();
        let mut composite = CompositeTask::sequential(children).with_inactivity_limit(1);

        for _ in 0..12 {
            composite.execute(&ctx(&world));
        }
        assert_eq!(composite.state(), TaskState::Completed);
    }
}
