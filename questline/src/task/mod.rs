//! Task contract and the lifecycle state every task embeds.
//!
//! A [`Task`] is ticked by its owner (the executor, or a parent composite).
//! Each `execute` call performs at most one externally observable action and
//! never launches a second asynchronous action while one is outstanding.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::budget::{budget_exceeded, elapsed_since};
use crate::core::types::{TaskFailure, TaskState};
use crate::io::environment::Environment;

pub mod action;
pub mod composite;
pub mod conditional;
pub mod navigate;

/// Per-tick view handed to tasks, steps and predicates.
pub struct TaskContext<'a> {
    /// The world being automated.
    pub env: &'a dyn Environment,
    /// Tick clock; all timeouts are measured against this instant.
    pub now: Instant,
    /// Monotonic tick counter maintained by the driver.
    pub tick: u64,
}

impl<'a> TaskContext<'a> {
    pub fn new(env: &'a dyn Environment, now: Instant, tick: u64) -> Self {
        Self { env, now, tick }
    }
}

/// A unit of work with an explicit lifecycle.
pub trait Task {
    /// Pure precondition check. Must not mutate the task or the world.
    fn can_execute(&self, _ctx: &TaskContext<'_>) -> bool {
        true
    }

    /// Perform one unit of work.
    fn execute(&mut self, ctx: &TaskContext<'_>);

    fn state(&self) -> TaskState;

    fn description(&self) -> &str;

    /// Why the task failed or was cancelled, if it did.
    fn failure(&self) -> Option<&TaskFailure> {
        None
    }

    /// Stop the task. Propagates to active sub-tasks and abandons any
    /// outstanding action. No-op on terminal tasks.
    fn cancel(&mut self);

    /// Ticks since the task last made progress, `None` when not tracked.
    ///
    /// Composites treat `Some(0)` right after a child's `execute` as progress
    /// of their own.
    fn idle_ticks(&self) -> Option<u32> {
        None
    }

    /// Whether an urgent task may displace this one while it runs.
    fn is_interruptible(&self) -> bool {
        true
    }
}

/// Boolean check evaluated against the current tick.
pub type Predicate = Box<dyn Fn(&TaskContext<'_>) -> bool>;

/// Task handle shared between the executor and whoever submitted it.
pub type SharedTask = Rc<RefCell<dyn Task>>;

/// Wrap a task for submission to the executor.
pub fn shared<T: Task + 'static>(task: T) -> SharedTask {
    Rc::new(RefCell::new(task))
}

/// Lifecycle bookkeeping shared by all task implementations.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    description: String,
    state: TaskState,
    timeout: Option<Duration>,
    started_at: Option<Instant>,
    last_tick_at: Option<Instant>,
    failure: Option<TaskFailure>,
    ticks: u32,
    inactivity_limit: Option<u32>,
    last_progress_tick: u32,
}

impl Lifecycle {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            state: TaskState::Pending,
            timeout: None,
            started_at: None,
            last_tick_at: None,
            failure: None,
            ticks: 0,
            inactivity_limit: None,
            last_progress_tick: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Fail with [`TaskFailure::Stalled`] once more than `ticks` ticks pass
    /// without [`Lifecycle::record_progress`].
    pub fn set_inactivity_limit(&mut self, ticks: Option<u32>) {
        self.inactivity_limit = ticks;
    }

    pub fn inactivity_limit(&self) -> Option<u32> {
        self.inactivity_limit
    }

    /// Reset the inactivity counter.
    pub fn record_progress(&mut self) {
        self.last_progress_tick = self.ticks;
    }

    /// Ticks since the last recorded progress (or since the task started).
    pub fn idle_ticks(&self) -> u32 {
        self.ticks - self.last_progress_tick
    }

    /// True when the task stopped on its timeout or inactivity limit.
    pub fn timed_out(&self) -> bool {
        matches!(
            self.failure,
            Some(TaskFailure::Timeout | TaskFailure::Stalled { .. })
        )
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Number of ticks during which the task did work.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Enter a tick. Returns true when the task should do work this tick.
    ///
    /// Starts a pending task, fails a running task whose timeout has elapsed
    /// or that went too long without progress, and returns false for terminal
    /// tasks.
    pub fn begin_tick(&mut self, now: Instant) -> bool {
        match self.state {
            TaskState::Pending => {
                debug!(
                    task = %self.description,
                    timeout_ms = ?self.timeout.map(|t| t.as_millis()),
                    "starting task"
                );
                self.transition(TaskState::Running);
                self.started_at = Some(now);
            }
            TaskState::Running => {}
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => return false,
        }
        self.last_tick_at = Some(now);

        if let (Some(started_at), Some(timeout)) = (self.started_at, self.timeout) {
            if budget_exceeded(started_at, now, timeout) {
                self.fail(TaskFailure::Timeout);
                return false;
            }
        }

        self.ticks += 1;
        if let Some(limit) = self.inactivity_limit {
            let idle = self.idle_ticks();
            if idle > limit {
                warn!(task = %self.description, idle, limit, "no progress, giving up");
                self.fail(TaskFailure::Stalled { ticks: idle });
                return false;
            }
        }
        true
    }

    pub fn complete(&mut self) {
        if self.transition(TaskState::Completed) {
            debug!(
                task = %self.description,
                ticks = self.ticks,
                elapsed_ms = self.elapsed_ms(),
                "task completed"
            );
        }
    }

    pub fn fail(&mut self, failure: TaskFailure) {
        if self.transition(TaskState::Failed) {
            debug!(
                task = %self.description,
                reason = %failure,
                ticks = self.ticks,
                elapsed_ms = self.elapsed_ms(),
                "task failed"
            );
            self.failure = Some(failure);
        }
    }

    /// Mark the task cancelled. Returns true if this call changed the state.
    pub fn cancel(&mut self) -> bool {
        if self.transition(TaskState::Cancelled) {
            self.failure = Some(TaskFailure::Aborted);
            debug!(task = %self.description, "task cancelled");
            return true;
        }
        false
    }

    fn transition(&mut self, to: TaskState) -> bool {
        let from = self.state;
        if !from.can_transition_to(to) {
            if !from.is_terminal() {
                warn!(task = %self.description, %from, %to, "invalid state transition");
            }
            return false;
        }
        self.state = to;
        true
    }

    fn elapsed_ms(&self) -> u128 {
        match (self.started_at, self.last_tick_at) {
            (Some(start), Some(last)) => elapsed_since(start, last).as_millis(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_starts_the_task() {
        let mut lifecycle = Lifecycle::new("walk");
        let now = Instant::now();
        assert!(lifecycle.begin_tick(now));
        assert_eq!(lifecycle.state(), TaskState::Running);
        assert_eq!(lifecycle.started_at(), Some(now));
        assert_eq!(lifecycle.ticks(), 1);
    }

    #[test]
    fn timeout_fails_task_on_later_tick() {
        let mut lifecycle = Lifecycle::new("walk").with_timeout(Duration::from_secs(2));
        let start = Instant::now();
        assert!(lifecycle.begin_tick(start));
        assert!(lifecycle.begin_tick(start + Duration::from_secs(2)));
        assert!(!lifecycle.begin_tick(start + Duration::from_secs(3)));
        assert_eq!(lifecycle.state(), TaskState::Failed);
        assert_eq!(lifecycle.failure(), Some(&TaskFailure::Timeout));
        assert_eq!(lifecycle.failure().map(ToString::to_string).as_deref(), Some("timeout"));
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut lifecycle = Lifecycle::new("click");
        lifecycle.begin_tick(Instant::now());
        lifecycle.complete();
        lifecycle.fail(TaskFailure::Domain("late".to_string()));
        assert!(!lifecycle.cancel());
        assert!(!lifecycle.begin_tick(Instant::now()));
        assert_eq!(lifecycle.state(), TaskState::Completed);
        assert_eq!(lifecycle.failure(), None);
    }

    #[test]
    fn inactivity_limit_fails_task_without_progress() {
        let mut lifecycle = Lifecycle::new("stuck");
        lifecycle.set_inactivity_limit(Some(3));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(lifecycle.begin_tick(now));
        }
        assert!(!lifecycle.begin_tick(now));
        assert_eq!(lifecycle.state(), TaskState::Failed);
        assert_eq!(lifecycle.failure(), Some(&TaskFailure::Stalled { ticks: 4 }));
        assert!(lifecycle.timed_out());
    }

    #[test]
    fn recorded_progress_resets_inactivity() {
        let mut lifecycle = Lifecycle::new("walking");
        lifecycle.set_inactivity_limit(Some(2));
        let now = Instant::now();
        for _ in 0..10 {
            assert!(lifecycle.begin_tick(now));
            lifecycle.record_progress();
            assert_eq!(lifecycle.idle_ticks(), 0);
        }
        assert_eq!(lifecycle.state(), TaskState::Running);
    }

    #[test]
    fn pending_task_can_be_cancelled() {
        let mut lifecycle = Lifecycle::new("queued");
        assert!(lifecycle.cancel());
        assert_eq!(lifecycle.state(), TaskState::Cancelled);
        assert_eq!(lifecycle.failure(), Some(&TaskFailure::Aborted));
    }
}
