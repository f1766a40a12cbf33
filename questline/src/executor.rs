//! Single-actor task executor.
//!
//! [`TaskExecutor`] owns a priority queue of submitted tasks and ticks at most
//! one of them per tick. It is the only component that drives tasks, so no two
//! tasks can ever issue inputs in the same tick. Within one priority the queue
//! is FIFO; with everything queued at [`TaskPriority::Normal`] it behaves as a
//! plain FIFO.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::core::types::{TaskFailure, TaskState};
use crate::task::{SharedTask, TaskContext};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Scheduling class of a queued task. Lower variants are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Preempts an interruptible running task on the next tick.
    Urgent,
    #[default]
    Normal,
    Low,
}

/// Terminal result of a task, reported to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub description: String,
    pub state: TaskState,
    pub failure: Option<TaskFailure>,
}

impl TaskOutcome {
    fn of(task: &SharedTask) -> Self {
        let task = task.borrow();
        Self {
            description: task.description().to_string(),
            state: task.state(),
            failure: task.failure().cloned(),
        }
    }
}

/// What a single [`TaskExecutor::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// The executor is stopped; nothing happened.
    Stopped,
    /// No current task and nothing queued.
    Idle,
    /// A dequeued task failed its precondition and was cancelled.
    Dropped(String),
    /// The current task ran and is still active.
    Ran(TaskState),
    /// The current task reached a terminal state and was released.
    Finished(TaskOutcome),
}

/// Point-in-time summary of the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStatus {
    pub running: bool,
    pub current: Option<String>,
    pub current_state: Option<TaskState>,
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = if self.running { "running" } else { "stopped" };
        match (&self.current, self.current_state) {
            (Some(task), Some(state)) => write!(f, "{running}, current: {task} ({state})")?,
            _ => write!(f, "{running}, idle")?,
        }
        write!(
            f,
            ", queued: {}, completed: {}, failed: {}",
            self.pending, self.completed, self.failed
        )
    }
}

type Listener = Box<dyn FnMut(&TaskOutcome)>;
type IdleSupplier = Box<dyn FnMut() -> Option<SharedTask>>;

struct Queued {
    priority: TaskPriority,
    task: SharedTask,
}

pub struct TaskExecutor {
    queue: VecDeque<Queued>,
    current: Option<Queued>,
    running: bool,
    max_queue_size: usize,
    listener: Option<Listener>,
    idle_supplier: Option<IdleSupplier>,
    completed: u64,
    failed: u64,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE)
    }
}

impl TaskExecutor {
    /// A stopped executor. Call [`start`](Self::start) before ticking.
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            running: false,
            max_queue_size,
            listener: None,
            idle_supplier: None,
            completed: 0,
            failed: 0,
        }
    }

    /// Called with every task that reaches a terminal state while owned here.
    pub fn set_listener(&mut self, listener: impl FnMut(&TaskOutcome) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Asked for a task whenever nothing is current and the queue is empty.
    pub fn set_idle_task_supplier(
        &mut self,
        supplier: impl FnMut() -> Option<SharedTask> + 'static,
    ) {
        self.idle_supplier = Some(Box::new(supplier));
    }

    pub fn start(&mut self) {
        if !self.running {
            info!(queued = self.queue.len(), "task executor started");
        }
        self.running = true;
    }

    /// Pause ticking. The queue and current task are kept.
    pub fn stop(&mut self) {
        if self.running {
            info!(queued = self.queue.len(), "task executor stopped");
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Queue at [`TaskPriority::Normal`].
    pub fn queue_task(&mut self, task: SharedTask) -> Result<()> {
        self.queue_task_with_priority(task, TaskPriority::Normal)
    }

    /// Queue behind every task of the same or higher priority.
    pub fn queue_task_with_priority(
        &mut self,
        task: SharedTask,
        priority: TaskPriority,
    ) -> Result<()> {
        if self.queue.len() >= self.max_queue_size {
            let description = task.borrow().description().to_string();
            error!(task = %description, max = self.max_queue_size, "task queue full, rejecting task");
            bail!(
                "task queue full ({} tasks), rejected {description}",
                self.max_queue_size
            );
        }
        let position = self
            .queue
            .iter()
            .position(|queued| queued.priority > priority)
            .unwrap_or(self.queue.len());
        debug!(task = task.borrow().description(), ?priority, position, "task queued");
        self.queue.insert(position, Queued { priority, task });
        Ok(())
    }

    /// Queue tasks in order, stopping at the first rejection.
    pub fn queue_tasks(&mut self, tasks: impl IntoIterator<Item = SharedTask>) -> Result<()> {
        for task in tasks {
            self.queue_task(task)?;
        }
        Ok(())
    }

    /// Drive the executor for one tick.
    ///
    /// Dequeues a task when none is current, then executes the current task
    /// exactly once. An urgent task waiting in the queue displaces an
    /// interruptible current task, which goes back to the head of its
    /// priority class and resumes later.
    #[instrument(skip_all, fields(tick = ctx.tick))]
    pub fn tick(&mut self, ctx: &TaskContext<'_>) -> TickReport {
        if !self.running {
            return TickReport::Stopped;
        }

        if let Some(current) = &self.current {
            if current.task.borrow().state().is_terminal() {
                debug!(task = current.task.borrow().description(), "current task ended outside the executor");
                return self.release_current();
            }
        }

        self.preempt_for_urgent();

        if self.current.is_none() {
            let Some(next) = self.dequeue() else {
                return TickReport::Idle;
            };
            let pending = next.task.borrow().state() == TaskState::Pending;
            if pending && !next.task.borrow().can_execute(ctx) {
                let description = next.task.borrow().description().to_string();
                warn!(task = %description, "precondition not met, dropping task");
                next.task.borrow_mut().cancel();
                let outcome = TaskOutcome {
                    failure: Some(TaskFailure::PreconditionNotMet),
                    ..TaskOutcome::of(&next.task)
                };
                self.report(outcome);
                return TickReport::Dropped(description);
            }
            info!(task = next.task.borrow().description(), priority = ?next.priority, "starting task");
            self.current = Some(next);
        }

        let Some(current) = self.current.as_ref().map(|queued| Rc::clone(&queued.task)) else {
            return TickReport::Idle;
        };
        current.borrow_mut().execute(ctx);
        let state = current.borrow().state();
        if state.is_terminal() {
            return self.release_current();
        }
        TickReport::Ran(state)
    }

    /// Cancel and release the current task. Returns false when there was none.
    pub fn abort_current(&mut self) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        info!(task = current.task.borrow().description(), "aborting current task");
        current.task.borrow_mut().cancel();
        self.release_current();
        true
    }

    /// Cancel every queued task. The current task keeps running.
    pub fn clear_queue(&mut self) -> usize {
        let cleared = self.queue.len();
        for queued in self.queue.drain(..) {
            queued.task.borrow_mut().cancel();
        }
        if cleared > 0 {
            info!(cleared, "task queue cleared");
        }
        cleared
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn current_state(&self) -> Option<TaskState> {
        self.current.as_ref().map(|queued| queued.task.borrow().state())
    }

    /// True when `task` is the current task.
    pub fn is_current(&self, task: &SharedTask) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(&current.task, task))
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            running: self.running,
            current: self
                .current
                .as_ref()
                .map(|queued| queued.task.borrow().description().to_string()),
            current_state: self.current_state(),
            pending: self.queue.len(),
            completed: self.completed,
            failed: self.failed,
        }
    }

    fn preempt_for_urgent(&mut self) {
        let urgent_waiting = self
            .queue
            .front()
            .is_some_and(|queued| queued.priority == TaskPriority::Urgent);
        if !urgent_waiting {
            return;
        }
        let Some(current) = self.current.take_if(|current| {
            let task = current.task.borrow();
            current.priority != TaskPriority::Urgent
                && task.state() == TaskState::Running
                && task.is_interruptible()
        }) else {
            return;
        };
        info!(task = current.task.borrow().description(), "interrupting task for urgent work");
        let position = self
            .queue
            .iter()
            .position(|queued| queued.priority >= current.priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, current);
    }

    fn dequeue(&mut self) -> Option<Queued> {
        while let Some(queued) = self.queue.pop_front() {
            if queued.task.borrow().state().is_terminal() {
                debug!(task = queued.task.borrow().description(), "discarding terminal task from queue");
                continue;
            }
            return Some(queued);
        }
        let task = self.idle_supplier.as_mut().and_then(|supply| supply())?;
        debug!(task = task.borrow().description(), "running idle task");
        Some(Queued {
            priority: TaskPriority::Low,
            task,
        })
    }

    fn release_current(&mut self) -> TickReport {
        let Some(queued) = self.current.take() else {
            return TickReport::Idle;
        };
        let outcome = self.report(TaskOutcome::of(&queued.task));
        TickReport::Finished(outcome)
    }

    fn report(&mut self, outcome: TaskOutcome) -> TaskOutcome {
        match outcome.state {
            TaskState::Completed => {
                self.completed += 1;
                info!(task = %outcome.description, "task completed");
            }
            _ => {
                self.failed += 1;
                let reason = outcome
                    .failure
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string);
                warn!(task = %outcome.description, state = %outcome.state, %reason, "task did not complete");
            }
        }
        if let Some(listener) = self.listener.as_mut() {
            listener(&outcome);
        }
        outcome
    }
}
