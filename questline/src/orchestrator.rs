//! Quest orchestration: turn resolved steps into queued tasks.
//!
//! Each tick [`Orchestrator::poll`] reads the quest's progress counter,
//! resolves the active step and makes sure exactly one task built for that
//! step is in flight. A task completing locally is not enough to move on; the
//! orchestrator waits for the counter to advance. Failed tasks are rebuilt
//! from the step on the next tick.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::resolver::StepResolver;
use crate::core::types::{TaskState, Tile};
use crate::executor::TaskExecutor;
use crate::io::config::EngineConfig;
use crate::quest::{Quest, Step};
use crate::task::composite::CompositeTask;
use crate::task::navigate::NavigateTask;
use crate::task::{SharedTask, Task, TaskContext, shared};

/// Builds the task that walks the player to a step's location.
pub type NavigationFactory = Box<dyn Fn(Tile, &str) -> Box<dyn Task>>;

/// Why the last quest session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The progress counter reached the completion threshold.
    Completed,
    /// `stop_quest` was called.
    Requested,
    /// One step failed `attempts` times in a row without a locally
    /// completed attempt in between.
    RetryBudgetExhausted { threshold: i64, attempts: u32 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Requested => f.write_str("stopped"),
            Self::RetryBudgetExhausted {
                threshold,
                attempts,
            } => write!(f, "step {threshold} failed {attempts} times"),
        }
    }
}

/// What one call to [`Orchestrator::poll`] decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No quest is running.
    Idle,
    /// The quest completed this tick and the session was closed.
    QuestCompleted,
    /// The counter is below every step threshold.
    NoStep,
    /// The task built for the current step is still running.
    InProgress,
    /// The step's tasks finished; waiting for the counter to advance.
    AwaitingConfirmation,
    /// The step's task failed; it will be rebuilt on the next tick.
    StepFailed { attempts: u32 },
    /// The step's precondition or idle requirement is not met yet.
    Deferred,
    /// New tasks were built for the step and queued.
    Submitted { threshold: i64 },
    /// The step failed too often and the quest was stopped.
    GaveUp(StopReason),
}

/// Snapshot of the running quest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestStatus {
    pub quest_id: String,
    pub quest_name: String,
    pub progress: f64,
    pub step_number: usize,
    pub total_steps: usize,
    pub counter: i64,
    pub step: Option<String>,
    pub task_state: Option<TaskState>,
    pub waiting_for_confirmation: bool,
    pub attempts: u32,
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Quest: {}", self.quest_name)?;
        writeln!(
            f,
            "Progress: {:.0}% ({}/{})",
            self.progress * 100.0,
            self.step_number,
            self.total_steps
        )?;
        writeln!(f, "Counter: {}", self.counter)?;
        if let Some(step) = &self.step {
            writeln!(f, "Current step: {step}")?;
        }
        if let Some(state) = self.task_state {
            writeln!(f, "Task state: {state}")?;
        }
        if self.attempts > 0 {
            writeln!(f, "Failed attempts: {}", self.attempts)?;
        }
        Ok(())
    }
}

/// State that lives exactly as long as one quest run.
struct QuestSession {
    quest: Rc<dyn Quest>,
    resolver: StepResolver<dyn Step>,
    active_task: Option<SharedTask>,
    last_executed_step: Option<i64>,
    waiting_for_confirmation: bool,
    attempts: u32,
}

impl QuestSession {
    fn new(quest: Rc<dyn Quest>) -> Self {
        let check = Rc::clone(&quest);
        let resolver = StepResolver::new(quest.id(), quest.steps(), quest.completion_threshold())
            .with_completion(move |counter| check.is_complete(counter));
        Self {
            quest,
            resolver,
            active_task: None,
            last_executed_step: None,
            waiting_for_confirmation: false,
            attempts: 0,
        }
    }

    fn read_counter(&self, ctx: &TaskContext<'_>) -> i64 {
        ctx.env.read_counter(self.quest.progress_counter())
    }

    /// Forget the task built for the previous step, cancelling it if it is
    /// still live.
    fn clear_tracking(&mut self) {
        if let Some(task) = self.active_task.take() {
            let mut task = task.borrow_mut();
            if !task.state().is_terminal() {
                debug!(task = task.description(), "cancelling stale step task");
                task.cancel();
            }
        }
        self.last_executed_step = None;
        self.waiting_for_confirmation = false;
    }
}

pub struct Orchestrator {
    session: Option<QuestSession>,
    proximity_threshold: u32,
    task_timeout: Option<Duration>,
    inactivity_limit: Option<u32>,
    max_step_attempts: Option<u32>,
    navigation: NavigationFactory,
    last_epoch: Option<u64>,
    last_stop: Option<StopReason>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Orchestrator {
    pub fn new(config: &EngineConfig) -> Self {
        let radius = config.navigation.arrival_radius_tiles;
        let max_walks = config.navigation.max_walk_attempts;
        Self {
            session: None,
            proximity_threshold: config.proximity_threshold_tiles,
            task_timeout: config.task_timeout(),
            inactivity_limit: config.inactivity_limit(),
            max_step_attempts: config.max_step_attempts,
            navigation: Box::new(move |target: Tile, step_text: &str| -> Box<dyn Task> {
                Box::new(
                    NavigateTask::new(target)
                        .with_arrival_radius(radius)
                        .with_max_walk_attempts(max_walks)
                        .with_description(format!("Auto-walk to step location: {step_text}")),
                )
            }),
            last_epoch: None,
            last_stop: None,
        }
    }

    /// Replace the task used to walk to a step's location.
    pub fn with_navigation(
        mut self,
        factory: impl Fn(Tile, &str) -> Box<dyn Task> + 'static,
    ) -> Self {
        self.navigation = Box::new(factory);
        self
    }

    /// Start running `quest`. Fails if a quest is already running.
    pub fn start_quest(&mut self, quest: Rc<dyn Quest>, ctx: &TaskContext<'_>) -> Result<()> {
        if let Some(session) = &self.session {
            warn!(
                running = session.quest.id(),
                requested = quest.id(),
                "quest already running"
            );
            bail!(
                "quest {} is already running; stop it before starting {}",
                session.quest.id(),
                quest.id()
            );
        }

        let mut session = QuestSession::new(quest);
        let counter = session.read_counter(ctx);
        session.resolver.update(counter);
        info!(
            quest = session.quest.id(),
            name = session.quest.name(),
            counter_source = %session.quest.progress_counter(),
            counter,
            steps = session.resolver.total_steps(),
            "quest started"
        );
        self.last_epoch = Some(ctx.env.session_epoch());
        self.last_stop = None;
        self.session = Some(session);
        Ok(())
    }

    /// Stop the running quest, cancelling its task. Returns false when no
    /// quest was running.
    pub fn stop_quest(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.finish(StopReason::Requested);
        true
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// True when the quest with `quest_id` is the one running.
    pub fn is_executing(&self, quest_id: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.quest.id() == quest_id)
    }

    pub fn last_stop(&self) -> Option<&StopReason> {
        self.last_stop.as_ref()
    }

    /// Resynchronize with the environment: drop the current task and
    /// re-resolve the step from a fresh counter read.
    pub fn force_refresh(&mut self, ctx: &TaskContext<'_>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.clear_tracking();
        session.attempts = 0;
        let counter = session.read_counter(ctx);
        session.resolver.force_refresh(counter);
        info!(progress = %session.resolver, "quest progress refreshed");
    }

    /// Drop tracking for the current step so it is rebuilt on the next poll.
    pub fn skip_step_tracking(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(next) = session.resolver.next_step() {
            warn!(next = next.text(), "resetting step tracking");
        }
        session.clear_tracking();
    }

    pub fn status(&self) -> Option<QuestStatus> {
        let session = self.session.as_ref()?;
        let resolver = &session.resolver;
        Some(QuestStatus {
            quest_id: session.quest.id().to_string(),
            quest_name: session.quest.name().to_string(),
            progress: resolver.progress_percent(),
            step_number: resolver.current_step_number(),
            total_steps: resolver.total_steps(),
            counter: resolver.last_observed(),
            step: resolver.current_step().map(|step| step.text().to_string()),
            task_state: session.active_task.as_ref().map(|task| task.borrow().state()),
            waiting_for_confirmation: session.waiting_for_confirmation,
            attempts: session.attempts,
        })
    }

    /// Advance the quest by one tick.
    #[instrument(skip_all, fields(tick = ctx.tick))]
    pub fn poll(&mut self, ctx: &TaskContext<'_>, executor: &mut TaskExecutor) -> PollOutcome {
        if self.session.is_none() {
            return PollOutcome::Idle;
        }

        let epoch = ctx.env.session_epoch();
        if self.last_epoch != Some(epoch) {
            info!(previous = ?self.last_epoch, epoch, "environment session changed, refreshing");
            self.last_epoch = Some(epoch);
            self.force_refresh(ctx);
        }

        let Some(session) = self.session.as_mut() else {
            return PollOutcome::Idle;
        };

        let counter = session.read_counter(ctx);
        let changed = session.resolver.update(counter);

        if session.resolver.is_completed() {
            info!(quest = session.quest.name(), counter, "quest complete");
            self.finish(StopReason::Completed);
            return PollOutcome::QuestCompleted;
        }

        let (Some(threshold), Some(step)) = (
            session.resolver.current_threshold(),
            session.resolver.current_step().cloned(),
        ) else {
            debug!(counter, "no step for counter value");
            return PollOutcome::NoStep;
        };

        if changed {
            debug!(step = step.text(), threshold, "step changed, resetting tracking");
            session.clear_tracking();
            session.attempts = 0;
        }

        if let Some(task) = session.active_task.clone() {
            let (state, description) = {
                let task = task.borrow();
                (task.state(), task.description().to_string())
            };
            match state {
                TaskState::Completed => {
                    debug!(step = step.text(), "step task completed, waiting for counter");
                    session.active_task = None;
                    session.waiting_for_confirmation = true;
                    session.attempts = 0;
                    return PollOutcome::AwaitingConfirmation;
                }
                TaskState::Failed | TaskState::Cancelled => {
                    session.active_task = None;
                    session.attempts += 1;
                    let attempts = session.attempts;
                    let reason = task
                        .borrow()
                        .failure()
                        .map_or_else(|| state.to_string(), ToString::to_string);
                    warn!(step = step.text(), task = %description, %reason, attempts, "step task failed, will retry");
                    if self.max_step_attempts.is_some_and(|max| attempts >= max) {
                        let reason = StopReason::RetryBudgetExhausted {
                            threshold,
                            attempts,
                        };
                        warn!(%reason, "retry budget exhausted, stopping quest");
                        self.finish(reason.clone());
                        return PollOutcome::GaveUp(reason);
                    }
                    return PollOutcome::StepFailed { attempts };
                }
                TaskState::Pending | TaskState::Running => return PollOutcome::InProgress,
            }
        }

        if session.waiting_for_confirmation && session.last_executed_step == Some(threshold) {
            if step.is_complete(ctx) {
                debug!(step = step.text(), "step completion condition met");
                session.waiting_for_confirmation = false;
            }
            return PollOutcome::AwaitingConfirmation;
        }

        if !step.conditions_met(ctx) {
            debug!(step = step.text(), "step conditions not met");
            return PollOutcome::Deferred;
        }
        if step.requires_idle() && !ctx.env.is_idle() {
            debug!(step = step.text(), "waiting for player to be idle");
            return PollOutcome::Deferred;
        }

        let Some(composite) = self.build_step_task(step.as_ref(), ctx) else {
            warn!(step = step.text(), "step produced no tasks");
            if let Some(session) = self.session.as_mut() {
                session.waiting_for_confirmation = true;
                session.last_executed_step = Some(threshold);
            }
            return PollOutcome::AwaitingConfirmation;
        };

        let task = shared(composite);
        if let Err(err) = executor.queue_task(Rc::clone(&task)) {
            warn!(step = step.text(), err = %err, "could not queue step task");
            return PollOutcome::Deferred;
        }
        if let Some(session) = self.session.as_mut() {
            session.active_task = Some(task);
            session.last_executed_step = Some(threshold);
            session.waiting_for_confirmation = false;
        }
        PollOutcome::Submitted { threshold }
    }

    /// Build the task for one attempt at `step`, prefixed with navigation
    /// when the player is too far from the step's location.
    fn build_step_task(&self, step: &dyn Step, ctx: &TaskContext<'_>) -> Option<CompositeTask> {
        info!(step = step.text(), "executing step");
        let step_tasks = step.to_tasks(ctx);
        if step_tasks.is_empty() {
            return None;
        }

        let mut tasks: Vec<Box<dyn Task>> = Vec::with_capacity(step_tasks.len() + 1);
        if let (Some(target), Some(position)) = (step.target_location(), ctx.env.player_position()) {
            let distance = position.distance_to(&target);
            if distance > self.proximity_threshold {
                info!(%target, %position, distance, "far from step location, walking first");
                tasks.push((self.navigation)(target, step.text()));
            } else {
                debug!(%target, distance, "within reach of step location");
            }
        }
        tasks.extend(step_tasks);

        let mut composite =
            CompositeTask::sequential(tasks).with_description(format!("Step: {}", step.text()));
        if let Some(timeout) = self.task_timeout {
            composite = composite.with_timeout(timeout);
        }
        if let Some(ticks) = self.inactivity_limit {
            composite = composite.with_inactivity_limit(ticks);
        }
        Some(composite)
    }

    fn finish(&mut self, reason: StopReason) {
        if let Some(mut session) = self.session.take() {
            session.clear_tracking();
            info!(quest = session.quest.id(), %reason, "quest session closed");
        }
        self.last_stop = Some(reason);
    }
}
