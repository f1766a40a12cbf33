//! Walk the player toward a tile until within an arrival radius.

use tracing::{debug, info};

use crate::core::types::{TaskFailure, TaskState, Tile};
use crate::io::environment::{ActionPoll, Input, PendingAction};

use super::{Lifecycle, Task, TaskContext};

pub const DEFAULT_ARRIVAL_RADIUS: u32 = 2;
pub const DEFAULT_MAX_WALK_ATTEMPTS: u32 = 10;

/// Issues `WalkTo` inputs until the player stands within `arrival_radius`
/// tiles of `target`.
///
/// A new walk is only requested when no walk is outstanding and the player is
/// idle, so the task emits at most one input per tick.
pub struct NavigateTask {
    lifecycle: Lifecycle,
    target: Tile,
    arrival_radius: u32,
    max_walk_attempts: u32,
    walk_attempts: u32,
    pending: PendingAction,
    last_position: Option<Tile>,
}

impl NavigateTask {
    pub fn new(target: Tile) -> Self {
        Self {
            lifecycle: Lifecycle::new(format!("Walk to {target}")),
            target,
            arrival_radius: DEFAULT_ARRIVAL_RADIUS,
            max_walk_attempts: DEFAULT_MAX_WALK_ATTEMPTS,
            walk_attempts: 0,
            pending: PendingAction::new(),
            last_position: None,
        }
    }

    pub fn with_arrival_radius(mut self, radius: u32) -> Self {
        self.arrival_radius = radius;
        self
    }

    pub fn with_max_walk_attempts(mut self, attempts: u32) -> Self {
        self.max_walk_attempts = attempts.max(1);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.lifecycle.set_description(description);
        self
    }

    pub fn target(&self) -> Tile {
        self.target
    }

    pub fn walk_attempts(&self) -> u32 {
        self.walk_attempts
    }

    fn arrived(&self, position: Tile) -> bool {
        position.distance_to(&self.target) <= self.arrival_radius
    }
}

impl Task for NavigateTask {
    fn can_execute(&self, ctx: &TaskContext<'_>) -> bool {
        ctx.env.player_position().is_some()
    }

    fn execute(&mut self, ctx: &TaskContext<'_>) {
        if !self.lifecycle.begin_tick(ctx.now) {
            self.pending.abandon();
            return;
        }

        let Some(position) = ctx.env.player_position() else {
            debug!(target = %self.target, "player position unavailable, waiting");
            return;
        };
        if self.last_position.replace(position) != Some(position) {
            self.lifecycle.record_progress();
        }
        if self.arrived(position) {
            self.pending.abandon();
            info!(target = %self.target, %position, attempts = self.walk_attempts, "arrived");
            self.lifecycle.complete();
            return;
        }

        match self.pending.poll() {
            ActionPoll::Outstanding => return,
            ActionPoll::Resolved(Err(reason)) => {
                self.lifecycle.fail(TaskFailure::Domain(reason));
                return;
            }
            ActionPoll::Interrupted => {
                self.lifecycle
                    .fail(TaskFailure::Interrupted(format!("walk to {} dropped", self.target)));
                return;
            }
            ActionPoll::Resolved(Ok(())) | ActionPoll::Idle => {}
        }

        if !ctx.env.is_idle() {
            return;
        }
        if self.walk_attempts >= self.max_walk_attempts {
            self.lifecycle.fail(TaskFailure::Domain(format!(
                "could not reach {} after {} walk attempts (stuck at {position})",
                self.target, self.walk_attempts
            )));
            return;
        }

        self.walk_attempts += 1;
        debug!(
            target = %self.target,
            %position,
            distance = position.distance_to(&self.target),
            attempt = self.walk_attempts,
            "requesting walk"
        );
        let handle = ctx.env.inject(Input::WalkTo(self.target));
        self.pending.launch(handle);
        self.lifecycle.record_progress();
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
