//! In-memory world used by the `demo` command and by tests.
//!
//! [`SimWorld`] implements [`Environment`] with deterministic, tick-paced
//! behavior: walks advance a fixed number of tiles per tick, injected actions
//! resolve after a configurable latency, and scripted rules react to inputs.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::debug;

use crate::core::types::{ProgressCounter, Tile};
use crate::io::environment::{
    ActionCompleter, ActionHandle, ActionResult, Environment, Input, action_channel,
};

/// Mutable world state visible to input rules.
#[derive(Debug, Clone)]
pub struct WorldState {
    pub position: Option<Tile>,
    pub idle: bool,
    pub counters: HashMap<ProgressCounter, i64>,
    pub epoch: u64,
    walk_target: Option<Tile>,
}

impl WorldState {
    pub fn counter(&self, counter: ProgressCounter) -> i64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    pub fn set_counter(&mut self, counter: ProgressCounter, value: i64) {
        self.counters.insert(counter, value);
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            position: Some(Tile::new(0, 0, 0)),
            idle: true,
            counters: HashMap::new(),
            epoch: 1,
            walk_target: None,
        }
    }
}

type Rule = Box<dyn FnMut(&Input, &mut WorldState) -> ActionResult>;

struct InFlight {
    remaining_ticks: u32,
    completer: ActionCompleter,
    result: ActionResult,
}

struct Inner {
    state: WorldState,
    walk_speed: u32,
    latency_ticks: u32,
    inputs: Vec<Input>,
    in_flight: Vec<InFlight>,
}

pub struct SimWorld {
    inner: RefCell<Inner>,
    rules: RefCell<Vec<Rule>>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Inner {
                state: WorldState::default(),
                walk_speed: 2,
                latency_ticks: 0,
                inputs: Vec::new(),
                in_flight: Vec::new(),
            }),
            rules: RefCell::new(Vec::new()),
        }
    }
}

impl SimWorld {
    /// Register a rule run against every injected input. The first `Err`
    /// returned by any rule becomes the action's result.
    pub fn on_input(&self, rule: impl FnMut(&Input, &mut WorldState) -> ActionResult + 'static) {
        self.rules.borrow_mut().push(Box::new(rule));
    }

    /// Advance the world by one tick: move walking players and deliver
    /// actions whose latency has elapsed.
    pub fn advance(&self) {
        let mut inner = self.inner.borrow_mut();
        let speed = inner.walk_speed;
        let state = &mut inner.state;
        if let (Some(target), Some(position)) = (state.walk_target, state.position) {
            let next = position.step_toward(&target, speed);
            if next == position || next == target {
                state.walk_target = None;
                state.idle = true;
            }
            state.position = Some(next);
        }

        let mut still_waiting = Vec::new();
        for mut action in inner.in_flight.drain(..) {
            action.remaining_ticks = action.remaining_ticks.saturating_sub(1);
            if action.remaining_ticks == 0 {
                action.completer.complete(action.result);
            } else {
                still_waiting.push(action);
            }
        }
        inner.in_flight = still_waiting;
    }

    /// Simulate a re-login: new session epoch, walk stopped, in-flight
    /// actions dropped without result.
    pub fn relog(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.state.epoch += 1;
        inner.state.walk_target = None;
        inner.state.idle = true;
        inner.in_flight.clear();
        debug!(epoch = inner.state.epoch, "simulated re-login");
    }

    /// Drop every in-flight action without delivering a result.
    pub fn drop_pending(&self) {
        self.inner.borrow_mut().in_flight.clear();
    }

    /// In-flight actions whose owning task has stopped listening.
    pub fn abandoned_actions(&self) -> usize {
        self.inner
            .borrow()
            .in_flight
            .iter()
            .filter(|action| action.completer.is_abandoned())
            .count()
    }

    pub fn set_position(&self, tile: Tile) {
        self.inner.borrow_mut().state.position = Some(tile);
    }

    pub fn position(&self) -> Option<Tile> {
        self.inner.borrow().state.position
    }

    pub fn set_idle(&self, idle: bool) {
        self.inner.borrow_mut().state.idle = idle;
    }

    pub fn set_counter(&self, counter: ProgressCounter, value: i64) {
        self.inner.borrow_mut().state.set_counter(counter, value);
    }

    /// Tiles moved per tick while walking. Zero means walks never progress.
    pub fn set_walk_speed(&self, tiles_per_tick: u32) {
        self.inner.borrow_mut().walk_speed = tiles_per_tick;
    }

    /// Ticks before an injected action resolves. Zero resolves immediately.
    pub fn set_latency(&self, ticks: u32) {
        self.inner.borrow_mut().latency_ticks = ticks;
    }

    /// Every input injected so far, oldest first.
    pub fn inputs(&self) -> Vec<Input> {
        self.inner.borrow().inputs.clone()
    }
}

impl Environment for SimWorld {
    fn player_position(&self) -> Option<Tile> {
        self.inner.borrow().state.position
    }

    fn is_idle(&self) -> bool {
        self.inner.borrow().state.idle
    }

    fn read_counter(&self, counter: ProgressCounter) -> i64 {
        self.inner.borrow().state.counter(counter)
    }

    fn session_epoch(&self) -> u64 {
        self.inner.borrow().state.epoch
    }

    fn inject(&self, input: Input) -> ActionHandle {
        let mut inner = self.inner.borrow_mut();
        inner.inputs.push(input.clone());
        if let Input::WalkTo(target) = input {
            inner.state.walk_target = Some(target);
            inner.state.idle = false;
        }

        let mut result = Ok(());
        for rule in self.rules.borrow_mut().iter_mut() {
            let outcome = rule(&input, &mut inner.state);
            if result.is_ok() {
                result = outcome;
            }
        }
        debug!(%input, ok = result.is_ok(), latency = inner.latency_ticks, "input injected");

        if inner.latency_ticks == 0 {
            return ActionHandle::resolved(result);
        }
        let (completer, handle) = action_channel();
        let remaining_ticks = inner.latency_ticks;
        inner.in_flight.push(InFlight {
            remaining_ticks,
            completer,
            result,
        });
        handle
    }
}
