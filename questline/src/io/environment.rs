//! Environment abstraction for the tick-paced world being automated.
//!
//! The [`Environment`] trait decouples the engine from the actual game client.
//! Reads are snapshots taken on the tick thread. Input injection is
//! asynchronous: [`Environment::inject`] returns an [`ActionHandle`] whose
//! result is delivered from another execution context through a one-shot
//! channel and read by the task on a later tick.

use std::fmt;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::core::types::{ProgressCounter, Tile};

/// Outcome of an injected action: `Err` carries the environment's reason.
pub type ActionResult = Result<(), String>;

/// A single externally observable input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Click a screen point.
    Click { x: i32, y: i32 },
    /// Request a walk toward a world tile.
    WalkTo(Tile),
    /// Press a key.
    Key(char),
    /// Choose a named menu option on a target (e.g. `"Talk-to"` on `"Guide"`).
    MenuOption { option: String, target: String },
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Click { x, y } => write!(f, "click ({x}, {y})"),
            Input::WalkTo(tile) => write!(f, "walk to {tile}"),
            Input::Key(key) => write!(f, "key '{key}'"),
            Input::MenuOption { option, target } => write!(f, "{option} {target}"),
        }
    }
}

/// Read-only snapshots plus asynchronous input injection.
pub trait Environment {
    /// Current player tile, if the player is loaded.
    fn player_position(&self) -> Option<Tile>;

    /// True when the player is not animating or moving.
    fn is_idle(&self) -> bool;

    /// Current value of a quest progress counter.
    fn read_counter(&self, counter: ProgressCounter) -> i64;

    /// Identifier of the current login session; changes on every re-login.
    fn session_epoch(&self) -> u64;

    /// Start injecting `input`. The result arrives later through the handle.
    fn inject(&self, input: Input) -> ActionHandle;
}

/// Create a connected completer/handle pair for one injected action.
pub fn action_channel() -> (ActionCompleter, ActionHandle) {
    let (tx, rx) = oneshot::channel();
    (ActionCompleter { tx }, ActionHandle { rx })
}

/// Receiving half of an injected action, held by the task that launched it.
#[derive(Debug)]
pub struct ActionHandle {
    rx: oneshot::Receiver<ActionResult>,
}

impl ActionHandle {
    /// A handle that has already resolved with `result`.
    pub fn resolved(result: ActionResult) -> Self {
        let (completer, handle) = action_channel();
        completer.complete(result);
        handle
    }
}

/// Sending half of an injected action, held by the environment callback.
///
/// The callback's only job is to deposit a result; all decisions happen on
/// the next tick in the task that owns the matching handle.
#[derive(Debug)]
pub struct ActionCompleter {
    tx: oneshot::Sender<ActionResult>,
}

impl ActionCompleter {
    /// Deliver `result`. Returns false if the owning task was cancelled or
    /// dropped the handle, in which case the result is discarded.
    pub fn complete(self, result: ActionResult) -> bool {
        self.tx.send(result).is_ok()
    }

    /// True once the receiving task has given up on this action.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Observation of an action slot on a given tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPoll {
    /// No action has been launched (or the last result was consumed).
    Idle,
    /// An action is in flight; the task must not launch another.
    Outstanding,
    /// The action finished with this result.
    Resolved(ActionResult),
    /// The environment dropped the action without delivering a result.
    Interrupted,
}

/// Single-slot holder for at most one outstanding action.
///
/// Tasks embed one of these and consult [`PendingAction::poll`] at the top of
/// every `execute`. Dropping or [`abandon`](PendingAction::abandon)ing the
/// slot closes the channel so late callbacks cannot mutate task state.
#[derive(Debug, Default)]
pub struct PendingAction {
    rx: Option<oneshot::Receiver<ActionResult>>,
}

impl PendingAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_outstanding(&self) -> bool {
        self.rx.is_some()
    }

    /// Track a newly launched action. Returns false (and leaves the previous
    /// action in place) if one is already outstanding.
    pub fn launch(&mut self, handle: ActionHandle) -> bool {
        if self.rx.is_some() {
            return false;
        }
        self.rx = Some(handle.rx);
        true
    }

    /// Consume the result if it has arrived.
    pub fn poll(&mut self) -> ActionPoll {
        let Some(rx) = self.rx.as_mut() else {
            return ActionPoll::Idle;
        };
        match rx.try_recv() {
            Ok(result) => {
                self.rx = None;
                ActionPoll::Resolved(result)
            }
            Err(TryRecvError::Empty) => ActionPoll::Outstanding,
            Err(TryRecvError::Closed) => {
                self.rx = None;
                ActionPoll::Interrupted
            }
        }
    }

    /// Stop waiting for the in-flight action, if any.
    pub fn abandon(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
        }
    }
}
