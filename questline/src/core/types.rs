//! Shared deterministic types for the task engine and quest resolver.
//!
//! These types define stable contracts between core components. They do not
//! depend on the environment and behave identically across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// Transitions are forward-only: `Pending -> Running -> {Completed, Failed,
/// Cancelled}`. A pending task may also fail or be cancelled without ever
/// running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// True for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: TaskState) -> bool {
        match self {
            Self::Pending => matches!(to, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => matches!(to, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Why a task stopped without reaching its goal.
///
/// The `Display` output is the human-readable failure reason reported in
/// logs and status summaries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    /// The configured timeout elapsed since the first `execute`.
    #[error("timeout")]
    Timeout,
    /// No progress was recorded for `ticks` ticks.
    #[error("stalled: no progress for {ticks} ticks")]
    Stalled { ticks: u32 },
    /// An in-flight action was abandoned before delivering a result.
    #[error("interrupted: {0}")]
    Interrupted(String),
    /// A child of a composite task failed.
    #[error("child task failed: {description} ({reason})")]
    ChildFailed { description: String, reason: String },
    /// Leaf-specific unrecoverable error.
    #[error("{0}")]
    Domain(String),
    /// The executor dropped the task because its precondition was unmet.
    #[error("precondition not met")]
    PreconditionNotMet,
    /// The task was cancelled by its owner.
    #[error("aborted")]
    Aborted,
    /// A branch that should be unreachable was hit.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// A position in the world: `x`, `y` and a `plane` (floor level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    pub plane: i32,
}

impl Tile {
    pub const fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }

    /// Chebyshev distance in tiles; tiles on different planes are `u32::MAX` apart.
    pub fn distance_to(&self, other: &Tile) -> u32 {
        if self.plane != other.plane {
            return u32::MAX;
        }
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        dx.max(dy)
    }

    /// Move at most `max_step` tiles along each axis toward `target`.
    pub fn step_toward(&self, target: &Tile, max_step: u32) -> Tile {
        let step = i32::try_from(max_step).unwrap_or(i32::MAX);
        let advance = |from: i32, to: i32| from + (to - from).clamp(-step, step);
        Tile {
            x: advance(self.x, target.x),
            y: advance(self.y, target.y),
            plane: target.plane,
        }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.plane)
    }
}

/// Storage class of a quest progress counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// Bit-packed variable; most quests track progress here.
    Varbit,
    /// Whole player variable.
    Varp,
}

/// Identifies the environment counter a quest reports progress through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressCounter {
    pub kind: CounterKind,
    pub id: u32,
}

impl ProgressCounter {
    pub const fn varbit(id: u32) -> Self {
        Self {
            kind: CounterKind::Varbit,
            id,
        }
    }

    pub const fn varp(id: u32) -> Self {
        Self {
            kind: CounterKind::Varp,
            id,
        }
    }
}

impl fmt::Display for ProgressCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CounterKind::Varbit => write!(f, "varbit {}", self.id),
            CounterKind::Varp => write!(f, "varp {}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_transition() {
        for from in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            for to in [
                TaskState::Pending,
                TaskState::Running,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn running_cannot_return_to_pending() {
        assert!(!TaskState::Running.can_transition_to(TaskState::Pending));
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
    }

    #[test]
    fn distance_is_chebyshev_and_plane_aware() {
        let a = Tile::new(0, 0, 0);
        assert_eq!(a.distance_to(&Tile::new(3, -7, 0)), 7);
        assert_eq!(a.distance_to(&Tile::new(0, 0, 1)), u32::MAX);
    }

    #[test]
    fn step_toward_clamps_per_axis() {
        let from = Tile::new(0, 0, 0);
        let next = from.step_toward(&Tile::new(10, -1, 0), 2);
        assert_eq!(next, Tile::new(2, -1, 0));
    }

    #[test]
    fn timeout_failure_reason_is_plain() {
        assert_eq!(TaskFailure::Timeout.to_string(), "timeout");
    }
}
