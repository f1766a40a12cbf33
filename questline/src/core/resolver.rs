//! Progress-counter to step resolution.
//!
//! A quest reports progress through a single integer counter whose values are
//! sparse: only some values have a step bound to them. [`StepResolver`] keeps
//! the `threshold -> step` table and maps each observed counter to the step
//! bound to the greatest threshold not above it.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{info, warn};

/// Counter value meaning "nothing observed yet".
pub const UNSET: i64 = -1;

type CompletionCheck = Box<dyn Fn(i64) -> bool>;

/// Floor lookup over a sparse, sorted step table.
///
/// Steps are identified by the threshold they are bound to.
pub struct StepResolver<S: ?Sized> {
    quest: String,
    steps: BTreeMap<i64, Rc<S>>,
    completion_threshold: i64,
    is_complete: CompletionCheck,
    last_observed: i64,
    current: Option<i64>,
    completed: bool,
}

impl<S: ?Sized> StepResolver<S> {
    /// Resolver whose quest completes once the counter reaches `completion_threshold`.
    pub fn new(quest: impl Into<String>, steps: BTreeMap<i64, Rc<S>>, completion_threshold: i64) -> Self {
        Self {
            quest: quest.into(),
            steps,
            completion_threshold,
            is_complete: Box::new(move |counter| counter >= completion_threshold),
            last_observed: UNSET,
            current: None,
            completed: false,
        }
    }

    /// Replace the default `counter >= completion_threshold` check.
    pub fn with_completion(mut self, is_complete: impl Fn(i64) -> bool + 'static) -> Self {
        self.is_complete = Box::new(is_complete);
        self
    }

    /// Observe a counter value. Returns true when the resolved step or the
    /// completion status changed.
    pub fn update(&mut self, counter: i64) -> bool {
        if counter == self.last_observed && self.current.is_some() {
            return false;
        }

        let previous = self.last_observed;
        if previous != UNSET && counter < previous {
            warn!(quest = %self.quest, previous, counter, "progress counter regressed");
        }
        self.last_observed = counter;

        if self.completed {
            return false;
        }
        if (self.is_complete)(counter) {
            self.completed = true;
            self.current = None;
            info!(quest = %self.quest, previous, counter, "quest completed");
            return true;
        }

        let resolved = self.floor_threshold(counter);
        if resolved == self.current {
            return false;
        }
        self.current = resolved;
        match resolved {
            Some(threshold) => info!(
                quest = %self.quest,
                previous,
                counter,
                threshold,
                "step changed"
            ),
            None => warn!(quest = %self.quest, counter, "no step defined for counter value"),
        }
        true
    }

    /// Forget everything observed and re-resolve from `counter`.
    ///
    /// Always re-derive actions after calling this; a `false` return does not
    /// mean the caller's view is still valid.
    pub fn force_refresh(&mut self, counter: i64) -> bool {
        let previous = self.last_observed;
        self.reset();
        let changed = self.update(counter);
        info!(quest = %self.quest, previous, counter, changed, "forced progress refresh");
        changed
    }

    pub fn reset(&mut self) {
        self.last_observed = UNSET;
        self.current = None;
        self.completed = false;
    }

    fn floor_threshold(&self, counter: i64) -> Option<i64> {
        self.steps
            .range(..=counter)
            .next_back()
            .map(|(threshold, _)| *threshold)
    }

    pub fn quest(&self) -> &str {
        &self.quest
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn last_observed(&self) -> i64 {
        self.last_observed
    }

    /// Threshold of the current step, which is also its identity.
    pub fn current_threshold(&self) -> Option<i64> {
        self.current
    }

    pub fn current_step(&self) -> Option<&Rc<S>> {
        self.current.and_then(|threshold| self.steps.get(&threshold))
    }

    /// Step bound to exactly `threshold`, without floor lookup.
    pub fn step_exact(&self, threshold: i64) -> Option<&Rc<S>> {
        self.steps.get(&threshold)
    }

    pub fn steps(&self) -> &BTreeMap<i64, Rc<S>> {
        &self.steps
    }

    /// First step above the last observed counter (the first step if nothing
    /// was observed yet).
    pub fn next_step(&self) -> Option<&Rc<S>> {
        if self.last_observed == UNSET {
            return self.steps.values().next();
        }
        self.steps
            .range(self.last_observed.saturating_add(1)..)
            .next()
            .map(|(_, step)| step)
    }

    /// Last step strictly below the last observed counter.
    pub fn previous_step(&self) -> Option<&Rc<S>> {
        if self.last_observed == UNSET {
            return None;
        }
        self.steps
            .range(..self.last_observed)
            .next_back()
            .map(|(_, step)| step)
    }

    /// Progress in `[0, 1]`, measured against the completion threshold.
    pub fn progress_percent(&self) -> f64 {
        if self.completed {
            return 1.0;
        }
        if self.last_observed == UNSET || self.steps.is_empty() || self.completion_threshold <= 0 {
            return 0.0;
        }
        (self.last_observed as f64 / self.completion_threshold as f64).min(1.0)
    }

    /// One-based position of the current step in the table, 0 when none.
    pub fn current_step_number(&self) -> usize {
        let Some(current) = self.current else {
            return 0;
        };
        self.steps
            .keys()
            .position(|threshold| *threshold == current)
            .map_or(0, |index| index + 1)
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }
}

impl<S: ?Sized> fmt::Display for StepResolver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [counter={}, step={}/{}, {:.0}%]",
            self.quest,
            self.last_observed,
            self.current_step_number(),
            self.total_steps(),
            self.progress_percent() * 100.0
        )
    }
}

impl<S: ?Sized> fmt::Debug for StepResolver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepResolver")
            .field("quest", &self.quest)
            .field("thresholds", &self.steps.keys().collect::<Vec<_>>())
            .field("last_observed", &self.last_observed)
            .field("current", &self.current)
            .field("completed", &self.completed)
            .finish()
    }
}
