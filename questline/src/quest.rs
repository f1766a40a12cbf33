//! Quest and step contracts consumed by the orchestrator, plus builder-backed
//! implementations for quests defined in code.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::core::types::{ProgressCounter, Tile};
use crate::io::environment::Input;
use crate::task::action::ActionTask;
use crate::task::{Predicate, Task, TaskContext};

/// A unit of quest logic bound to one progress-counter threshold.
pub trait Step {
    /// Human readable instruction, e.g. "Talk to the Cook".
    fn text(&self) -> &str;

    /// Where the step takes place, if anywhere in particular.
    fn target_location(&self) -> Option<Tile> {
        None
    }

    /// Fast local check that the step's goal is already reached. The counter
    /// remains the authoritative completion signal.
    fn is_complete(&self, _ctx: &TaskContext<'_>) -> bool {
        false
    }

    /// Whether the step can be attempted right now.
    fn conditions_met(&self, _ctx: &TaskContext<'_>) -> bool {
        true
    }

    fn requires_idle(&self) -> bool {
        false
    }

    /// Build fresh tasks for one attempt at this step.
    fn to_tasks(&self, ctx: &TaskContext<'_>) -> Vec<Box<dyn Task>>;
}

/// A quest whose progress is reported through a single counter.
pub trait Quest {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn progress_counter(&self) -> ProgressCounter;

    fn completion_threshold(&self) -> i64;

    fn is_complete(&self, counter: i64) -> bool {
        counter >= self.completion_threshold()
    }

    /// Sparse `threshold -> step` table.
    fn steps(&self) -> BTreeMap<i64, Rc<dyn Step>>;
}

type TaskFactory = Box<dyn Fn(&TaskContext<'_>) -> Vec<Box<dyn Task>>>;

/// Step assembled from closures and inputs.
///
/// Each call to [`Step::to_tasks`] yields one [`ActionTask`] per configured
/// input, followed by whatever the optional factory produces.
pub struct BasicStep {
    text: String,
    target: Option<Tile>,
    requires_idle: bool,
    inputs: Vec<Input>,
    factory: Option<TaskFactory>,
    completion: Option<Predicate>,
    precondition: Option<Predicate>,
}

impl BasicStep {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target: None,
            requires_idle: false,
            inputs: Vec::new(),
            factory: None,
            completion: None,
            precondition: None,
        }
    }

    pub fn at(mut self, tile: Tile) -> Self {
        self.target = Some(tile);
        self
    }

    pub fn requiring_idle(mut self) -> Self {
        self.requires_idle = true;
        self
    }

    pub fn input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn tasks(
        mut self,
        factory: impl Fn(&TaskContext<'_>) -> Vec<Box<dyn Task>> + 'static,
    ) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn complete_when(mut self, check: impl Fn(&TaskContext<'_>) -> bool + 'static) -> Self {
        self.completion = Some(Box::new(check));
        self
    }

    pub fn only_when(mut self, check: impl Fn(&TaskContext<'_>) -> bool + 'static) -> Self {
        self.precondition = Some(Box::new(check));
        self
    }
}

impl Step for BasicStep {
    fn text(&self) -> &str {
        &self.text
    }

    fn target_location(&self) -> Option<Tile> {
        self.target
    }

    fn is_complete(&self, ctx: &TaskContext<'_>) -> bool {
        self.completion.as_ref().is_some_and(|check| check(ctx))
    }

    fn conditions_met(&self, ctx: &TaskContext<'_>) -> bool {
        self.precondition.as_ref().is_none_or(|check| check(ctx))
    }

    fn requires_idle(&self) -> bool {
        self.requires_idle
    }

    fn to_tasks(&self, ctx: &TaskContext<'_>) -> Vec<Box<dyn Task>> {
        let mut tasks: Vec<Box<dyn Task>> = self
            .inputs
            .iter()
            .map(|input| Box::new(ActionTask::new(input.clone())) as Box<dyn Task>)
            .collect();
        if let Some(factory) = &self.factory {
            tasks.extend(factory(ctx));
        }
        tasks
    }
}

impl fmt::Debug for BasicStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicStep")
            .field("text", &self.text)
            .field("target", &self.target)
            .field("requires_idle", &self.requires_idle)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// Quest defined in code through a builder.
pub struct QuestDefinition {
    id: String,
    name: String,
    counter: ProgressCounter,
    completion_threshold: i64,
    completion: Option<Box<dyn Fn(i64) -> bool>>,
    steps: BTreeMap<i64, Rc<dyn Step>>,
}

impl QuestDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        counter: ProgressCounter,
        completion_threshold: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            counter,
            completion_threshold,
            completion: None,
            steps: BTreeMap::new(),
        }
    }

    /// Bind `step` to `threshold`, replacing any step already bound there.
    pub fn step(mut self, threshold: i64, step: impl Step + 'static) -> Self {
        self.steps.insert(threshold, Rc::new(step));
        self
    }

    /// Replace the default `counter >= completion_threshold` check.
    pub fn completed_when(mut self, check: impl Fn(i64) -> bool + 'static) -> Self {
        self.completion = Some(Box::new(check));
        self
    }
}

impl Quest for QuestDefinition {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progress_counter(&self) -> ProgressCounter {
        self.counter
    }

    fn completion_threshold(&self) -> i64 {
        self.completion_threshold
    }

    fn is_complete(&self, counter: i64) -> bool {
        match &self.completion {
            Some(check) => check(counter),
            None => counter >= self.completion_threshold,
        }
    }

    fn steps(&self) -> BTreeMap<i64, Rc<dyn Step>> {
        self.steps.clone()
    }
}
