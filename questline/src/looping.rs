//! Tick loop driving an orchestrator and executor against an environment.

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, info};

use crate::executor::{TaskExecutor, TickReport};
use crate::io::environment::Environment;
use crate::orchestrator::{Orchestrator, PollOutcome, StopReason};
use crate::task::TaskContext;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopStop {
    /// The quest's progress counter reached completion.
    QuestComplete,
    /// The orchestrator stopped the quest for another reason.
    Stopped { reason: StopReason },
    /// The tick limit was reached with the quest still running.
    MaxTicks { max_ticks: u64 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopOutcome {
    pub ticks: u64,
    pub steps_submitted: u32,
    pub step_failures: u32,
    pub stop: LoopStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_ticks: u64,
    /// Simulated time between ticks; the loop does not sleep.
    pub tick_interval: Duration,
}

/// Drive `orchestrator` and `executor` until the quest stops or `max_ticks`
/// ticks have run.
///
/// Each tick calls `advance_world` first, then polls the orchestrator and
/// ticks the executor with the same context. `on_tick` observes both
/// decisions.
pub fn run_loop<A, F>(
    env: &dyn Environment,
    orchestrator: &mut Orchestrator,
    executor: &mut TaskExecutor,
    config: &LoopConfig,
    mut advance_world: A,
    mut on_tick: F,
) -> Result<LoopOutcome>
where
    A: FnMut(),
    F: FnMut(u64, &PollOutcome, &TickReport),
{
    if !orchestrator.is_running() {
        bail!("no quest running (call start_quest first)");
    }
    executor.start();
    let clock = Instant::now();
    let mut now = clock;
    let mut steps_submitted = 0u32;
    let mut step_failures = 0u32;

    for tick in 1..=config.max_ticks {
        advance_world();
        now += config.tick_interval;
        let ctx = TaskContext::new(env, now, tick);
        let outcome = orchestrator.poll(&ctx, executor);
        let report = executor.tick(&ctx);
        match &outcome {
            PollOutcome::Submitted { .. } => steps_submitted += 1,
            PollOutcome::StepFailed { .. } | PollOutcome::GaveUp(_) => step_failures += 1,
            _ => {}
        }
        debug!(?outcome, ?report, "tick");
        on_tick(tick, &outcome, &report);

        if !orchestrator.is_running() {
            let stop = match orchestrator.last_stop() {
                Some(StopReason::Completed) | None => LoopStop::QuestComplete,
                Some(reason) => LoopStop::Stopped {
                    reason: reason.clone(),
                },
            };
            info!(tick, ?stop, "loop finished");
            return Ok(LoopOutcome {
                ticks: tick,
                steps_submitted,
                step_failures,
                stop,
            });
        }
    }

    info!(max_ticks = config.max_ticks, "tick limit reached");
    Ok(LoopOutcome {
        ticks: config.max_ticks,
        steps_submitted,
        step_failures,
        stop: LoopStop::MaxTicks {
            max_ticks: config.max_ticks,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::core::types::ProgressCounter;
    use crate::io::config::EngineConfig;
    use crate::io::environment::Input;
    use crate::io::sim::SimWorld;
    use crate::quest::{BasicStep, QuestDefinition};
    use crate::test_support::ScriptedTask;

    const COUNTER: ProgressCounter = ProgressCounter::varp(29);

    fn loop_config(max_ticks: u64) -> LoopConfig {
        LoopConfig {
            max_ticks,
            tick_interval: Duration::from_millis(600),
        }
    }

    #[test]
    fn loop_stops_on_quest_completion() {
        let world = SimWorld::default();
        world.on_input(|input, state| {
            if matches!(input, Input::Key('y')) {
                state.set_counter(COUNTER, 1);
            }
            Ok(())
        });
        let quest = QuestDefinition::new("q", "Quest", COUNTER, 1)
            .step(0, BasicStep::new("Accept").input(Input::Key('y')));
        let mut orchestrator = Orchestrator::default();
        let mut executor = TaskExecutor::default();
        orchestrator
            .start_quest(Rc::new(quest), &TaskContext::new(&world, Instant::now(), 0))
            .expect("start");

        let outcome = run_loop(
            &world,
            &mut orchestrator,
            &mut executor,
            &loop_config(50),
            || world.advance(),
            |_, _, _| {},
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::QuestComplete);
        assert_eq!(outcome.steps_submitted, 1);
        assert!(outcome.ticks < 50);
    }

    #[test]
    fn loop_stops_at_tick_limit() {
        let world = SimWorld::default();
        let quest = QuestDefinition::new("q", "Quest", COUNTER, 1).step(
            0,
            BasicStep::new("Wait forever")
                .tasks(|_| vec![Box::new(ScriptedTask::runs_forever("wait"))]),
        );
        let mut orchestrator = Orchestrator::default();
        let mut executor = TaskExecutor::default();
        orchestrator
            .start_quest(Rc::new(quest), &TaskContext::new(&world, Instant::now(), 0))
            .expect("start");

        let mut seen = 0;
        let outcome = run_loop(
            &world,
            &mut orchestrator,
            &mut executor,
            &loop_config(5),
            || {},
            |_, _, _| seen += 1,
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::MaxTicks { max_ticks: 5 });
        assert_eq!(seen, 5);
        assert!(orchestrator.is_running());
    }

    #[test]
    fn loop_reports_exhausted_retry_budget() {
        let world = SimWorld::default();
        let quest = QuestDefinition::new("q", "Quest", COUNTER, 1).step(
            0,
            BasicStep::new("Broken")
                .tasks(|_| vec![Box::new(ScriptedTask::fails_after("broken", 1, "X"))]),
        );
        let config = EngineConfig {
            max_step_attempts: Some(3),
            ..EngineConfig::default()
        };
        let mut orchestrator = Orchestrator::new(&config);
        let mut executor = TaskExecutor::default();
        orchestrator
            .start_quest(Rc::new(quest), &TaskContext::new(&world, Instant::now(), 0))
            .expect("start");

        let outcome = run_loop(
            &world,
            &mut orchestrator,
            &mut executor,
            &loop_config(100),
            || {},
            |_, _, _| {},
        )
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Stopped {
                reason: StopReason::RetryBudgetExhausted {
                    threshold: 0,
                    attempts: 3
                }
            }
        );
        assert_eq!(outcome.step_failures, 3);
    }

    #[test]
    fn loop_requires_running_quest() {
        let world = SimWorld::default();
        let err = run_loop(
            &world,
            &mut Orchestrator::default(),
            &mut TaskExecutor::default(),
            &loop_config(1),
            || {},
            |_, _, _| {},
        )
        .expect_err("no quest");
        assert!(err.to_string().contains("no quest running"));
    }
}
