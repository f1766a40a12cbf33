//! Loop-level tests driving a quest end to end against the simulated world.
//!
//! These tests wire the orchestrator, executor and `SimWorld` together through
//! `run_loop` and check the behavior visible from outside: which inputs were
//! injected, how the counter moved and why the loop stopped.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use questline::core::types::{ProgressCounter, TaskFailure, TaskState, Tile};
use questline::executor::{TaskExecutor, TickReport};
use questline::io::config::EngineConfig;
use questline::io::environment::Input;
use questline::io::sim::SimWorld;
use questline::looping::{LoopConfig, LoopStop, run_loop};
use questline::orchestrator::{Orchestrator, PollOutcome};
use questline::quest::{BasicStep, QuestDefinition};
use questline::task::TaskContext;
use questline::test_support::{ScriptedTask, TempConfig, counting_step};

const COUNTER: ProgressCounter = ProgressCounter::varbit(3185);

fn loop_config(max_ticks: u64) -> LoopConfig {
    LoopConfig {
        max_ticks,
        tick_interval: Duration::from_millis(600),
    }
}

fn start(orchestrator: &mut Orchestrator, world: &SimWorld, quest: QuestDefinition) {
    orchestrator
        .start_quest(Rc::new(quest), &TaskContext::new(world, Instant::now(), 0))
        .expect("start quest");
}

/// Two-step quest with a distant first step.
///
/// Sequence:
/// 1. Step 0 is 20 tiles away: a walk is prepended, then "Open" is clicked.
/// 2. The rule bumps the counter to 5; step 5 presses a key.
/// 3. The rule bumps the counter to 10, which completes the quest.
///
/// Tests: auto-navigation ordering, counter-confirmed advancement, completion.
#[test]
fn quest_completes_through_navigation_and_step_changes() {
    let world = SimWorld::default();
    world.set_position(Tile::new(0, 0, 0));
    world.set_walk_speed(3);
    world.on_input(|input, state| {
        match input {
            Input::MenuOption { option, .. } if option == "Open" => {
                state.set_counter(COUNTER, 5);
            }
            Input::Key('2') => state.set_counter(COUNTER, 10),
            _ => {}
        }
        Ok(())
    });
    let quest = QuestDefinition::new("gate", "Gate Quest", COUNTER, 10)
        .step(
            0,
            BasicStep::new("Open the gate")
                .at(Tile::new(20, 0, 0))
                .input(Input::MenuOption {
                    option: "Open".to_string(),
                    target: "Gate".to_string(),
                }),
        )
        .step(5, BasicStep::new("Confirm").input(Input::Key('2')));

    let mut orchestrator = Orchestrator::default();
    let mut executor = TaskExecutor::default();
    start(&mut orchestrator, &world, quest);

    let outcome = run_loop(
        &world,
        &mut orchestrator,
        &mut executor,
        &loop_config(100),
        || world.advance(),
        |_, _, _| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::QuestComplete);
    assert_eq!(outcome.steps_submitted, 2);
    let inputs = world.inputs();
    assert!(matches!(inputs.first(), Some(Input::WalkTo(tile)) if *tile == Tile::new(20, 0, 0)));
    let open_at = inputs
        .iter()
        .position(|i| matches!(i, Input::MenuOption { .. }))
        .expect("open clicked");
    assert!(inputs[..open_at].iter().all(|i| matches!(i, Input::WalkTo(_))));
    assert_eq!(inputs.last(), Some(&Input::Key('2')));
    assert!(!orchestrator.is_running());
}

/// A step whose task keeps failing is rebuilt from scratch every time and the
/// quest is never stopped while retries are unbounded.
#[test]
fn failing_step_retries_without_stopping_quest() {
    let world = SimWorld::default();
    let calls = Rc::new(Cell::new(0));
    let quest = QuestDefinition::new("flaky", "Flaky", COUNTER, 10).step(
        0,
        counting_step("flaky", calls.clone(), || {
            vec![Box::new(ScriptedTask::fails_after("click", 1, "X"))]
        }),
    );
    let mut orchestrator = Orchestrator::default();
    let mut executor = TaskExecutor::default();
    start(&mut orchestrator, &world, quest);

    let failures = Rc::new(RefCell::new(Vec::new()));
    let sink = failures.clone();
    let outcome = run_loop(
        &world,
        &mut orchestrator,
        &mut executor,
        &loop_config(6),
        || {},
        move |_, poll, _| {
            if let PollOutcome::StepFailed { attempts } = poll {
                sink.borrow_mut().push(*attempts);
            }
        },
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::MaxTicks { max_ticks: 6 });
    // Submitted and StepFailed alternate tick by tick.
    assert_eq!(*failures.borrow(), vec![1, 2, 3]);
    assert_eq!(outcome.step_failures, 3);
    assert_eq!(calls.get(), 3);
    assert!(orchestrator.is_running());
}

/// At most one task is ever non-terminal inside the executor, even while
/// steps change underneath it.
#[test]
fn executor_never_holds_two_live_tasks() {
    let world = SimWorld::default();
    world.on_input(|input, state| {
        if let Input::Key(digit) = input {
            let next = digit.to_digit(10).map_or(0, i64::from) * 10;
            state.set_counter(COUNTER, next);
        }
        Ok(())
    });
    let quest = QuestDefinition::new("keys", "Keys", COUNTER, 30)
        .step(0, BasicStep::new("one").input(Input::Key('1')))
        .step(10, BasicStep::new("two").input(Input::Key('2')))
        .step(20, BasicStep::new("three").input(Input::Key('3')));
    let mut orchestrator = Orchestrator::default();
    let mut executor = TaskExecutor::default();
    start(&mut orchestrator, &world, quest);

    let finished = Rc::new(Cell::new(0));
    let count = finished.clone();
    let outcome = run_loop(
        &world,
        &mut orchestrator,
        &mut executor,
        &loop_config(50),
        || world.advance(),
        move |_, _, report| {
            if let TickReport::Finished(_) = report {
                count.set(count.get() + 1);
            }
        },
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::QuestComplete);
    assert_eq!(world.inputs(), vec![Input::Key('1'), Input::Key('2'), Input::Key('3')]);
    assert!(finished.get() >= 3);
    assert!(executor.current_state().is_none_or(|s| !s.is_terminal()));
}

/// A re-login mid-step drops the in-flight task and rebuilds the step.
#[test]
fn relog_rebuilds_current_step() {
    let world = SimWorld::default();
    let calls = Rc::new(Cell::new(0));
    let quest = QuestDefinition::new("relog", "Relog", COUNTER, 10).step(
        0,
        counting_step("slow", calls.clone(), || {
            vec![Box::new(ScriptedTask::runs_forever("slow"))]
        }),
    );
    let mut orchestrator = Orchestrator::default();
    let mut executor = TaskExecutor::default();
    executor.start();
    start(&mut orchestrator, &world, quest);

    let now = Instant::now();
    let ctx = TaskContext::new(&world, now, 1);
    assert_eq!(
        orchestrator.poll(&ctx, &mut executor),
        PollOutcome::Submitted { threshold: 0 }
    );
    executor.tick(&ctx);

    world.relog();
    let ctx = TaskContext::new(&world, now, 2);
    assert_eq!(
        orchestrator.poll(&ctx, &mut executor),
        PollOutcome::Submitted { threshold: 0 }
    );
    assert_eq!(calls.get(), 2);
    assert!(matches!(
        executor.tick(&ctx),
        TickReport::Finished(ref outcome) if outcome.state == TaskState::Cancelled
    ));
}

/// Config loaded from disk flows into the orchestrator's retry budget.
#[test]
fn retry_budget_from_config_file() {
    let config = EngineConfig {
        max_step_attempts: Some(2),
        ..EngineConfig::default()
    };
    let temp = TempConfig::with(&config).expect("config");
    let loaded = questline::io::config::load_config(&temp.path()).expect("load");

    let world = SimWorld::default();
    let quest = QuestDefinition::new("budget", "Budget", COUNTER, 10).step(
        0,
        BasicStep::new("broken")
            .tasks(|_| vec![Box::new(ScriptedTask::fails_after("broken", 1, "X"))]),
    );
    let mut orchestrator = Orchestrator::new(&loaded);
    let mut executor = TaskExecutor::new(loaded.max_queue_size);
    start(&mut orchestrator, &world, quest);

    let outcome = run_loop(
        &world,
        &mut orchestrator,
        &mut executor,
        &loop_config(50),
        || {},
        |_, _, _| {},
    )
    .expect("loop");

    assert!(matches!(outcome.stop, LoopStop::Stopped { .. }));
    assert_eq!(outcome.step_failures, 2);
}

/// A step task that can never start is failed by the inactivity watchdog on
/// the default config and rebuilt, instead of holding the quest forever.
///
/// Sequence (default limit of 100 ticks):
/// 1. Tick 1 submits; the composite fails as stalled on tick 101.
/// 2. Tick 102 reports the failure; tick 103 rebuilds the step.
/// 3. The rebuilt task stalls on tick 203 and is rebuilt on tick 205.
#[test]
fn stuck_step_is_rebuilt_by_inactivity_watchdog() {
    let world = SimWorld::default();
    let quest = QuestDefinition::new("stuck", "Stuck", COUNTER, 10).step(
        0,
        BasicStep::new("never starts")
            .tasks(|_| vec![Box::new(ScriptedTask::completes_after("blocked", 1).blocked())]),
    );
    let mut orchestrator = Orchestrator::default();
    let mut executor = TaskExecutor::default();
    start(&mut orchestrator, &world, quest);

    let stalls = Rc::new(RefCell::new(Vec::new()));
    let sink = stalls.clone();
    let outcome = run_loop(
        &world,
        &mut orchestrator,
        &mut executor,
        &loop_config(300),
        || {},
        move |tick, _, report| {
            if let TickReport::Finished(finished) = report {
                if let Some(TaskFailure::Stalled { ticks }) = &finished.failure {
                    sink.borrow_mut().push((tick, *ticks));
                }
            }
        },
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::MaxTicks { max_ticks: 300 });
    assert_eq!(*stalls.borrow(), vec![(101, 101), (203, 101)]);
    assert_eq!(outcome.step_failures, 2);
    assert_eq!(outcome.steps_submitted, 3);
}
