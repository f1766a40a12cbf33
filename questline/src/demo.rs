//! Built-in demonstration quest for `questline demo`.
//!
//! The quest runs against a [`SimWorld`] whose rules advance the progress
//! counter when the right input is injected near the right place, so the
//! full loop (resolution, auto-walk, retries on misplaced clicks) is
//! exercised without a game client.

use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::core::types::{ProgressCounter, Tile};
use crate::executor::TaskExecutor;
use crate::io::config::EngineConfig;
use crate::io::environment::{Environment, Input};
use crate::io::sim::{SimWorld, WorldState};
use crate::looping::{LoopConfig, LoopOutcome, LoopStop, run_loop};
use crate::orchestrator::{Orchestrator, QuestStatus};
use crate::quest::{BasicStep, Quest, QuestDefinition};
use crate::task::TaskContext;

pub const DEMO_COUNTER: ProgressCounter = ProgressCounter::varp(179);
pub const DEMO_START: Tile = Tile::new(3222, 3218, 0);
pub const FARMER: Tile = Tile::new(3190, 3273, 0);
pub const PADDOCK: Tile = Tile::new(3201, 3268, 0);
pub const SPINNING_WHEEL: Tile = Tile::new(3209, 3213, 0);

/// Interactions only succeed within this many tiles of their target.
const INTERACT_RANGE: u32 = 3;

/// The sheep-shearing errand: talk, shear, spin, hand in.
pub fn demo_quest() -> QuestDefinition {
    let talk_to_farmer = || Input::MenuOption {
        option: "Talk-to".to_string(),
        target: "Farmer".to_string(),
    };
    QuestDefinition::new("sheep_shearer", "Sheep Shearer", DEMO_COUNTER, 30)
        .step(
            0,
            BasicStep::new("Talk to the Farmer")
                .at(FARMER)
                .requiring_idle()
                .input(talk_to_farmer()),
        )
        .step(
            10,
            BasicStep::new("Shear a sheep in the paddock")
                .at(PADDOCK)
                .requiring_idle()
                .input(Input::MenuOption {
                    option: "Shear".to_string(),
                    target: "Sheep".to_string(),
                }),
        )
        .step(
            20,
            BasicStep::new("Spin the wool")
                .at(SPINNING_WHEEL)
                .requiring_idle()
                .input(Input::MenuOption {
                    option: "Spin".to_string(),
                    target: "Spinning wheel".to_string(),
                })
                .input(Input::Key('3')),
        )
        .step(
            25,
            BasicStep::new("Hand the ball of wool to the Farmer")
                .at(FARMER)
                .requiring_idle()
                .input(talk_to_farmer()),
        )
}

/// A world whose rules advance [`DEMO_COUNTER`] in response to the demo
/// quest's inputs.
pub fn demo_world() -> SimWorld {
    let world = SimWorld::default();
    world.set_position(DEMO_START);
    world.set_latency(1);
    world.on_input(|input, state| {
        let Input::MenuOption { option, target } = input else {
            return Ok(());
        };
        match (option.as_str(), target.as_str()) {
            ("Talk-to", "Farmer") => {
                interact(state, FARMER, "Farmer")?;
                let next = match state.counter(DEMO_COUNTER) {
                    0 => 10,
                    25 => 30,
                    other => other,
                };
                state.set_counter(DEMO_COUNTER, next);
                Ok(())
            }
            ("Shear", "Sheep") => {
                interact(state, PADDOCK, "Sheep")?;
                state.set_counter(DEMO_COUNTER, 20);
                Ok(())
            }
            ("Spin", "Spinning wheel") => {
                interact(state, SPINNING_WHEEL, "Spinning wheel")?;
                state.set_counter(DEMO_COUNTER, 25);
                Ok(())
            }
            _ => Err(format!("nothing to {option} on {target}")),
        }
    });
    world
}

fn interact(state: &WorldState, at: Tile, name: &str) -> Result<(), String> {
    let Some(position) = state.position else {
        return Err("player not loaded".to_string());
    };
    if position.distance_to(&at) > INTERACT_RANGE {
        return Err(format!("{name} is out of reach from {position}"));
    }
    Ok(())
}

/// Result of one demo run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub quest: String,
    pub outcome: LoopOutcome,
    pub inputs: usize,
    pub final_position: Option<Tile>,
    pub final_counter: i64,
    pub status: Option<QuestStatus>,
}

impl DemoReport {
    pub fn completed(&self) -> bool {
        matches!(self.outcome.stop, LoopStop::QuestComplete)
    }
}

/// Run the demo quest to completion or until `max_ticks`.
pub fn run_demo(config: &EngineConfig, max_ticks: u64) -> Result<DemoReport> {
    let world = demo_world();
    let quest = demo_quest();
    let quest_name = quest.name().to_string();
    let mut orchestrator = Orchestrator::new(config);
    let mut executor = TaskExecutor::new(config.max_queue_size);

    let ctx = TaskContext::new(&world, Instant::now(), 0);
    orchestrator
        .start_quest(Rc::new(quest), &ctx)
        .context("start demo quest")?;

    let loop_config = LoopConfig {
        max_ticks,
        tick_interval: Duration::from_millis(config.tick_interval_ms),
    };
    let outcome = run_loop(
        &world,
        &mut orchestrator,
        &mut executor,
        &loop_config,
        || world.advance(),
        |_, _, _| {},
    )?;
    info!(?outcome, "demo finished");

    Ok(DemoReport {
        quest: quest_name,
        outcome,
        inputs: world.inputs().len(),
        final_position: world.position(),
        final_counter: world.read_counter(DEMO_COUNTER),
        status: orchestrator.status(),
    })
}
