//! Tick-driven quest automation engine.
//!
//! A quest reports progress through a sparse integer counter. The engine maps
//! that counter to the active step, turns the step into tasks and drives them
//! one at a time against a tick-paced environment:
//!
//! - **[`core`]**: Pure, deterministic logic (task states, step resolution).
//! - **[`io`]**: The [`io::environment::Environment`] boundary, an in-memory
//!   simulated world and config files.
//! - **[`task`]**: The task contract and the generic task kinds.
//!
//! Orchestration modules ([`executor`], [`orchestrator`], [`looping`]) wire
//! those together; [`demo`] backs the `questline demo` command.

pub mod core;
pub mod demo;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod orchestrator;
pub mod quest;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
