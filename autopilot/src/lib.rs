//! Decision-and-execution core for an autonomous task agent.
//!
//! A session repeatedly reflects on its goal, picks the next action (ranking
//! candidate plans by effort, risk, alignment and confidence), executes it
//! through a tool executor, and diagnoses and recovers failed steps until a
//! stopping criterion fires.
//!
//! - **[`core`]**: Pure, deterministic logic (scoring, ranking, learning,
//!   classification, stopping criteria). No I/O.
//! - **[`io`]**: Side effects (inference backend, tools, stores, prompts).
//! - **[`agents`]**: Judgement calls: prompt + schema + backend + fallback.
//!
//! Orchestration ([`session`], [`decide`], [`recover`], [`cli`]) wires the
//! three together.

pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod decide;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recover;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
