//! Deterministic, pure logic shared by the agent core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod alignment;
pub mod budget;
pub mod classifier;
pub mod diagnosis;
pub mod effort;
pub mod error;
pub mod evaluator;
pub mod intent;
pub mod learner;
pub mod multi_step;
pub mod recovery;
pub mod ring;
pub mod state;
pub mod stopping;
pub mod types;
pub mod weights;
