//! Side-effecting adapters: filesystem, processes, stores and prompts.

pub mod atomic;
pub mod checkpoint;
pub mod config;
pub mod inference;
pub mod outcomes;
pub mod priors;
pub mod process;
pub mod prompt;
pub mod tools;
