//! Contract violations raised by the decision core.
//!
//! These are caller errors, not environment failures: the session loop never
//! produces them for a well-formed configuration.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("no candidates to evaluate")]
    NoCandidates,

    #[error("path '{0}' has no steps")]
    EmptyPath(String),

    #[error("malformed weight vector: {0}")]
    InvalidWeights(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
