//! Stopping criteria, evaluated in a fixed priority order.

use crate::config::LoopConfig;
use crate::core::state::SessionState;
use crate::core::types::{Assessment, StopReason};

/// Verdict of the stopping check at the top of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Continue,
    Stop(StopReason),
    /// Interactive mode: pause and ask the user instead of stopping for the
    /// given reason. The session stays resumable.
    Clarify(StopReason),
}

/// First criterion that fires, in priority order:
///
/// 1. explicit stop request
/// 2. iteration cap
/// 3. error cap
/// 4. last reflection says `complete` with enough confidence
/// 5. stuck flag
/// 6. identical consecutive action signatures
/// 7. consecutive non-improving progress reports
pub fn first_criterion(
    state: &SessionState,
    config: &LoopConfig,
    stop_requested: bool,
) -> Option<StopReason> {
    if stop_requested {
        return Some(StopReason::UserStop);
    }
    if state.iteration >= config.max_iterations {
        return Some(StopReason::MaxIterations);
    }
    if state.error_count >= config.max_errors {
        return Some(StopReason::MaxErrors);
    }
    if let Some(last) = state.last_reflection()
        && last.assessment == Assessment::Complete
        && last.confidence >= config.completion_confidence
    {
        return Some(StopReason::Complete);
    }
    if state.stuck {
        return Some(StopReason::Stuck);
    }
    if state.consecutive_repeats() >= config.repeat_limit as usize {
        return Some(StopReason::RepeatedAction);
    }
    if state.no_progress_count >= config.stall_limit {
        return Some(StopReason::NoProgress);
    }
    None
}

/// Apply the interactive policy on top of [`first_criterion`].
///
/// In interactive mode every reason except `user_stop` and `complete` asks
/// for clarification once; after that it terminates as usual.
pub fn check_stop(state: &SessionState, config: &LoopConfig, stop_requested: bool) -> StopDecision {
    match first_criterion(state, config, stop_requested) {
        None => StopDecision::Continue,
        Some(reason @ (StopReason::UserStop | StopReason::Complete)) => StopDecision::Stop(reason),
        Some(reason) if config.interactive && !state.clarification_requested => {
            StopDecision::Clarify(reason)
        }
        Some(reason) => StopDecision::Stop(reason),
    }
}
