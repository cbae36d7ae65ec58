//! Stable exit codes for autopilot CLI commands.

use crate::core::types::StopReason;

/// Command succeeded, or the session completed its goal.
pub const OK: i32 = 0;
/// Invalid input/config/checkpoint or any other error.
pub const INVALID: i32 = 1;
/// Session stopped as stuck (`stuck`, `repeated_action`, `no_progress`).
pub const STUCK: i32 = 3;
/// Session hit `max_iterations` or `max_errors`.
pub const EXHAUSTED: i32 = 4;
/// Session paused waiting for a clarification; resumable.
pub const NEEDS_CLARIFICATION: i32 = 5;
/// Session stopped on request; resumable.
pub const STOPPED: i32 = 6;

pub fn for_stop_reason(reason: StopReason) -> i32 {
    match reason {
        StopReason::Complete => OK,
        StopReason::Stuck | StopReason::RepeatedAction | StopReason::NoProgress => STUCK,
        StopReason::MaxErrors | StopReason::MaxIterations => EXHAUSTED,
        StopReason::NeedsClarification => NEEDS_CLARIFICATION,
        StopReason::UserStop => STOPPED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_family_shares_a_code() {
        assert_eq!(for_stop_reason(StopReason::NoProgress), STUCK);
        assert_eq!(for_stop_reason(StopReason::RepeatedAction), STUCK);
        assert_eq!(for_stop_reason(StopReason::MaxErrors), EXHAUSTED);
        assert_eq!(for_stop_reason(StopReason::Complete), OK);
    }
}
