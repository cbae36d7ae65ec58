//! Session wall-clock budget shared by every timed external call.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Optional session deadline. Every process-backed call gets the smaller of
/// its own timeout and the time left in the session.
#[derive(Debug, Clone, Copy)]
pub struct SessionBudget {
    deadline: Option<Instant>,
}

impl SessionBudget {
    /// `limit_secs == 0` disables the session deadline.
    pub fn start(limit_secs: u64) -> Self {
        let deadline = (limit_secs > 0).then(|| Instant::now() + Duration::from_secs(limit_secs));
        Self { deadline }
    }

    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn is_exhausted(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| remaining_budget(deadline).is_err())
    }

    /// Timeout for the next call: `per_call` capped by the remaining session time.
    pub fn call_timeout(&self, per_call: Duration) -> Result<Duration> {
        match self.deadline {
            Some(deadline) => Ok(per_call.min(remaining_budget(deadline)?)),
            None => Ok(per_call),
        }
    }
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("session time budget exhausted"));
    }
    Ok(remaining)
}
