//! Judgement agents: prompt + schema + backend call + fallback.
//!
//! Each agent renders its template, asks the [`InferenceBackend`] for a
//! schema-constrained answer and decodes it. When the backend fails the
//! caller gets an error and substitutes the deterministic fallback the agent
//! module also provides.
//!
//! [`InferenceBackend`]: crate::io::inference::InferenceBackend

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

pub mod alignment;
pub mod diagnostician;
pub mod reflector;

/// `<prefix>-<yyyymmdd_hhmmss>-<6 random chars>`.
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let short: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("{prefix}-{}-{short}", Utc::now().format("%Y%m%d_%H%M%S"))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
