//! Bounded retry with a fixed pause between attempts.

use std::fmt::Display;

use rootsmith_common::types::RetryPolicy;

/// Invokes `op` until it succeeds or `policy.attempts` is exhausted.
///
/// A policy with zero attempts still runs the operation once. The pause is
/// only taken between attempts, never after the last one.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub fn run<T, E, F>(mut op: F, policy: RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                tracing::debug!(attempt, attempts, error = %err, "attempt failed, retrying");
                std::thread::sleep(policy.delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
