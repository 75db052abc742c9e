//! Jittered exponential backoff.

use std::time::Duration;

use jenkins_mcp_core::{Error, RetryPolicy};

/// Delay before retry number `attempt` (0-based).
///
/// Equal jitter: half of the exponential ceiling is fixed, the other half is
/// random, so concurrent callers spread out without ever retrying instantly.
/// A server-provided `Retry-After` wins when present, capped at `max_delay`.
pub(crate) fn delay_for(policy: &RetryPolicy, attempt: u32, error: &Error) -> Duration {
    if let Error::RateLimited {
        retry_after: Some(after),
        ..
    } = error
    {
        return (*after).min(policy.max_delay);
    }

    let ceiling = policy.backoff_ceiling(attempt);
    let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    let half = ceiling_ms / 2;
    Duration::from_millis(half + fastrand::u64(0..=half))
}

/// Parse a `Retry-After` header given in seconds. HTTP dates are ignored.
pub(crate) fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
