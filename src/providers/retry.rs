use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub(crate) const RATE_LIMIT_MAX_RETRIES: usize = 5;
pub(crate) const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(2);
pub(crate) const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(60);

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    // vLLM answers 503 while the engine queue is saturated
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Returns the sleep before the next attempt and the delay to carry forward.
/// A `Retry-After` hint wins when it is longer than the current delay. A bare
/// 503 comes from a saturated vLLM queue, which drains steadily, so its delay
/// grows linearly instead of doubling.
pub(crate) fn plan_retry(
    status: StatusCode,
    delay: Duration,
    retry_after: Option<Duration>,
) -> (Duration, Duration) {
    match retry_after {
        Some(hint) => (hint.max(delay).min(RATE_LIMIT_MAX_DELAY), next_delay(delay)),
        None if status == StatusCode::SERVICE_UNAVAILABLE => (
            delay,
            delay
                .saturating_add(RATE_LIMIT_BASE_DELAY)
                .min(RATE_LIMIT_MAX_DELAY),
        ),
        None => (delay, next_delay(delay)),
    }
}

pub(crate) async fn wait_with_backoff(
    endpoint: &str,
    status: StatusCode,
    attempt: usize,
    delay: Duration,
    retry_after: Option<Duration>,
) -> Duration {
    let (wait, next) = plan_retry(status, delay, retry_after);
    warn!(
        "{} answered {}; retrying in {:.1}s (attempt {}/{})",
        endpoint,
        status.as_u16(),
        wait.as_secs_f32(),
        attempt,
        RATE_LIMIT_MAX_RETRIES
    );
    sleep(wait).await;
    next
}

pub(crate) fn next_delay(current: Duration) -> Duration {
    let next_secs = current
        .as_secs()
        .saturating_mul(2)
        .max(RATE_LIMIT_BASE_DELAY.as_secs());
    Duration::from_secs(next_secs).min(RATE_LIMIT_MAX_DELAY)
}
