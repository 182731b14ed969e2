use std::time::Duration;

/// Exponential backoff, capped at 30s: `delay = min(30s, 2^n seconds)`
/// where `n` is the retry attempt, applied by the queue layer on retry.
pub fn retry_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt).min(30);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_thirty_seconds() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(4), Duration::from_secs(16));
        assert_eq!(retry_delay(5), Duration::from_secs(30));
        assert_eq!(retry_delay(10), Duration::from_secs(30));
    }
}
