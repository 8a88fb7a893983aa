use std::time::Duration;

/// Delay policy between reconnect attempts.
///
/// Neither variant has an attempt limit: a monitoring client keeps retrying
/// for as long as it is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay after every failure.
    Fixed { delay: Duration },
    /// `base * 2^attempt`, capped at `max`.
    CappedExponential { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based, reset on success).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            ReconnectPolicy::Fixed { delay } => *delay,
            ReconnectPolicy::CappedExponential { base, max } => base
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
                .min(*max),
        }
    }
}

/// Add up to 10% random jitter to a delay.
pub fn with_jitter(delay: Duration) -> Duration {
    let spread = (delay.as_millis() as u64 / 10).max(1);
    delay.saturating_add(Duration::from_millis(fastrand::u64(0..spread)))
}
