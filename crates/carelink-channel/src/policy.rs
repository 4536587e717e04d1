use std::time::Duration;

/// Decides how long to wait before reconnect attempt `attempt` (1-based).
/// The state machine never caps attempts itself; a policy shapes only the
/// spacing.
pub trait ReconnectPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Fixed interval between attempts, retried indefinitely. This matches the
/// portal's long-standing reconnect behavior; a persistently unreachable
/// endpoint is retried at the same cadence forever.
pub struct ConstantDelay {
    delay: Duration,
}

impl ConstantDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectPolicy for ConstantDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Doubles the delay on each consecutive failure, up to a ceiling. Attempts
/// remain unbounded.
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        let factor = 1u32 << exp;
        self.base.saturating_mul(factor).min(self.max)
    }
}
