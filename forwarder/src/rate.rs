use std::time::Duration;
use tokio::time::Instant;

/// Fixed-rate loop pacing: each `sleep` waits out whatever is left of the
/// current period since the previous tick.
pub struct Rate {
    period: Duration,
    last: Instant,
}

impl Rate {
    /// A non-positive or non-finite rate disables pacing.
    pub fn new(hz: f64) -> Self {
        let period = Duration::try_from_secs_f64(1.0 / hz).unwrap_or(Duration::ZERO);
        Self {
            period,
            last: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn sleep(&mut self) {
        let target = self.last + self.period;
        let now = Instant::now();
        if now < target {
            tokio::time::sleep_until(target).await;
            self.last = target;
        } else if now - target > self.period {
            // More than a full period behind: restart the schedule, no burst
            self.last = now;
        } else {
            self.last = target;
        }
    }
}
