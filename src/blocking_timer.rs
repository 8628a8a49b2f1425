use embassy_time::{Duration, Instant};

/// Busy-poll delay. The driver is single threaded by design and the serial
/// link is polled, so there is nothing to yield to.
pub(crate) struct BlockingTimer {
    expires_at: Instant,
}

impl BlockingTimer {
    pub fn after(duration: Duration) -> Self {
        Self {
            expires_at: Instant::now() + duration,
        }
    }

    pub fn wait(self) {
        loop {
            if self.expires_at <= Instant::now() {
                break;
            }
        }
    }
}
