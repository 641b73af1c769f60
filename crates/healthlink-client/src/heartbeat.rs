//! Heartbeat liveness monitoring.
//!
//! A single-shot deadline rearmed whenever the collector shows signs of life
//! (a ping frame, or the open event as initial grace). When the deadline
//! passes the connection is treated as half-open and torn down.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline watchdog for one connection.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    delay: Duration,
    deadline: Instant,
}

impl Heartbeat {
    /// Arm a new deadline `delay` from now.
    pub fn arm(delay: Duration) -> Self {
        Self {
            delay,
            deadline: Instant::now() + delay,
        }
    }

    /// Push the deadline back to `delay` from now.
    pub fn rearm(&mut self) {
        self.deadline = Instant::now() + self.delay;
    }

    /// Current deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn deadline_is_delay_from_arming() {
        let start = Instant::now();
        let hb = Heartbeat::arm(Duration::from_millis(100));
        assert_eq!(hb.deadline() - start, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_pushes_deadline() {
        let start = Instant::now();
        let mut hb = Heartbeat::arm(Duration::from_millis(100));
        time::advance(Duration::from_millis(60)).await;
        hb.rearm();
        assert_eq!(hb.deadline() - start, Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeping_until_deadline_takes_the_delay() {
        let start = Instant::now();
        let hb = Heartbeat::arm(Duration::from_millis(250));
        time::sleep_until(hb.deadline()).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn stays_alive_while_rearmed() {
        let mut hb = Heartbeat::arm(Duration::from_millis(200));
        for _ in 0..5 {
            time::advance(Duration::from_millis(150)).await;
            assert!(Instant::now() < hb.deadline());
            hb.rearm();
        }
    }
}
