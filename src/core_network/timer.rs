use std::time::{Duration, Instant};

/// Session timer. It fires on the thread that polls it, from
/// `Session::process_events` or from a blocking call.
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    repeating: bool,
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(interval: Duration, repeating: bool) -> Self {
        Self {
            interval,
            repeating,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arms the timer unless it is already running.
    pub fn start(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Re-arms the timer from now, whether it was running or not.
    pub fn restart(&mut self) {
        self.deadline = Some(Instant::now() + self.interval);
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left before expiry, `None` when stopped.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Reports an expiry at most once per arming. A repeating timer re-arms
    /// itself, a one-shot timer stops.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = if self.repeating {
                    Some(now + self.interval)
                } else {
                    None
                };
                true
            }
            _ => false,
        }
    }
}
