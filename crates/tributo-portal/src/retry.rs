//! Backoff schedules for retriable portal calls.
//!
//! Only transient errors (timeouts, transport failures) are worth
//! retrying — see [`crate::PortalError::is_retriable`]. The schedule is
//! owned by the caller that drives the session, since a session is
//! single-owner and every retry re-issues the call on the same exclusive
//! borrow.

use std::time::Duration;

/// The delays applied between attempts.
///
/// The default matches the pipeline's recovery policy: 30 s → 60 s → 120 s,
/// so a call is attempted at most `delays.len() + 1` times.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// No retries at all; the call runs exactly once.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// Millisecond-scale schedule for tests.
    pub fn fast() -> Self {
        Self {
            delays: vec![Duration::from_millis(1), Duration::from_millis(2)],
        }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
        }
    }
}
