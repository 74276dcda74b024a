// src/core/safety.rs — Hard bounds on retries and state transitions

use super::types::Session;

/// Which bound tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyStop {
    /// The per-session retry cap is exhausted.
    RetryCapReached,
    /// The global transition ceiling would be exceeded.
    IterationCapReached,
}

/// Numeric limits only; knows nothing about why a session failed.
#[derive(Debug, Clone, Copy)]
pub struct SafetyNet {
    pub max_retries: u32,
    pub global_iteration_cap: u32,
}

impl SafetyNet {
    pub fn new(max_retries: u32, global_iteration_cap: u32) -> Self {
        Self {
            max_retries,
            global_iteration_cap,
        }
    }

    /// True while another transition fits under the global cap.
    pub fn permit_transition(&self, transitions: u32) -> bool {
        transitions < self.global_iteration_cap
    }

    pub fn permit_next_attempt(&self, session: &Session, transitions: u32) -> bool {
        self.check(session, transitions).is_none()
    }

    /// The global cap wins over the retry cap when both trip.
    pub fn check(&self, session: &Session, transitions: u32) -> Option<SafetyStop> {
        if !self.permit_transition(transitions) {
            return Some(SafetyStop::IterationCapReached);
        }
        if session.retry_count() >= self.max_retries {
            return Some(SafetyStop::RetryCapReached);
        }
        None
    }
}
