//! Search-as-you-type debouncing.
//!
//! Keystrokes overwrite the pending query; it is released only after a
//! quiet interval with no newer submission. Time is passed in by the
//! caller, so tests run on synthetic instants with no real timers.

use std::time::{Duration, Instant};

pub struct Debouncer {
    quiet: Duration,
    pending: Option<(String, Instant)>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    /// Record a keystroke's query at time `now`, replacing any pending one.
    pub fn submit(&mut self, query: impl Into<String>, now: Instant) {
        self.pending = Some((query.into(), now));
    }

    /// Release the pending query if the quiet interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((_, at)) if now.duration_since(*at) >= self.quiet => {
                self.pending.take().map(|(q, _)| q)
            }
            _ => None,
        }
    }

    /// When the pending query becomes releasable, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at + self.quiet)
    }
}
