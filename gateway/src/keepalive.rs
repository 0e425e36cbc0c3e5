//! Liveness bookkeeping for the keep-alive prober.
//!
//! The supervisor pings the transport on an interval; pongs come back over
//! the event stream. The tracker counts consecutive pings that went
//! unanswered past the pong window and declares the connection dead after
//! too many, which is how silently dropped sockets are caught.

use std::time::{Duration, Instant};

/// Outcome of one keep-alive tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeepaliveVerdict {
    /// The previous ping was answered, or its pong window is still open.
    Healthy,
    /// The previous ping went unanswered; carries the consecutive-miss
    /// count.
    Missed(u32),
    /// Too many misses, declare the connection dead.
    Dead,
}

/// Tracks pings, pongs, and consecutive misses.
#[derive(Debug)]
pub struct KeepaliveTracker {
    pong_timeout: Duration,
    max_missed: u32,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    missed: u32,
}

impl KeepaliveTracker {
    /// Create a tracker with the given pong window and miss budget.
    pub fn new(pong_timeout: Duration, max_missed: u32) -> Self {
        Self {
            pong_timeout,
            max_missed,
            last_ping: None,
            last_pong: None,
            missed: 0,
        }
    }

    /// Forget the current streak, e.g. after a fresh connection opened.
    pub fn reset(&mut self) {
        self.last_ping = None;
        self.last_pong = None;
        self.missed = 0;
    }

    /// Record an answered ping.
    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = Some(now);
        self.missed = 0;
    }

    /// When the last pong arrived.
    pub const fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// Record that a ping was just sent and judge the connection on the
    /// ping before it.
    ///
    /// A miss is counted only when the previous ping saw no pong after it
    /// and its pong window has closed; a pong that answered an earlier
    /// ping does not count for a later one.
    pub fn tick(&mut self, now: Instant) -> KeepaliveVerdict {
        let unanswered = self.last_ping.is_some_and(|pinged| {
            let answered = self.last_pong.is_some_and(|pong| pong >= pinged);

            !answered && now.duration_since(pinged) > self.pong_timeout
        });

        self.last_ping = Some(now);

        if !unanswered {
            return KeepaliveVerdict::Healthy;
        }

        self.missed += 1;

        if self.missed >= self.max_missed {
            KeepaliveVerdict::Dead
        } else {
            KeepaliveVerdict::Missed(self.missed)
        }
    }
}
