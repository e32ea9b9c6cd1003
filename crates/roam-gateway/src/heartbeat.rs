//! Per-connection liveness tracking.
//!
//! Two independent strike counters: one for heartbeats that arrive too
//! early, one for supervisory ticks that find the client silent for too
//! long. An accepted heartbeat clears both.

use std::time::Duration;

use tokio::time::Instant;

use roam_types::events::CloseCode;

/// Timing rules for a session's heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRules {
    /// Silence longer than this counts against the client on every tick.
    pub timeout: Duration,
    /// Heartbeats closer together than this are refused.
    pub min_spacing: Duration,
    /// Consecutive strikes on either counter before the session is closed.
    pub max_strikes: u32,
}

impl Default for HeartbeatRules {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            min_spacing: Duration::from_secs(15),
            max_strikes: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Accepted; reply with op 11.
    Ack,
    /// Too early; reply with op 12.
    SlowDown,
    Close(CloseCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Alive,
    /// Silent past the timeout; carries the current strike count.
    Late(u32),
    Close(CloseCode),
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    rules: HeartbeatRules,
    last_heartbeat: Instant,
    late_strikes: u32,
    early_strikes: u32,
}

impl HeartbeatMonitor {
    /// Start tracking; `now` counts as the last accepted heartbeat.
    pub fn new(rules: HeartbeatRules, now: Instant) -> Self {
        Self {
            rules,
            last_heartbeat: now,
            late_strikes: 0,
            early_strikes: 0,
        }
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// A heartbeat frame arrived at `now`.
    pub fn on_heartbeat(&mut self, now: Instant) -> HeartbeatOutcome {
        if now.saturating_duration_since(self.last_heartbeat) < self.rules.min_spacing {
            self.early_strikes += 1;
            if self.early_strikes >= self.rules.max_strikes {
                return HeartbeatOutcome::Close(CloseCode::HeartbeatTooFast);
            }
            return HeartbeatOutcome::SlowDown;
        }

        self.last_heartbeat = now;
        self.early_strikes = 0;
        self.late_strikes = 0;
        HeartbeatOutcome::Ack
    }

    /// Supervisory tick at `now`.
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        if now.saturating_duration_since(self.last_heartbeat) <= self.rules.timeout {
            return TickOutcome::Alive;
        }

        self.late_strikes += 1;
        if self.late_strikes >= self.rules.max_strikes {
            TickOutcome::Close(CloseCode::HeartbeatTimeout)
        } else {
            TickOutcome::Late(self.late_strikes)
        }
    }
}
