//! Circuit state and its public snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::to_iso;

/// Circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Normal operation
    Closed,
    /// Failing fast until the cooldown elapses
    Open,
    /// Letting probe calls through
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal per-key state.
#[derive(Debug, Clone)]
pub(crate) struct CircuitState {
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at_ms: Option<i64>,
    pub next_retry_at_ms: Option<i64>,
    pub updated_at_ms: i64,
}

impl CircuitState {
    pub fn closed(now_ms: i64) -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at_ms: None,
            next_retry_at_ms: None,
            updated_at_ms: now_ms,
        }
    }

    /// Move an open circuit to half-open once its cooldown has elapsed.
    /// Returns true if a transition happened.
    pub fn apply_cooldown(&mut self, now_ms: i64) -> bool {
        match (self.status, self.next_retry_at_ms) {
            (CircuitStatus::Open, Some(retry_at)) if now_ms >= retry_at => {
                self.status = CircuitStatus::HalfOpen;
                self.failure_count = 0;
                self.success_count = 0;
                self.updated_at_ms = now_ms;
                true
            }
            _ => false,
        }
    }

    pub fn open(&mut self, failure_threshold: u32, cooldown_ms: u64, now_ms: i64) {
        self.status = CircuitStatus::Open;
        self.failure_count = failure_threshold;
        self.success_count = 0;
        self.opened_at_ms = Some(now_ms);
        self.next_retry_at_ms = Some(now_ms + cooldown_ms as i64);
        self.updated_at_ms = now_ms;
    }

    pub fn close(&mut self, now_ms: i64) {
        *self = CircuitState::closed(now_ms);
    }

    pub fn snapshot(&self, key: &str) -> CircuitSnapshot {
        CircuitSnapshot {
            key: key.to_string(),
            status: self.status,
            failure_count: self.failure_count,
            success_count: self.success_count,
            opened_at_iso: self.opened_at_ms.map(to_iso),
            next_retry_at_iso: self.next_retry_at_ms.map(to_iso),
            updated_at_iso: to_iso(self.updated_at_ms),
        }
    }
}

/// Public view of a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub key: String,
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at_iso: Option<String>,
    pub next_retry_at_iso: Option<String>,
    pub updated_at_iso: String,
}
