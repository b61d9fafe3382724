//! Connectivity circuit breaker.
//!
//! Counts consecutive transport-level failures (timeouts, unreachable service).
//! At the threshold the circuit trips: new backend calls fail locally without
//! a network attempt and without touching the counter. After the cool-down one
//! trial call is admitted; its outcome resets or re-trips the circuit. Each
//! admitted call carries a `CallTicket`, and while tripped only the failure
//! of the current trial is counted.
//!
//! Also arbitrates the user-visible "service unavailable" notice so only one
//! is painted per cool-down window.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ErrorKind;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct CircuitState {
    consecutive_failures: u32,
    tripped: bool,
    tripped_at: Option<Instant>,
    /// Id of the outstanding trial, if any.
    trial: Option<u64>,
    trials_issued: u64,
    last_notice_at: Option<Instant>,
    trips: u64,
}

/// Point-in-time view for inspection and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub consecutive_failures: u32,
    pub tripped: bool,
    pub trial_in_flight: bool,
    pub trips: u64,
}

/// Proof of admission, handed back when the call settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTicket {
    trial: Option<u64>,
}

impl CallTicket {
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

pub struct ErrorCircuit {
    state: Mutex<CircuitState>,
    threshold: u32,
    cool_down: Duration,
}

impl ErrorCircuit {
    pub fn new(threshold: u32, cool_down: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::default()),
            threshold: threshold.max(1),
            cool_down,
        }
    }

    /// Admit a new backend call, or `None` while tripped. After the cool-down
    /// exactly one ticket is issued (the trial) until that trial settles.
    pub fn should_admit_call(&self) -> Option<CallTicket> {
        let mut state = self.state.lock();
        if !state.tripped {
            return Some(CallTicket { trial: None });
        }
        if state.trial.is_some() {
            return None;
        }
        let cooled = state
            .tripped_at
            .map_or(true, |at| at.elapsed() >= self.cool_down);
        if !cooled {
            return None;
        }
        state.trials_issued += 1;
        let id = state.trials_issued;
        state.trial = Some(id);
        info!(trial = id, failures = state.consecutive_failures, "circuit_trial_admitted");
        Some(CallTicket { trial: Some(id) })
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.tripped {
            info!(failures = state.consecutive_failures, "circuit_reset");
        }
        state.consecutive_failures = 0;
        state.tripped = false;
        state.tripped_at = None;
        state.trial = None;
        state.last_notice_at = None;
    }

    pub fn record_failure(&self, ticket: CallTicket, kind: ErrorKind) {
        let mut state = self.state.lock();
        if state.tripped {
            if ticket.trial.is_none() || ticket.trial != state.trial {
                // Admitted before the trip; its outcome says nothing new.
                debug!(kind = ?kind, "circuit_straggler_ignored");
                return;
            }
            state.trial = None;
            if kind.trips_circuit() {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.tripped_at = Some(Instant::now());
                warn!(
                    failures = state.consecutive_failures,
                    "circuit_trial_failed_retripped"
                );
            }
            return;
        }
        if !kind.trips_circuit() {
            return;
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if state.consecutive_failures >= self.threshold {
            state.tripped = true;
            state.tripped_at = Some(Instant::now());
            state.trips += 1;
            warn!(
                failures = state.consecutive_failures,
                cool_down_ms = self.cool_down.as_millis() as u64,
                "circuit_tripped"
            );
        } else {
            debug!(failures = state.consecutive_failures, kind = ?kind, "circuit_failure_recorded");
        }
    }

    /// Claim the right to paint a connectivity notice. Returns true at most
    /// once per cool-down window until the next success.
    pub fn claim_notice(&self) -> bool {
        let mut state = self.state.lock();
        let free = state
            .last_notice_at
            .map_or(true, |at| at.elapsed() >= self.cool_down);
        if free {
            state.last_notice_at = Some(Instant::now());
        }
        free
    }

    pub fn is_tripped(&self) -> bool {
        self.state.lock().tripped
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            consecutive_failures: state.consecutive_failures,
            tripped: state.tripped,
            trial_in_flight: state.trial.is_some(),
            trips: state.trips,
        }
    }

    pub fn cool_down(&self) -> Duration {
        self.cool_down
    }
}

impl Default for ErrorCircuit {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOL_DOWN)
    }
}
