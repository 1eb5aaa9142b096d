//! # Circuit breaker: admission state machine.
//!
//! ```text
//!            failures ≥ threshold within window
//!   Closed ────────────────────────────────────► Open
//!     ▲                                           │
//!     │ probe success                             │ open_duration elapsed
//!     │                                           ▼
//!     └─────────────────── HalfOpen ◄─────────────┘
//!                            │ probe failure
//!                            └───────────────► Open (timer reset)
//! ```
//!
//! ## Rules
//! - In **Open**, every admit is rejected with `CircuitOpen`; the only state
//!   change is the timer-driven transition to half-open.
//! - In **HalfOpen**, exactly one probe may be outstanding; concurrent
//!   callers are rejected until the probe resolves.
//! - State transitions are atomic with the failure counter (one mutex), so
//!   concurrent outcome reports never lose updates.
//! - Outcomes are reported with the [`Ticket`] returned by
//!   [`CircuitBreaker::admit`]; a probe ticket that is dropped unreported
//!   (e.g. the pool rejected the task) reopens the probe slot via
//!   [`CircuitBreaker::release`].

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::error::SubmitError;
use crate::events::{Bus, EventKind};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; failures are counted over the rolling window.
    Closed,
    /// All requests rejected until `open_duration` elapses.
    Open,
    /// A single probe decides the next state.
    HalfOpen,
}

enum State {
    Closed { failures: VecDeque<Instant> },
    Open { since: Instant },
    HalfOpen { probing: bool },
}

/// Admission grant; report the task's outcome back with it.
///
/// Deliberately not `Clone`: one grant, one report.
#[derive(Debug)]
#[must_use = "report the outcome via on_success/on_failure, or release the ticket"]
pub struct Ticket {
    probe: bool,
}

impl Ticket {
    /// True if this grant is the single half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Failure-driven admission gate.
///
/// # Example
/// ```
/// use taskpool::{Bus, BreakerConfig, CircuitBreaker, CircuitState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let breaker = CircuitBreaker::new(&BreakerConfig::default(), Bus::new(16));
/// let ticket = breaker.admit().unwrap();
/// breaker.on_success(ticket);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # }
/// ```
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    state: Mutex<State>,
    sealed: Mutex<bool>,
    bus: Bus,
}

impl CircuitBreaker {
    /// Creates a breaker in the closed state.
    pub fn new(cfg: &BreakerConfig, bus: Bus) -> Self {
        Self {
            cfg: *cfg,
            state: Mutex::new(State::Closed {
                failures: VecDeque::new(),
            }),
            sealed: Mutex::new(false),
            bus,
        }
    }

    /// Requests admission.
    ///
    /// - Closed: granted.
    /// - Open: rejected with `CircuitOpen`, unless `open_duration` has
    ///   elapsed, in which case the caller receives the half-open probe.
    /// - HalfOpen: rejected while a probe is outstanding; otherwise the
    ///   caller becomes the probe.
    pub fn admit(&self) -> Result<Ticket, SubmitError> {
        if *self.sealed.lock().expect("breaker seal lock poisoned") {
            return Err(SubmitError::PoolClosed);
        }
        let mut state = self.state.lock().expect("breaker state lock poisoned");
        match &mut *state {
            State::Closed { .. } => Ok(Ticket { probe: false }),
            State::Open { since } => {
                if since.elapsed() >= self.cfg.open_duration {
                    *state = State::HalfOpen { probing: true };
                    self.bus.emit(EventKind::BreakerHalfOpen);
                    Ok(Ticket { probe: true })
                } else {
                    Err(SubmitError::CircuitOpen)
                }
            }
            State::HalfOpen { probing } => {
                if *probing {
                    Err(SubmitError::CircuitOpen)
                } else {
                    *probing = true;
                    Ok(Ticket { probe: true })
                }
            }
        }
    }

    /// Reports a successful outcome for an admitted task.
    ///
    /// A successful probe closes the breaker and resets the failure counter.
    pub fn on_success(&self, ticket: Ticket) {
        if !ticket.probe {
            return;
        }
        let mut state = self.state.lock().expect("breaker state lock poisoned");
        if matches!(&*state, State::HalfOpen { .. }) {
            *state = State::Closed {
                failures: VecDeque::new(),
            };
            self.bus.emit(EventKind::BreakerClosed);
        }
    }

    /// Reports a failed outcome for an admitted task.
    ///
    /// A failed probe reopens the breaker (timer reset). In the closed state
    /// the failure joins the rolling window; crossing `failure_threshold`
    /// within `window` trips the breaker open.
    pub fn on_failure(&self, ticket: Ticket) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("breaker state lock poisoned");
        match &mut *state {
            State::HalfOpen { .. } if ticket.probe => {
                *state = State::Open { since: now };
                self.bus.emit(EventKind::BreakerOpened);
            }
            State::Closed { failures } => {
                failures.push_back(now);
                // duration_since saturates, so a window longer than the
                // process uptime never underflows.
                while failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > self.cfg.window)
                {
                    failures.pop_front();
                }
                if failures.len() >= self.cfg.failure_threshold.max(1) as usize {
                    *state = State::Open { since: now };
                    self.bus.emit(EventKind::BreakerOpened);
                }
            }
            // Stale report from before a transition: no counter to feed.
            _ => {}
        }
    }

    /// Returns an unused grant (the task never ran, e.g. the pool rejected
    /// it). For a probe this reopens the probe slot without a transition.
    pub fn release(&self, ticket: Ticket) {
        if !ticket.probe {
            return;
        }
        let mut state = self.state.lock().expect("breaker state lock poisoned");
        if let State::HalfOpen { probing } = &mut *state {
            *probing = false;
        }
    }

    /// Permanently rejects all subsequent admits (shutdown intake stop).
    pub fn seal(&self) {
        *self.sealed.lock().expect("breaker seal lock poisoned") = true;
    }

    /// Current state (observability/tests).
    pub fn state(&self) -> CircuitState {
        match &*self.state.lock().expect("breaker state lock poisoned") {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}
