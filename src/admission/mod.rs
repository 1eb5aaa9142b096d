//! # Admission control: rate limiter and circuit breaker.
//!
//! Cross-cutting gates applied before a task reaches the pool queue:
//!
//! - [`RateLimiter`] - token bucket throttling intake under load
//! - [`CircuitBreaker`] - short-circuits intake under repeated failure
//!
//! Both reject with typed [`SubmitError`](crate::SubmitError) values and can
//! be permanently sealed by the shutdown coordinator.

mod breaker;
mod limiter;

pub use breaker::{CircuitBreaker, CircuitState, Ticket};
pub use limiter::RateLimiter;
