//! # Resilience
//!
//! Circuit breaker used to isolate the durable bus backend. Protected
//! operations (send/receive/broadcast) route through the breaker; admin and
//! observability operations bypass it so the system stays inspectable while
//! the backend is misbehaving.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
