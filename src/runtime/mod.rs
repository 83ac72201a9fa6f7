//! Supervision primitives
//!
//! Generic reliability building blocks used to run the pipeline
//! continuously over a stream of documents without cascading failure or
//! unbounded memory growth: a circuit breaker that fails fast after
//! repeated errors and probes recovery after a cooldown, a bounded queue
//! with hysteresis-based pause/resume watermarks, and an OTP-style
//! supervisor with per-child restart policies and a sliding-window restart
//! budget.

mod backpressure;
mod circuit_breaker;
mod supervisor;

pub use backpressure::{BackpressureQueue, QueueEvent, QueueStatsExport};
pub use circuit_breaker::{BreakerStatsExport, CircuitBreaker, CircuitState};
pub use supervisor::{ChildSpec, RestartType, Supervisor, SupervisorEvent};
