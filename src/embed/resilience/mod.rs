//! Retry and circuit breaking for remote embedding providers.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryConfig, RetryResult, execute_with_retry_async};
