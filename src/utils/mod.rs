pub mod cas;
pub mod circuit_breaker;
pub mod retry;

pub use cas::{compare_and_swap, CasError, Versioned};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{retry_with_backoff, retry_on_transient, RetryConfig, RetryResult, IsTransient};
