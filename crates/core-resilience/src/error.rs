//! Error types for the resilience primitives

use thiserror::Error;

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker is open, rejecting requests")]
    CircuitOpen,

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Maximum retries exceeded
    #[error("Maximum retries ({0}) exceeded")]
    RetriesExhausted(u32),
}

impl ResilienceError {
    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_) | ResilienceError::Timeout(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_)
                | ResilienceError::CircuitOpen
                | ResilienceError::RetriesExhausted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = ResilienceError::Transient("network error".to_string());
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());

        let permanent = ResilienceError::Permanent("mapping rejected".to_string());
        assert!(!permanent.is_transient());
        assert!(permanent.is_permanent());

        let circuit_open = ResilienceError::CircuitOpen;
        assert!(!circuit_open.is_transient());
        assert!(circuit_open.is_permanent());

        let exhausted = ResilienceError::RetriesExhausted(3);
        assert!(exhausted.is_permanent());
    }

    #[test]
    fn test_display() {
        let e = ResilienceError::RetriesExhausted(5);
        assert_eq!(e.to_string(), "Maximum retries (5) exceeded");
    }
}
