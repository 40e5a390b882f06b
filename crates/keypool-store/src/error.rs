/// Errors from shared store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, timed out, closed).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value does not have the shape the operation requires.
    #[error("invalid value at {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` for connection-level failures that callers may degrade on.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_unavailable() {
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(!StoreError::Backend("oops".into()).is_unavailable());
        assert!(!StoreError::InvalidValue {
            key: "k".into(),
            reason: "not an integer".into(),
        }
        .is_unavailable());
    }

    #[test]
    fn display_includes_key() {
        let err = StoreError::InvalidValue {
            key: "FLOW:counter".into(),
            reason: "not an integer".into(),
        };
        assert_eq!(err.to_string(), "invalid value at FLOW:counter: not an integer");
    }
}
