use thiserror::Error;

#[derive(Error, Debug)]
pub enum RippleError {
    /// Job has neither label nor keyword, or a malformed field.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Content source exhausted: {0}")]
    SourceExhausted(String),

    #[error("Content source error: {0}")]
    Source(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Traversal error at {node}: {reason}")]
    Traversal { node: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RippleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RippleError::SourceExhausted(_))
    }
}

/// Errors surfaced by a content source. Exhaustion (rate limit, transient
/// network fault) is the only retryable kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("rate budget exhausted: {0}")]
    Exhausted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("decode: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Exhausted(_))
    }
}

impl From<SourceError> for RippleError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Exhausted(msg) => RippleError::SourceExhausted(msg),
            other => RippleError::Source(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_is_retryable() {
        assert!(SourceError::Exhausted("429".into()).is_retryable());
        assert!(!SourceError::Transport("reset".into()).is_retryable());
        assert!(!SourceError::NotFound("1".into()).is_retryable());

        let err: RippleError = SourceError::Exhausted("429".into()).into();
        assert!(err.is_retryable());
        let err: RippleError = SourceError::Decode("bad json".into()).into();
        assert!(!err.is_retryable());
    }
}
