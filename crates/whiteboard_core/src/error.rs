use thiserror::Error;

/// Unified error type for whiteboard operations
#[derive(Debug, Error)]
pub enum BoardError {
    /// Board, document or shape addressed by id does not exist. Fatal to
    /// the calling operation; no partial writes happen.
    #[error("board '{0}' not found")]
    NotFound(String),

    /// Bad or expired token, or insufficient collaborator role.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Lock already held by another user, or an already-pending request.
    /// Recoverable; never tears down connection state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Undo/redo boundary conditions and malformed payloads.
    /// Recoverable by the caller.
    #[error("{0}")]
    BadRequest(String),

    /// Ephemeral store or repository failure.
    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias for whiteboard operations
pub type Result<T> = std::result::Result<T, BoardError>;

impl BoardError {
    /// True for request-level failures (bad input, missing board, lock
    /// contention, insufficient role). False for store and serialization
    /// faults, which point at infrastructure rather than the request.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BoardError::Store(_) | BoardError::Serialize(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_failures_are_recoverable_faults_are_not() {
        assert!(BoardError::NotFound("b1".into()).is_recoverable());
        assert!(BoardError::Unauthorized("role".into()).is_recoverable());
        assert!(BoardError::Conflict("lock".into()).is_recoverable());
        assert!(BoardError::BadRequest("nothing to undo".into()).is_recoverable());
        assert!(!BoardError::Store("redis down".into()).is_recoverable());
    }
}
