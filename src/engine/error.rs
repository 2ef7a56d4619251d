use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },

    #[error("reservation {0} belongs to another user")]
    Forbidden(Ulid),

    #[error("parking spot {0} is not available")]
    SpotUnavailable(Ulid),

    #[error("time slot conflicts with reservation {0}")]
    TimeConflict(Ulid),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// The WAL writer failed; nothing from the operation was applied.
    #[error("store failure: {0}")]
    Store(String),
}

impl EngineError {
    pub(crate) fn lot(id: Ulid) -> Self {
        EngineError::NotFound { kind: "parking lot", id }
    }

    pub(crate) fn spot(id: Ulid) -> Self {
        EngineError::NotFound { kind: "parking spot", id }
    }

    pub(crate) fn reservation(id: Ulid) -> Self {
        EngineError::NotFound { kind: "reservation", id }
    }
}
