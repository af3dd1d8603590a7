use thiserror::Error;

/// Failure taxonomy shared by every Piggies operation.
///
/// Validation and invalid-state failures are shown inline to the user;
/// unauthorized and not-found abort the operation with no partial effect.
#[derive(Debug, Error)]
pub enum PiggiesError {
    /// Caller lacks rights (non-owner sharing an album, non-admin moderating)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced entity does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Operation not valid for the entity's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// Geocoding, storage or another collaborator failed
    #[error("external service failed: {0}")]
    External(String),

    /// Database or other infrastructure failure
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PiggiesError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PiggiesError>;
