//! Identity resolution error types.

use thiserror::Error;
use warden_core::error::WardenError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No valid, unexpired token. Callers normally continue anonymously.
    #[error("not authenticated")]
    Unauthenticated,

    /// The identity store could not answer.
    #[error("identity backend failure: {0}")]
    Backend(WardenError),
}

impl AuthError {
    /// Classify a repository error: absence is an authentication failure,
    /// anything else is a backend failure.
    pub(crate) fn from_lookup(err: WardenError) -> Self {
        match err {
            WardenError::NotFound { .. } => Self::Unauthenticated,
            other => Self::Backend(other),
        }
    }
}

impl From<AuthError> for WardenError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => WardenError::Unauthenticated,
            AuthError::Backend(inner) => inner,
        }
    }
}
