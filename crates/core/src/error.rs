//! Centralized error types for the clinic workspace.

use thiserror::Error;

/// Top-level error enum.
///
/// `NotFound` and `Forbidden` are the only domain failures. Everything a
/// caller should treat as "nothing happened" is a successful result instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClinicError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClinicError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

pub type ClinicResult<T> = Result<T, ClinicError>;
