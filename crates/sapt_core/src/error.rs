//! crates/sapt_core/src/error.rs
//!
//! Error types shared by the core services. Store failures live next to the
//! store port in `ports.rs`.

use crate::ports::StoreError;

/// Failures of sign-up, sign-in and session checks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account already exists for {0}")]
    EmailInUse(String),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Session is still being resolved")]
    SessionLoading,
    #[error("Role not authorized for this action")]
    Forbidden,
    #[error("Identity provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Field {field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// The error type of every data access operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DataError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DataError::Store(StoreError::PermissionDenied(_)))
    }
}

impl From<DataError> for AuthError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::Store(e) => AuthError::Store(e),
            DataError::Validation(e) => AuthError::Validation(e),
        }
    }
}

pub type DataResult<T> = Result<T, DataError>;
