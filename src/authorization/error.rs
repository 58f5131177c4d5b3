//! Authorization Error Types
//!
//! Hard failures only. Wrong codes, lockout and expiry are business outcomes
//! and travel as [`AttemptResult`](super::types::AttemptResult) instead.

use thiserror::Error;

use super::state::TransferStatus;
use crate::money::MoneyError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthorizationError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount precision exceeds currency scale: provided {provided}, max {max}")]
    AmountPrecision { provided: u32, max: u32 },

    #[error("Destination account is required")]
    MissingDestination,

    #[error("Notification recipient is required")]
    MissingRecipient,

    #[error("Description too long: {len} chars (max {max})")]
    DescriptionTooLong { len: usize, max: usize },

    #[error("Code sequence must contain at least one code")]
    EmptyCodeSequence,

    // === State Errors ===
    #[error("Transfer request not found: {0}")]
    NotFound(String),

    #[error("Transfer request {reference} is {status}, operation not allowed")]
    InvalidState {
        reference: String,
        status: TransferStatus,
    },

    #[error("Transfer request {0} has no active verification code")]
    NoActiveCode(String),

    // === System Errors ===
    #[error("Duplicate transfer reference")]
    DuplicateReference,

    #[error("Transfer request {0} kept changing concurrently, giving up")]
    ConcurrentModification(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthorizationError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthorizationError::InvalidAmount => "INVALID_AMOUNT",
            AuthorizationError::AmountPrecision { .. } => "PRECISION_OVERFLOW",
            AuthorizationError::MissingDestination => "MISSING_DESTINATION",
            AuthorizationError::MissingRecipient => "MISSING_RECIPIENT",
            AuthorizationError::DescriptionTooLong { .. } => "DESCRIPTION_TOO_LONG",
            AuthorizationError::EmptyCodeSequence => "EMPTY_CODE_SEQUENCE",
            AuthorizationError::NotFound(_) => "NOT_FOUND",
            AuthorizationError::InvalidState { .. } => "INVALID_STATE",
            AuthorizationError::NoActiveCode(_) => "NO_ACTIVE_CODE",
            AuthorizationError::DuplicateReference => "DUPLICATE_REFERENCE",
            AuthorizationError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            AuthorizationError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Broken aggregate invariants; route to alerting rather than the user
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, AuthorizationError::NoActiveCode(_))
    }
}

impl From<MoneyError> for AuthorizationError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::InvalidAmount | MoneyError::InvalidFormat(_) => {
                AuthorizationError::InvalidAmount
            }
            MoneyError::PrecisionOverflow { provided, max } => {
                AuthorizationError::AmountPrecision { provided, max }
            }
        }
    }
}
