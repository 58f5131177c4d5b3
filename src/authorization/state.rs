//! Authorization Status Definitions
//!
//! Numeric IDs are stable so an external store can persist them as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a [`TransferRequest`](super::types::TransferRequest).
///
/// Terminal states: COMPLETED (40), EXPIRED (-10), CANCELLED (-20), BLOCKED (-30)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransferStatus {
    /// Created, first code issued, nothing validated yet
    Pending = 0,

    /// At least one code validated, more codes outstanding.
    ///
    /// A request stays pending in the plain code-chain model; this split only
    /// makes chain progress visible. Every operation treats it like `Pending`.
    Executing = 10,

    /// Terminal: every code validated, transfer may execute
    Completed = 40,

    /// Terminal: 24h request window lapsed
    Expired = -10,

    /// Terminal: operator cancelled
    Cancelled = -20,

    /// Terminal: lockout after too many failed attempts on one code
    Blocked = -30,
}

impl TransferStatus {
    /// No transition leaves a terminal status
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Expired
                | TransferStatus::Cancelled
                | TransferStatus::Blocked
        )
    }

    /// Still accepting code submissions
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, TransferStatus::Pending | TransferStatus::Executing)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Pending),
            10 => Some(TransferStatus::Executing),
            40 => Some(TransferStatus::Completed),
            -10 => Some(TransferStatus::Expired),
            -20 => Some(TransferStatus::Cancelled),
            -30 => Some(TransferStatus::Blocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Executing => "EXECUTING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Expired => "EXPIRED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}

/// Status of a single verification code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum CodeStatus {
    Pending = 0,
    Validated = 1,
    Expired = -1,
}

impl CodeStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(CodeStatus::Pending),
            1 => Some(CodeStatus::Validated),
            -1 => Some(CodeStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Pending => "PENDING",
            CodeStatus::Validated => "VALIDATED",
            CodeStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Expired.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(TransferStatus::Blocked.is_terminal());

        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Executing.is_terminal());
    }

    #[test]
    fn test_open_states_are_exactly_non_terminal() {
        let all = [
            TransferStatus::Pending,
            TransferStatus::Executing,
            TransferStatus::Completed,
            TransferStatus::Expired,
            TransferStatus::Cancelled,
            TransferStatus::Blocked,
        ];
        for status in all {
            assert_eq!(status.is_open(), !status.is_terminal(), "{}", status);
            assert_eq!(TransferStatus::from_id(status.id()), Some(status));
        }
    }

    #[test]
    fn test_invalid_ids() {
        assert!(TransferStatus::from_id(999).is_none());
        assert!(CodeStatus::from_id(7).is_none());
        assert_eq!(TransferStatus::try_from(-30), Ok(TransferStatus::Blocked));
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferStatus::Blocked.to_string(), "BLOCKED");
        assert_eq!(CodeStatus::Validated.to_string(), "VALIDATED");
    }
}
