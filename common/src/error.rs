use crate::ledger::SnapshotId;
use crate::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a subsystem refused an operation.
///
/// Every reference subsystem maps its failure modes onto this enumeration so
/// scenarios can assert on the kind instead of matching message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unauthorized,
    InsufficientBalance,
    InsufficientAllowance,
    InvalidInput,
    /// A flash loan was not paid back in full
    NotRepaid,
    /// An internal accounting check of the subsystem failed
    InvariantBroken,
    /// A time lock has not elapsed yet
    TooEarly,
    AlreadyInitialized,
    UnknownMethod,
    CallDepthExceeded,
    /// The call needed code at an address that has none
    NoCode,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::InsufficientBalance => "insufficient balance",
            FailureKind::InsufficientAllowance => "insufficient allowance",
            FailureKind::InvalidInput => "invalid input",
            FailureKind::NotRepaid => "not repaid",
            FailureKind::InvariantBroken => "invariant broken",
            FailureKind::TooEarly => "too early",
            FailureKind::AlreadyInitialized => "already initialized",
            FailureKind::UnknownMethod => "unknown method",
            FailureKind::CallDepthExceeded => "call depth exceeded",
            FailureKind::NoCode => "no code",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A rejected call: the kind plus a human readable reason
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Revert {
    pub kind: FailureKind,
    pub message: String,
}

impl Revert {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            FailureKind::UnknownMethod,
            format!("no method named '{method}'"),
        )
    }
}

/// Revert with `kind` unless `condition` holds.
pub fn require(condition: bool, kind: FailureKind, message: &str) -> Result<(), Revert> {
    if condition {
        Ok(())
    } else {
        Err(Revert::new(kind, message))
    }
}

/// Infrastructure failures of the ledger itself.
///
/// A reverted call is not a `LedgerError`: it is reported through
/// [`CallOutcome`](crate::ledger::CallOutcome) with its state changes rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Unknown snapshot {0:?}")]
    UnknownSnapshot(SnapshotId),

    #[error("Operation budget of {budget} exhausted")]
    BudgetExhausted { budget: u64 },

    #[error("Deployment of {contract} failed: {revert}")]
    DeployFailed { contract: String, revert: Revert },

    #[error("Asset at {0:?} is not a token subsystem")]
    NotAToken(Address),

    #[error("Query failed: {0}")]
    QueryFailed(Revert),

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require() {
        assert!(require(true, FailureKind::Other, "unused").is_ok());
        let revert = require(false, FailureKind::TooEarly, "wait").unwrap_err();
        assert_eq!(revert.kind, FailureKind::TooEarly);
        assert_eq!(revert.to_string(), "too early: wait");
    }
}
