//! The module contains the errors the engine can throw.
//!
//! The errors are:
//!
//! - [`Validation`] thrown when the caller passed invalid input (non-positive
//!   amount, unknown payment method, missing actor).
//! - [`Conflict`] thrown when the operation clashes with the register state
//!   (a register is already open, the register is closed).
//! - [`InsufficientBalance`] thrown by the overdraft policy on outflows.
//! - [`NotFound`] thrown when a register or movement does not exist.
//! - [`Transient`] thrown when the storage kept rejecting the unit of work
//!   after one internal retry.
//!
//!  [`Validation`]: EngineError::Validation
//!  [`Conflict`]: EngineError::Conflict
//!  [`InsufficientBalance`]: EngineError::InsufficientBalance
//!  [`NotFound`]: EngineError::NotFound
//!  [`Transient`]: EngineError::Transient
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// Stable label for the error family, meant for the presentation layer.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::InsufficientBalance(_) => "insufficient_balance",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Transient(_) => "transient",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::Database(_) => "database",
        }
    }

    /// Human-readable detail without the family prefix.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::Conflict(msg)
            | Self::InsufficientBalance(msg)
            | Self::NotFound(msg)
            | Self::Forbidden(msg)
            | Self::Transient(msg)
            | Self::InvalidCursor(msg) => msg.clone(),
            Self::Database(err) => err.to_string(),
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::InsufficientBalance(a), Self::InsufficientBalance(b)) => a == b,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Forbidden(a), Self::Forbidden(b)) => a == b,
            (Self::Transient(a), Self::Transient(b)) => a == b,
            (Self::InvalidCursor(a), Self::InvalidCursor(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
