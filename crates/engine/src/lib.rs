//! Cash-register ledger.
//!
//! The crate owns the lifecycle of a till ([`Register`]): opening it with a
//! starting balance, appending immutable [`Movement`]s, and closing it by
//! reconciling the replayed balance against a physical count. Every write
//! leaves an [`AuditEntry`] behind.
//!
//! All operations go through [`Engine`] and take an [`Authority`] describing
//! who is calling.

pub use access::{Authority, Permission, Role};
pub use audit::{AuditAction, AuditEntry};
pub use commands::{MovementCmd, OpenRegisterCmd};
pub use error::EngineError;
pub use money::Money;
pub use movements::{Movement, MovementKind, MovementOrigin};
pub use ops::{
    BalanceCheck, ClosingReport, EgressPolicy, Engine, EngineBuilder, MovementListFilter,
    MovementSummary, SummaryLine,
};
pub use payment_methods::PaymentMethod;
pub use registers::{Register, RegisterScope};

mod access;
mod audit;
mod commands;
mod error;
mod locks;
mod money;
mod movements;
mod ops;
mod payment_methods;
mod registers;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
