use sea_orm::{
    ConnectionTrait, DatabaseConnection, FromQueryResult, QueryFilter, QuerySelect,
    TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    AuditAction, AuditEntry, Authority, EngineError, Money, MovementKind, Register,
    RegisterScope, ResultEngine, locks::LockMap,
};

mod audit;
mod movements;
mod payment_methods;
mod registers;
mod reports;

pub use movements::MovementListFilter;
pub use registers::ClosingReport;
pub use reports::{BalanceCheck, MovementSummary, SummaryLine};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

/// Evaluate a unit of work and evaluate it once more if the storage rejected
/// it with a transient failure. A second transient failure surfaces as
/// [`EngineError::Transient`].
macro_rules! retry_transient {
    ($operation:expr, $attempt:expr) => {{
        match $attempt {
            Err(EngineError::Database(err)) if crate::util::is_transient(&err) => {
                tracing::warn!(operation = $operation, error = %err, "transient failure, retrying");
                match $attempt {
                    Err(EngineError::Database(err)) if crate::util::is_transient(&err) => Err(
                        EngineError::Transient(format!("{} gave up after retry: {err}", $operation)),
                    ),
                    other => other,
                }
            }
            other => other,
        }
    }};
}

pub(crate) use retry_transient;
pub(crate) use with_tx;

/// What the ledger does with an outflow larger than the current balance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressPolicy {
    /// Refuse with [`EngineError::InsufficientBalance`].
    #[default]
    RejectOverdraft,
    /// Let the balance go negative.
    AllowNegative,
}

impl TryFrom<&str> for EgressPolicy {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "reject_overdraft" => Ok(Self::RejectOverdraft),
            "allow_negative" => Ok(Self::AllowNegative),
            other => Err(EngineError::Validation(format!(
                "invalid egress policy: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Engine {
    database: DatabaseConnection,
    locks: LockMap,
    egress_policy: EgressPolicy,
    register_scope: RegisterScope,
    default_tolerance: Money,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    #[must_use]
    pub fn egress_policy(&self) -> EgressPolicy {
        self.egress_policy
    }

    #[must_use]
    pub fn register_scope(&self) -> RegisterScope {
        self.register_scope
    }

    #[must_use]
    pub fn default_tolerance(&self) -> Money {
        self.default_tolerance
    }

    /// Bumps the register revision so the transaction owns the row before
    /// anything is read from it.
    async fn touch_register<C: ConnectionTrait>(db: &C, register_id: Uuid) -> ResultEngine<()> {
        let updated = crate::registers::Entity::update_many()
            .col_expr(crate::registers::Column::Revision, Expr::cust("revision + 1"))
            .filter(crate::registers::Column::Id.eq(register_id.to_string()))
            .exec(db)
            .await?;
        if updated.rows_affected == 0 {
            return Err(EngineError::NotFound(format!("register {register_id}")));
        }
        Ok(())
    }

    async fn require_register<C: ConnectionTrait>(
        db: &C,
        register_id: Uuid,
    ) -> ResultEngine<(Register, crate::registers::Model)> {
        let model = crate::registers::Entity::find_by_id(register_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("register {register_id}")))?;
        let register = Register::try_from(model.clone())?;
        Ok((register, model))
    }

    /// Writes an `error` audit entry for a failed unit of work, in its own
    /// transaction, when the failure concerns an existing register.
    async fn log_failure(
        &self,
        authority: &Authority,
        register_id: Option<Uuid>,
        operation: &str,
        err: &EngineError,
    ) {
        let Some(register_id) = register_id else {
            return;
        };
        if let Err(log_err) = self
            .try_log_failure(authority, register_id, operation, err)
            .await
        {
            warn!(%register_id, operation, error = %log_err, "could not write error audit entry");
        }
    }

    async fn try_log_failure(
        &self,
        authority: &Authority,
        register_id: Uuid,
        operation: &str,
        err: &EngineError,
    ) -> ResultEngine<()> {
        let entry = AuditEntry::new(
            AuditAction::Failure,
            authority.actor(),
            format!("{operation} failed ({}): {}", err.kind(), err.detail()),
            authority.source_address.as_deref(),
        )?
        .register(register_id);
        with_tx!(self, |db_tx| {
            let exists = crate::registers::Entity::find_by_id(register_id.to_string())
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                crate::audit::ActiveModel::from(&entry).insert(&db_tx).await?;
                warn!(%register_id, operation, kind = err.kind(), "recorded failure in audit log");
            }
            Ok::<(), EngineError>(())
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct KindTotalRow {
    kind: String,
    total: i64,
    movements: i64,
    last_sequence: i64,
}

/// Aggregate of a register's movement history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Replay {
    pub(crate) total_inflow: Money,
    pub(crate) total_outflow: Money,
    pub(crate) movements: u64,
    pub(crate) last_sequence: i64,
    /// `initial + inflows - outflows`.
    pub(crate) balance: Money,
}

/// Replays the whole movement history of `register` from its initial balance.
///
/// Never reads the materialized `balance_minor`.
pub(crate) async fn replay<C: ConnectionTrait>(db: &C, register: &Register) -> ResultEngine<Replay> {
    let rows: Vec<KindTotalRow> = crate::movements::Entity::find()
        .select_only()
        .column(crate::movements::Column::Kind)
        .column_as(crate::movements::Column::AmountMinor.sum(), "total")
        .column_as(crate::movements::Column::Id.count(), "movements")
        .column_as(crate::movements::Column::Sequence.max(), "last_sequence")
        .filter(crate::movements::Column::RegisterId.eq(register.id.to_string()))
        .group_by(crate::movements::Column::Kind)
        .into_model::<KindTotalRow>()
        .all(db)
        .await?;

    let mut total_inflow = Money::ZERO;
    let mut total_outflow = Money::ZERO;
    let mut count = 0u64;
    let mut last_sequence = 0i64;
    for row in rows {
        let total = Money::new(row.total);
        match MovementKind::try_from(row.kind.as_str())? {
            MovementKind::Inflow => total_inflow = total,
            MovementKind::Outflow => total_outflow = total,
        }
        count += u64::try_from(row.movements).unwrap_or_default();
        last_sequence = last_sequence.max(row.last_sequence);
    }

    let balance = register
        .initial_balance
        .checked_add(total_inflow)
        .and_then(|b| b.checked_sub(total_outflow))
        .ok_or_else(|| EngineError::Validation("balance overflow".to_string()))?;

    Ok(Replay {
        total_inflow,
        total_outflow,
        movements: count,
        last_sequence,
        balance,
    })
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    egress_policy: EgressPolicy,
    register_scope: RegisterScope,
    default_tolerance: Option<Money>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    pub fn egress_policy(mut self, policy: EgressPolicy) -> EngineBuilder {
        self.egress_policy = policy;
        self
    }

    pub fn register_scope(mut self, scope: RegisterScope) -> EngineBuilder {
        self.register_scope = scope;
        self
    }

    /// Tolerance applied to registers opened without an explicit one
    /// (100.00 when unset).
    pub fn default_tolerance(mut self, tolerance: Money) -> EngineBuilder {
        self.default_tolerance = Some(tolerance);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let default_tolerance = self.default_tolerance.unwrap_or(Money::new(10_000));
        if default_tolerance.is_negative() {
            return Err(EngineError::Validation(
                "default tolerance must not be negative".to_string(),
            ));
        }
        Ok(Engine {
            database: self.database,
            locks: LockMap::default(),
            egress_policy: self.egress_policy,
            register_scope: self.register_scope,
            default_tolerance,
        })
    }
}
