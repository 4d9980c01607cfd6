use chrono::Utc;
use sea_orm::{ActiveValue, QueryFilter, QueryOrder, QuerySelect, TransactionTrait, prelude::*};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    AuditAction, AuditEntry, Authority, EngineError, Money, OpenRegisterCmd, Permission,
    Register, ResultEngine, audit, locks, registers,
    util::{is_unique_violation, normalize_optional_text},
};

use super::{Engine, replay, retry_transient, with_tx};

const DEFAULT_DESCRIPTION: &str = "Register opening";

/// Outcome of reconciling a register at close time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClosingReport {
    pub register: Register,
    /// Balance replayed from the movement history at the instant of closing.
    pub system_balance: Money,
    pub physical_amount: Money,
    /// `physical_amount - system_balance`.
    pub discrepancy: Money,
    pub within_tolerance: bool,
}

impl Engine {
    /// Opens a register in the scope derived from `cmd.operator`, falling
    /// back to the operator bound to `authority`.
    ///
    /// Fails with [`EngineError::Conflict`] when the scope already has an
    /// open register. The check and the insert are one unit: the scope lock
    /// serializes callers in this process and the unique `open_scope` index
    /// rejects anyone else.
    pub async fn open_register(
        &self,
        authority: &Authority,
        cmd: OpenRegisterCmd,
    ) -> ResultEngine<Register> {
        authority.require(Permission::OpenRegister)?;
        let operator = normalize_optional_text(cmd.operator.as_deref())
            .or_else(|| normalize_optional_text(authority.operator.as_deref()));
        authority.ensure_operator(operator.as_deref())?;
        if cmd.initial_balance.is_negative() {
            return Err(EngineError::Validation(
                "initial balance must not be negative".to_string(),
            ));
        }
        let tolerance = cmd.tolerance.unwrap_or(self.default_tolerance);
        if tolerance.is_negative() {
            return Err(EngineError::Validation(
                "tolerance must not be negative".to_string(),
            ));
        }
        let description = normalize_optional_text(cmd.description.as_deref())
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
        let scope = self.register_scope.key(operator.as_deref());

        let guard = self.locks.acquire(locks::scope_key(&scope)).await;
        let result = retry_transient!(
            "open register",
            self.open_register_once(
                authority,
                operator.as_deref(),
                &description,
                cmd.initial_balance,
                tolerance,
                &scope,
            )
            .await
        );
        drop(guard);

        match result {
            Ok(register) => {
                info!(
                    register_id = %register.id,
                    scope = %scope,
                    actor = authority.actor(),
                    initial_balance = %register.initial_balance,
                    "register opened"
                );
                Ok(register)
            }
            Err(err) => {
                let blocking = match err {
                    EngineError::Conflict(_) => self
                        .find_open_register(&scope)
                        .await
                        .ok()
                        .flatten()
                        .map(|register| register.id),
                    _ => None,
                };
                self.log_failure(authority, blocking, "open register", &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn open_register_once(
        &self,
        authority: &Authority,
        operator: Option<&str>,
        description: &str,
        initial_balance: Money,
        tolerance: Money,
        scope: &str,
    ) -> ResultEngine<Register> {
        let register = Register::open(
            operator.map(ToString::to_string),
            description.to_string(),
            authority.actor().to_string(),
            initial_balance,
            tolerance,
            Utc::now(),
        );
        let entry = AuditEntry::new(
            AuditAction::Open,
            authority.actor(),
            format!("opened with initial balance {initial_balance}"),
            authority.source_address.as_deref(),
        )?
        .register(register.id);

        with_tx!(self, |db_tx| {
            // The insert is the existence check: `open_scope` is unique.
            if let Err(err) = registers::ActiveModel::from_register(&register, scope)
                .insert(&db_tx)
                .await
            {
                if is_unique_violation(&err) {
                    return Err(EngineError::Conflict(format!(
                        "a register is already open for {scope}"
                    )));
                }
                return Err(err.into());
            }
            audit::ActiveModel::from(&entry).insert(&db_tx).await?;
            Ok::<_, EngineError>(register)
        })
    }

    /// Closes a register and reconciles it against `physical_amount`.
    ///
    /// The system balance is replayed from the movement history inside the
    /// same unit that marks the register closed, so no append can slip in
    /// between. Closing is terminal.
    pub async fn close_register(
        &self,
        authority: &Authority,
        register_id: Uuid,
        physical_amount: Money,
    ) -> ResultEngine<ClosingReport> {
        let result = self
            .close_register_locked(authority, register_id, physical_amount)
            .await;
        match result {
            Ok(report) => {
                info!(
                    %register_id,
                    actor = authority.actor(),
                    system_balance = %report.system_balance,
                    physical_amount = %report.physical_amount,
                    discrepancy = %report.discrepancy,
                    within_tolerance = report.within_tolerance,
                    "register closed"
                );
                Ok(report)
            }
            Err(err) => {
                self.log_failure(authority, Some(register_id), "close register", &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn close_register_locked(
        &self,
        authority: &Authority,
        register_id: Uuid,
        physical_amount: Money,
    ) -> ResultEngine<ClosingReport> {
        authority.require(Permission::CloseRegister)?;
        if physical_amount.is_negative() {
            return Err(EngineError::Validation(
                "physical amount must not be negative".to_string(),
            ));
        }
        let _guard = self.locks.acquire(locks::register_key(register_id)).await;
        retry_transient!(
            "close register",
            self.close_register_once(authority, register_id, physical_amount)
                .await
        )
    }

    async fn close_register_once(
        &self,
        authority: &Authority,
        register_id: Uuid,
        physical_amount: Money,
    ) -> ResultEngine<ClosingReport> {
        with_tx!(self, |db_tx| {
            Self::touch_register(&db_tx, register_id).await?;
            let (register, model) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            if register.closed {
                return Err(EngineError::Conflict(format!(
                    "register {register_id} is already closed"
                )));
            }

            let system_balance = replay(&db_tx, &register).await?.balance;
            let discrepancy = physical_amount
                .checked_sub(system_balance)
                .ok_or_else(|| EngineError::Validation("discrepancy overflow".to_string()))?;

            let mut active: registers::ActiveModel = model.into();
            active.open_scope = ActiveValue::Set(None);
            active.closed = ActiveValue::Set(true);
            active.closed_at = ActiveValue::Set(Some(Utc::now()));
            active.closed_by = ActiveValue::Set(Some(authority.actor().to_string()));
            active.physical_count_minor = ActiveValue::Set(physical_amount.cents());
            active.system_balance_minor = ActiveValue::Set(system_balance.cents());
            active.discrepancy_minor = ActiveValue::Set(discrepancy.cents());
            active.balance_minor = ActiveValue::Set(system_balance.cents());
            let closed = Register::try_from(active.update(&db_tx).await?)?;

            let entry = AuditEntry::new(
                AuditAction::Close,
                authority.actor(),
                format!(
                    "closed: system {system_balance}, physical {physical_amount}, discrepancy {discrepancy}"
                ),
                authority.source_address.as_deref(),
            )?
            .register(register_id);
            audit::ActiveModel::from(&entry).insert(&db_tx).await?;

            let within_tolerance = closed.within_tolerance(discrepancy);
            Ok::<_, EngineError>(ClosingReport {
                register: closed,
                system_balance,
                physical_amount,
                discrepancy,
                within_tolerance,
            })
        })
    }

    /// Return a register snapshot from DB.
    pub async fn register(&self, authority: &Authority, register_id: Uuid) -> ResultEngine<Register> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            Ok::<_, EngineError>(register)
        })
    }

    /// The open register in `operator`'s scope, if any.
    pub async fn open_register_for(
        &self,
        authority: &Authority,
        operator: Option<&str>,
    ) -> ResultEngine<Option<Register>> {
        authority.require(Permission::ViewLedger)?;
        let operator = normalize_optional_text(operator);
        authority.ensure_operator(operator.as_deref())?;
        let scope = self.register_scope.key(operator.as_deref());
        self.find_open_register(&scope).await
    }

    /// Returns `true` when `operator` still holds an open till.
    pub async fn has_open_register(
        &self,
        authority: &Authority,
        operator: Option<&str>,
    ) -> ResultEngine<bool> {
        Ok(self.open_register_for(authority, operator).await?.is_some())
    }

    /// Most recent registers of `operator` (`None`: the general till), newest
    /// first.
    pub async fn registers_for_operator(
        &self,
        authority: &Authority,
        operator: Option<&str>,
        limit: u64,
    ) -> ResultEngine<Vec<Register>> {
        authority.require(Permission::ViewLedger)?;
        let operator = normalize_optional_text(operator);
        authority.ensure_operator(operator.as_deref())?;
        with_tx!(self, |db_tx| {
            let query = registers::Entity::find();
            let query = match &operator {
                Some(operator) => query.filter(registers::Column::Operator.eq(operator.clone())),
                None => query.filter(registers::Column::Operator.is_null()),
            };
            let models = query
                .order_by_desc(registers::Column::OpenedAt)
                .order_by_desc(registers::Column::Id)
                .limit(limit)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Register::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// Final balance of the most recently closed register in `operator`'s
    /// scope. Callers may seed the next opening with it.
    pub async fn last_closing_balance(
        &self,
        authority: &Authority,
        operator: Option<&str>,
    ) -> ResultEngine<Option<Money>> {
        authority.require(Permission::ViewLedger)?;
        let operator = normalize_optional_text(operator);
        authority.ensure_operator(operator.as_deref())?;
        let scope = self.register_scope.key(operator.as_deref());
        with_tx!(self, |db_tx| {
            let model = registers::Entity::find()
                .filter(registers::Column::Scope.eq(scope.clone()))
                .filter(registers::Column::Closed.eq(true))
                .order_by_desc(registers::Column::ClosedAt)
                .one(&db_tx)
                .await?;
            Ok::<_, EngineError>(model.map(|m| Money::new(m.system_balance_minor)))
        })
    }

    async fn find_open_register(&self, scope: &str) -> ResultEngine<Option<Register>> {
        with_tx!(self, |db_tx| {
            let model = registers::Entity::find()
                .filter(registers::Column::OpenScope.eq(scope.to_string()))
                .one(&db_tx)
                .await?;
            model.map(Register::try_from).transpose()
        })
    }
}
