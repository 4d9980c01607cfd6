use std::collections::HashMap;

use sea_orm::{FromQueryResult, QueryFilter, QuerySelect, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    Authority, EngineError, Money, MovementKind, Permission, ResultEngine, locks, movements,
    payment_methods, registers, util::parse_uuid,
};

use super::{Engine, replay, retry_transient, with_tx};

/// Totals of one `(kind, payment method)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SummaryLine {
    pub kind: MovementKind,
    pub payment_method_id: Uuid,
    pub payment_method: String,
    pub movements: u64,
    pub total: Money,
}

/// Aggregated view of a register's movement history, for exports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MovementSummary {
    pub register_id: Uuid,
    pub initial_balance: Money,
    pub total_inflow: Money,
    pub total_outflow: Money,
    pub balance: Money,
    pub movements: u64,
    pub lines: Vec<SummaryLine>,
}

/// Materialized balance compared with a full replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub register_id: Uuid,
    pub materialized: Money,
    pub replayed: Money,
}

impl BalanceCheck {
    /// `materialized - replayed`.
    #[must_use]
    pub fn drift(&self) -> Money {
        self.materialized - self.replayed
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.drift().is_zero()
    }
}

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    kind: String,
    payment_method_id: String,
    movements: i64,
    total: i64,
}

impl Engine {
    /// Totals per `(kind, payment method)` plus overall inflow/outflow.
    pub async fn movement_summary(
        &self,
        authority: &Authority,
        register_id: Uuid,
    ) -> ResultEngine<MovementSummary> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            let replayed = replay(&db_tx, &register).await?;

            let rows: Vec<SummaryRow> = movements::Entity::find()
                .select_only()
                .column(movements::Column::Kind)
                .column(movements::Column::PaymentMethodId)
                .column_as(movements::Column::Id.count(), "movements")
                .column_as(movements::Column::AmountMinor.sum(), "total")
                .filter(movements::Column::RegisterId.eq(register_id.to_string()))
                .group_by(movements::Column::Kind)
                .group_by(movements::Column::PaymentMethodId)
                .into_model::<SummaryRow>()
                .all(&db_tx)
                .await?;

            let method_ids: Vec<String> = rows.iter().map(|r| r.payment_method_id.clone()).collect();
            let names: HashMap<String, String> = payment_methods::Entity::find()
                .filter(payment_methods::Column::Id.is_in(method_ids))
                .all(&db_tx)
                .await?
                .into_iter()
                .map(|m| (m.id, m.name))
                .collect();

            let mut lines = Vec::with_capacity(rows.len());
            for row in rows {
                lines.push(SummaryLine {
                    kind: MovementKind::try_from(row.kind.as_str())?,
                    payment_method_id: parse_uuid(&row.payment_method_id, "payment method")?,
                    payment_method: names
                        .get(&row.payment_method_id)
                        .cloned()
                        .unwrap_or_default(),
                    movements: u64::try_from(row.movements).unwrap_or_default(),
                    total: Money::new(row.total),
                });
            }
            lines.sort_by(|a, b| {
                (a.kind.as_str(), &a.payment_method).cmp(&(b.kind.as_str(), &b.payment_method))
            });

            Ok::<_, EngineError>(MovementSummary {
                register_id,
                initial_balance: register.initial_balance,
                total_inflow: replayed.total_inflow,
                total_outflow: replayed.total_outflow,
                balance: replayed.balance,
                movements: replayed.movements,
                lines,
            })
        })
    }

    /// Compares the materialized balance with a replay of the history.
    pub async fn verify_register_balance(
        &self,
        authority: &Authority,
        register_id: Uuid,
    ) -> ResultEngine<BalanceCheck> {
        authority.require(Permission::ViewLedger)?;
        let check = with_tx!(self, |db_tx| {
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            let replayed = replay(&db_tx, &register).await?;
            Ok::<_, EngineError>(BalanceCheck {
                register_id,
                materialized: register.balance,
                replayed: replayed.balance,
            })
        })?;
        if !check.is_consistent() {
            warn!(
                %register_id,
                materialized = %check.materialized,
                replayed = %check.replayed,
                "register balance drifted from its history"
            );
        }
        Ok(check)
    }

    /// Rewrites the materialized balance of an open register from the
    /// replayed history. Returns the check taken before the rewrite.
    pub async fn recompute_register_balance(
        &self,
        authority: &Authority,
        register_id: Uuid,
    ) -> ResultEngine<BalanceCheck> {
        authority.require(Permission::RepairLedger)?;
        let _guard = self.locks.acquire(locks::register_key(register_id)).await;
        let check = retry_transient!(
            "recompute register balance",
            self.recompute_register_balance_once(register_id).await
        )?;
        if !check.is_consistent() {
            info!(
                %register_id,
                drift = %check.drift(),
                balance = %check.replayed,
                "register balance recomputed"
            );
        }
        Ok(check)
    }

    async fn recompute_register_balance_once(
        &self,
        register_id: Uuid,
    ) -> ResultEngine<BalanceCheck> {
        with_tx!(self, |db_tx| {
            Self::touch_register(&db_tx, register_id).await?;
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            if register.closed {
                return Err(EngineError::Conflict(format!(
                    "register {register_id} is closed"
                )));
            }
            let replayed = replay(&db_tx, &register).await?;
            registers::Entity::update_many()
                .col_expr(
                    registers::Column::BalanceMinor,
                    Expr::value(replayed.balance.cents()),
                )
                .filter(registers::Column::Id.eq(register_id.to_string()))
                .exec(&db_tx)
                .await?;
            Ok::<_, EngineError>(BalanceCheck {
                register_id,
                materialized: register.balance,
                replayed: replayed.balance,
            })
        })
    }
}
