use chrono::Utc;
use sea_orm::{QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::debug;
use uuid::Uuid;

use crate::{
    AuditAction, AuditEntry, Authority, EngineError, Money, Movement, MovementCmd, MovementKind,
    MovementOrigin, Permission, ResultEngine, audit, locks, movements, payment_methods, registers,
    util::{is_unique_violation, normalize_optional_text},
};

use super::{EgressPolicy, Engine, replay, retry_transient, with_tx};

mod list;

pub use list::MovementListFilter;

enum Appended {
    New(Movement),
    /// The idempotency key matched a persisted movement; nothing was written.
    Replayed(Movement),
}

/// Everything the caller controls must match for a key to be replayed.
fn same_payload(existing: &Movement, cmd: &MovementCmd) -> bool {
    existing.kind == cmd.kind
        && existing.amount == cmd.amount
        && existing.payment_method_id == cmd.payment_method_id
        && existing.origin == cmd.origin
        && existing.origin_ref == cmd.origin_ref
        && existing.description == cmd.description.as_deref().unwrap_or_default()
}

impl Engine {
    /// Appends a movement to an open register and returns it with its
    /// `resulting_balance`.
    ///
    /// Reading the balance, checking the egress policy, inserting the
    /// movement, updating the materialized balance and writing the audit
    /// entry happen in one unit under the register lock.
    ///
    /// A command carrying an already-used `idempotency_key` returns the
    /// persisted movement without side effects, once the register has been
    /// checked open and reachable by `authority`. Reusing a key with a
    /// different payload is a [`EngineError::Conflict`].
    pub async fn append_movement(
        &self,
        authority: &Authority,
        cmd: MovementCmd,
    ) -> ResultEngine<Movement> {
        let register_id = cmd.register_id;
        match self.append_movement_locked(authority, cmd).await {
            Ok(Appended::New(movement)) => {
                debug!(
                    %register_id,
                    movement_id = %movement.id,
                    sequence = movement.sequence,
                    kind = movement.kind.as_str(),
                    amount = %movement.amount,
                    resulting_balance = %movement.resulting_balance,
                    "movement appended"
                );
                Ok(movement)
            }
            Ok(Appended::Replayed(movement)) => {
                debug!(
                    %register_id,
                    movement_id = %movement.id,
                    sequence = movement.sequence,
                    "idempotent append replayed"
                );
                Ok(movement)
            }
            Err(err) => {
                self.log_failure(authority, Some(register_id), "append movement", &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Records the payment of a purchase as an outflow.
    pub async fn record_purchase_payment(
        &self,
        authority: &Authority,
        register_id: Uuid,
        amount: Money,
        payment_method_id: Uuid,
        purchase_ref: &str,
        idempotency_key: Option<&str>,
    ) -> ResultEngine<Movement> {
        let mut cmd = MovementCmd::outflow(register_id, amount, payment_method_id)
            .description(format!("Purchase {purchase_ref}"))
            .origin(MovementOrigin::Purchase, Some(purchase_ref.to_string()));
        if let Some(key) = idempotency_key {
            cmd = cmd.idempotency_key(key);
        }
        self.append_movement(authority, cmd).await
    }

    /// Records money collected for a sale/order as an inflow.
    pub async fn record_sale_collection(
        &self,
        authority: &Authority,
        register_id: Uuid,
        amount: Money,
        payment_method_id: Uuid,
        order_ref: &str,
        idempotency_key: Option<&str>,
    ) -> ResultEngine<Movement> {
        let mut cmd = MovementCmd::inflow(register_id, amount, payment_method_id)
            .description(format!("Sale {order_ref}"))
            .origin(MovementOrigin::Sale, Some(order_ref.to_string()));
        if let Some(key) = idempotency_key {
            cmd = cmd.idempotency_key(key);
        }
        self.append_movement(authority, cmd).await
    }

    async fn append_movement_locked(
        &self,
        authority: &Authority,
        cmd: MovementCmd,
    ) -> ResultEngine<Appended> {
        authority.require(Permission::AddMovement)?;
        if !cmd.amount.is_positive() {
            return Err(EngineError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        let cmd = MovementCmd {
            description: normalize_optional_text(cmd.description.as_deref()),
            origin_ref: normalize_optional_text(cmd.origin_ref.as_deref()),
            idempotency_key: normalize_optional_text(cmd.idempotency_key.as_deref()),
            ..cmd
        };

        let _guard = self
            .locks
            .acquire(locks::register_key(cmd.register_id))
            .await;
        retry_transient!(
            "append movement",
            self.append_movement_once(authority, &cmd).await
        )
    }

    async fn append_movement_once(
        &self,
        authority: &Authority,
        cmd: &MovementCmd,
    ) -> ResultEngine<Appended> {
        let register_id = cmd.register_id;
        with_tx!(self, |db_tx| {
            Self::touch_register(&db_tx, register_id).await?;

            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            if register.closed {
                return Err(EngineError::Conflict(format!(
                    "register {register_id} is closed"
                )));
            }

            if let Some(key) = cmd.idempotency_key.as_deref() {
                let existing = movements::Entity::find()
                    .filter(movements::Column::RegisterId.eq(register_id.to_string()))
                    .filter(movements::Column::IdempotencyKey.eq(key.to_string()))
                    .one(&db_tx)
                    .await?;
                if let Some(existing) = existing {
                    // Dropping the transaction rolls the revision bump back.
                    let existing = Movement::try_from(existing)?;
                    if !same_payload(&existing, cmd) {
                        return Err(EngineError::Conflict(format!(
                            "idempotency key {key} already used for a different movement"
                        )));
                    }
                    return Ok(Appended::Replayed(existing));
                }
            }

            let method = payment_methods::Entity::find_by_id(cmd.payment_method_id.to_string())
                .one(&db_tx)
                .await?
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "unknown payment method {}",
                        cmd.payment_method_id
                    ))
                })?;

            let replayed = replay(&db_tx, &register).await?;
            let balance_before = replayed.balance;
            if cmd.kind == MovementKind::Outflow
                && self.egress_policy == EgressPolicy::RejectOverdraft
                && cmd.amount > balance_before
            {
                return Err(EngineError::InsufficientBalance(format!(
                    "outflow of {} exceeds the register balance of {balance_before}",
                    cmd.amount
                )));
            }
            let balance_after = cmd.kind.apply(balance_before, cmd.amount)?;

            let movement = Movement {
                id: Uuid::new_v4(),
                register_id,
                sequence: replayed.last_sequence + 1,
                occurred_at: Utc::now(),
                kind: cmd.kind,
                payment_method_id: cmd.payment_method_id,
                amount: cmd.amount,
                description: cmd.description.clone().unwrap_or_default(),
                origin: cmd.origin,
                origin_ref: cmd.origin_ref.clone(),
                created_by: authority.actor().to_string(),
                resulting_balance: balance_after,
                idempotency_key: cmd.idempotency_key.clone(),
            };
            if let Err(err) = movements::ActiveModel::from(&movement).insert(&db_tx).await {
                if is_unique_violation(&err) {
                    return Err(EngineError::Conflict(format!(
                        "concurrent append on register {register_id}"
                    )));
                }
                return Err(err.into());
            }

            registers::Entity::update_many()
                .col_expr(
                    registers::Column::BalanceMinor,
                    Expr::value(balance_after.cents()),
                )
                .filter(registers::Column::Id.eq(register_id.to_string()))
                .exec(&db_tx)
                .await?;

            let entry = AuditEntry::new(
                AuditAction::MovementAdd,
                authority.actor(),
                format!(
                    "{} of {} via {}: balance {balance_before} -> {balance_after}",
                    movement.kind.as_str(),
                    movement.amount,
                    method.name
                ),
                authority.source_address.as_deref(),
            )?
            .register(register_id)
            .movement(movement.id);
            audit::ActiveModel::from(&entry).insert(&db_tx).await?;

            Ok::<_, EngineError>(Appended::New(movement))
        })
    }

    /// Balance replayed from the full movement history:
    /// `initial + Σinflows − Σoutflows`.
    pub async fn current_balance(
        &self,
        authority: &Authority,
        register_id: Uuid,
    ) -> ResultEngine<Money> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            Ok::<_, EngineError>(replay(&db_tx, &register).await?.balance)
        })
    }

    /// Return a movement snapshot from DB.
    pub async fn movement(&self, authority: &Authority, movement_id: Uuid) -> ResultEngine<Movement> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let model = movements::Entity::find_by_id(movement_id.to_string())
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("movement {movement_id}")))?;
            let movement = Movement::try_from(model)?;
            let (register, _) = Self::require_register(&db_tx, movement.register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            Ok::<_, EngineError>(movement)
        })
    }

    /// Full movement history of a register in append order.
    pub async fn register_history(
        &self,
        authority: &Authority,
        register_id: Uuid,
    ) -> ResultEngine<Vec<Movement>> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;
            let models = movements::Entity::find()
                .filter(movements::Column::RegisterId.eq(register_id.to_string()))
                .order_by_asc(movements::Column::Sequence)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Movement::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }
}
