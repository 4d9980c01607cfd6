//! Movement primitives.
//!
//! A [`Movement`] is a single cash inflow or outflow recorded against an open
//! register. Movements are append-only: once persisted they are never
//! updated or deleted, and each one carries a snapshot of the register
//! balance right after it was applied.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Money, ResultEngine, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Cash entering the till (INGRESO).
    Inflow,
    /// Cash leaving the till (EGRESO).
    Outflow,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
        }
    }

    /// Applies `amount` to `balance` in the direction of this kind.
    pub(crate) fn apply(self, balance: Money, amount: Money) -> ResultEngine<Money> {
        let next = match self {
            Self::Inflow => balance.checked_add(amount),
            Self::Outflow => balance.checked_sub(amount),
        };
        next.ok_or_else(|| EngineError::Validation("balance overflow".to_string()))
    }
}

impl TryFrom<&str> for MovementKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "inflow" => Ok(Self::Inflow),
            "outflow" => Ok(Self::Outflow),
            other => Err(EngineError::Validation(format!(
                "invalid movement kind: {other}"
            ))),
        }
    }
}

/// The business event that produced a movement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOrigin {
    #[default]
    Manual,
    Purchase,
    Sale,
}

impl MovementOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Purchase => "purchase",
            Self::Sale => "sale",
        }
    }
}

impl TryFrom<&str> for MovementOrigin {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "manual" => Ok(Self::Manual),
            "purchase" => Ok(Self::Purchase),
            "sale" => Ok(Self::Sale),
            other => Err(EngineError::Validation(format!(
                "invalid movement origin: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub register_id: Uuid,
    /// Position in the register history, starting at 1.
    pub sequence: i64,
    pub occurred_at: DateTime<Utc>,
    pub kind: MovementKind,
    pub payment_method_id: Uuid,
    pub amount: Money,
    pub description: String,
    pub origin: MovementOrigin,
    /// Loose reference to the purchase/order that produced the movement.
    pub origin_ref: Option<String>,
    pub created_by: String,
    pub resulting_balance: Money,
    pub idempotency_key: Option<String>,
}

impl Movement {
    /// Signed effect of this movement on the register balance.
    #[must_use]
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            MovementKind::Inflow => self.amount,
            MovementKind::Outflow => -self.amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub register_id: String,
    pub sequence: i64,
    pub occurred_at: DateTimeUtc,
    pub kind: String,
    pub payment_method_id: String,
    pub amount_minor: i64,
    pub description: String,
    pub origin: String,
    pub origin_ref: Option<String>,
    pub created_by: String,
    pub resulting_balance_minor: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::registers::Entity",
        from = "Column::RegisterId",
        to = "super::registers::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Registers,
    #[sea_orm(
        belongs_to = "super::payment_methods::Entity",
        from = "Column::PaymentMethodId",
        to = "super::payment_methods::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    PaymentMethods,
}

impl Related<super::registers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Registers.def()
    }
}

impl Related<super::payment_methods::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentMethods.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Movement> for ActiveModel {
    fn from(movement: &Movement) -> Self {
        Self {
            id: ActiveValue::Set(movement.id.to_string()),
            register_id: ActiveValue::Set(movement.register_id.to_string()),
            sequence: ActiveValue::Set(movement.sequence),
            occurred_at: ActiveValue::Set(movement.occurred_at),
            kind: ActiveValue::Set(movement.kind.as_str().to_string()),
            payment_method_id: ActiveValue::Set(movement.payment_method_id.to_string()),
            amount_minor: ActiveValue::Set(movement.amount.cents()),
            description: ActiveValue::Set(movement.description.clone()),
            origin: ActiveValue::Set(movement.origin.as_str().to_string()),
            origin_ref: ActiveValue::Set(movement.origin_ref.clone()),
            created_by: ActiveValue::Set(movement.created_by.clone()),
            resulting_balance_minor: ActiveValue::Set(movement.resulting_balance.cents()),
            idempotency_key: ActiveValue::Set(movement.idempotency_key.clone()),
        }
    }
}

impl TryFrom<Model> for Movement {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "movement")?,
            register_id: parse_uuid(&model.register_id, "register")?,
            sequence: model.sequence,
            occurred_at: model.occurred_at,
            kind: MovementKind::try_from(model.kind.as_str())?,
            payment_method_id: parse_uuid(&model.payment_method_id, "payment method")?,
            amount: Money::new(model.amount_minor),
            description: model.description,
            origin: MovementOrigin::try_from(model.origin.as_str())?,
            origin_ref: model.origin_ref,
            created_by: model.created_by,
            resulting_balance: Money::new(model.resulting_balance_minor),
            idempotency_key: model.idempotency_key,
        })
    }
}
