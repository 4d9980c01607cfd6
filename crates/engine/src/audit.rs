//! Append-only audit trail of register lifecycle and movement events.
//!
//! The ledger only ever inserts into this table. Entries are read back by
//! inspection tooling, never by the ledger itself.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, ResultEngine,
    util::{parse_optional_uuid, parse_uuid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Open,
    Close,
    MovementAdd,
    /// A terminal failure in a unit of work that named a register.
    #[serde(rename = "error")]
    Failure,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::MovementAdd => "movement_add",
            Self::Failure => "error",
        }
    }
}

impl TryFrom<&str> for AuditAction {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "movement_add" => Ok(Self::MovementAdd),
            "error" => Ok(Self::Failure),
            other => Err(EngineError::Validation(format!(
                "invalid audit action: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub register_id: Option<Uuid>,
    pub movement_id: Option<Uuid>,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub action: AuditAction,
    pub detail: String,
    pub source_address: Option<String>,
}

impl AuditEntry {
    pub(crate) fn new(
        action: AuditAction,
        actor: &str,
        detail: impl Into<String>,
        source_address: Option<&str>,
    ) -> ResultEngine<Self> {
        if actor.trim().is_empty() {
            return Err(EngineError::Validation(
                "audit entry requires an actor".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            register_id: None,
            movement_id: None,
            actor: actor.to_string(),
            occurred_at: Utc::now(),
            action,
            detail: detail.into(),
            source_address: source_address.map(ToString::to_string),
        })
    }

    #[must_use]
    pub(crate) fn register(mut self, register_id: Uuid) -> Self {
        self.register_id = Some(register_id);
        self
    }

    #[must_use]
    pub(crate) fn movement(mut self, movement_id: Uuid) -> Self {
        self.movement_id = Some(movement_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub register_id: Option<String>,
    pub movement_id: Option<String>,
    pub actor: String,
    pub occurred_at: DateTimeUtc,
    pub action: String,
    pub detail: String,
    pub source_address: Option<String>,
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
        belongs_to = "super::movements::Entity",
        from = "Column::MovementId",
        to = "super::movements::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Movements,
}

impl Related<super::registers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Registers.def()
    }
}

impl Related<super::movements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Movements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&AuditEntry> for ActiveModel {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            id: ActiveValue::Set(entry.id.to_string()),
            register_id: ActiveValue::Set(entry.register_id.map(|id| id.to_string())),
            movement_id: ActiveValue::Set(entry.movement_id.map(|id| id.to_string())),
            actor: ActiveValue::Set(entry.actor.clone()),
            occurred_at: ActiveValue::Set(entry.occurred_at),
            action: ActiveValue::Set(entry.action.as_str().to_string()),
            detail: ActiveValue::Set(entry.detail.clone()),
            source_address: ActiveValue::Set(entry.source_address.clone()),
        }
    }
}

impl TryFrom<Model> for AuditEntry {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "audit entry")?,
            register_id: parse_optional_uuid(model.register_id.as_deref(), "register")?,
            movement_id: parse_optional_uuid(model.movement_id.as_deref(), "movement")?,
            actor: model.actor,
            occurred_at: model.occurred_at,
            action: AuditAction::try_from(model.action.as_str())?,
            detail: model.detail,
            source_address: model.source_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_requires_actor() {
        let err = AuditEntry::new(AuditAction::Open, "  ", "x", None).unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation("audit entry requires an actor".to_string())
        );
    }

    #[test]
    fn entry_links_register_and_movement() {
        let register_id = Uuid::new_v4();
        let movement_id = Uuid::new_v4();
        let entry = AuditEntry::new(AuditAction::MovementAdd, "ana", "inflow", Some("10.0.0.7"))
            .unwrap()
            .register(register_id)
            .movement(movement_id);
        assert_eq!(entry.register_id, Some(register_id));
        assert_eq!(entry.movement_id, Some(movement_id));
        assert_eq!(entry.source_address.as_deref(), Some("10.0.0.7"));
    }
}
