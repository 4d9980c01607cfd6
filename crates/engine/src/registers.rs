//! The module contains the `Register` struct (a till session) and its
//! persistence model.
//!
//! A register goes through exactly one transition: `OPEN -> CLOSED`. While
//! open it is the append target for movements; closing writes the
//! reconciliation fields once and the row is never mutated again.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Money, util::parse_uuid};

/// Scope key used for registers opened without an operator.
pub(crate) const GENERAL_SCOPE: &str = "general";

/// Decides which registers compete for the "only one open" slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterScope {
    /// One open register per operator; operator-less registers share the
    /// general till.
    #[default]
    PerOperator,
    /// One open register for the whole shop.
    Global,
}

impl RegisterScope {
    pub(crate) fn key(self, operator: Option<&str>) -> String {
        match (self, operator) {
            (Self::Global, _) => "global".to_string(),
            (Self::PerOperator, Some(operator)) => format!("operator:{operator}"),
            (Self::PerOperator, None) => GENERAL_SCOPE.to_string(),
        }
    }
}

impl TryFrom<&str> for RegisterScope {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "per_operator" => Ok(Self::PerOperator),
            "global" => Ok(Self::Global),
            other => Err(EngineError::Validation(format!(
                "invalid register scope: {other}"
            ))),
        }
    }
}

/// A till session bounded by an open and a close event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub id: Uuid,
    /// Operator owning the till; `None` for the shared general till.
    pub operator: Option<String>,
    pub description: String,
    pub opened_by: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub initial_balance: Money,
    /// Running balance maintained alongside every movement insert.
    ///
    /// Reconciliation never reads it; it only serves fast reads and drift
    /// checks against a full replay.
    pub balance: Money,
    pub physical_count: Money,
    pub system_balance: Money,
    pub discrepancy: Money,
    pub tolerance: Money,
    pub closed: bool,
}

impl Register {
    pub(crate) fn open(
        operator: Option<String>,
        description: String,
        opened_by: String,
        initial_balance: Money,
        tolerance: Money,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operator,
            description,
            opened_by,
            opened_at,
            closed_at: None,
            closed_by: None,
            initial_balance,
            balance: initial_balance,
            physical_count: Money::ZERO,
            system_balance: Money::ZERO,
            discrepancy: Money::ZERO,
            tolerance,
            closed: false,
        }
    }

    /// Returns `true` when a closing discrepancy is within the tolerance.
    #[must_use]
    pub fn within_tolerance(&self, discrepancy: Money) -> bool {
        discrepancy.abs() <= self.tolerance.abs()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "registers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub operator: Option<String>,
    pub scope: String,
    /// Equal to `scope` while open, NULL once closed (unique index).
    pub open_scope: Option<String>,
    pub description: String,
    pub opened_by: String,
    pub opened_at: DateTimeUtc,
    pub closed_at: Option<DateTimeUtc>,
    pub closed_by: Option<String>,
    pub initial_balance_minor: i64,
    pub balance_minor: i64,
    pub physical_count_minor: i64,
    pub system_balance_minor: i64,
    pub discrepancy_minor: i64,
    pub tolerance_minor: i64,
    pub closed: bool,
    pub revision: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::movements::Entity")]
    Movements,
    #[sea_orm(has_many = "super::audit::Entity")]
    AuditEntries,
}

impl Related<super::movements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Movements.def()
    }
}

impl Related<super::audit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AuditEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn from_register(register: &Register, scope: &str) -> Self {
        Self {
            id: ActiveValue::Set(register.id.to_string()),
            operator: ActiveValue::Set(register.operator.clone()),
            scope: ActiveValue::Set(scope.to_string()),
            open_scope: ActiveValue::Set((!register.closed).then(|| scope.to_string())),
            description: ActiveValue::Set(register.description.clone()),
            opened_by: ActiveValue::Set(register.opened_by.clone()),
            opened_at: ActiveValue::Set(register.opened_at),
            closed_at: ActiveValue::Set(register.closed_at),
            closed_by: ActiveValue::Set(register.closed_by.clone()),
            initial_balance_minor: ActiveValue::Set(register.initial_balance.cents()),
            balance_minor: ActiveValue::Set(register.balance.cents()),
            physical_count_minor: ActiveValue::Set(register.physical_count.cents()),
            system_balance_minor: ActiveValue::Set(register.system_balance.cents()),
            discrepancy_minor: ActiveValue::Set(register.discrepancy.cents()),
            tolerance_minor: ActiveValue::Set(register.tolerance.cents()),
            closed: ActiveValue::Set(register.closed),
            revision: ActiveValue::Set(0),
        }
    }
}

impl TryFrom<Model> for Register {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "register")?,
            operator: model.operator,
            description: model.description,
            opened_by: model.opened_by,
            opened_at: model.opened_at,
            closed_at: model.closed_at,
            closed_by: model.closed_by,
            initial_balance: Money::new(model.initial_balance_minor),
            balance: Money::new(model.balance_minor),
            physical_count: Money::new(model.physical_count_minor),
            system_balance: Money::new(model.system_balance_minor),
            discrepancy: Money::new(model.discrepancy_minor),
            tolerance: Money::new(model.tolerance_minor),
            closed: model.closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_operator_scope_separates_operators() {
        let scope = RegisterScope::PerOperator;
        assert_eq!(scope.key(Some("ana")), "operator:ana");
        assert_ne!(scope.key(Some("ana")), scope.key(Some("luis")));
        assert_eq!(scope.key(None), GENERAL_SCOPE);
    }

    #[test]
    fn global_scope_ignores_operator() {
        let scope = RegisterScope::Global;
        assert_eq!(scope.key(Some("ana")), scope.key(None));
    }

    #[test]
    fn new_register_starts_open_with_zeroed_closing_fields() {
        let register = Register::open(
            Some("ana".to_string()),
            "Register opening".to_string(),
            "ana".to_string(),
            Money::new(100_000),
            Money::new(10_000),
            Utc::now(),
        );
        assert!(!register.closed);
        assert_eq!(register.balance, register.initial_balance);
        assert!(register.closed_at.is_none());
        assert_eq!(register.physical_count, Money::ZERO);
        assert_eq!(register.system_balance, Money::ZERO);
        assert_eq!(register.discrepancy, Money::ZERO);
    }

    #[test]
    fn tolerance_is_inclusive() {
        let register = Register::open(
            None,
            String::new(),
            "ana".to_string(),
            Money::ZERO,
            Money::new(10_000),
            Utc::now(),
        );
        assert!(register.within_tolerance(Money::new(-10_000)));
        assert!(!register.within_tolerance(Money::new(10_001)));
    }

    #[test]
    fn scope_parses_from_settings() {
        assert_eq!(
            RegisterScope::try_from("global").unwrap(),
            RegisterScope::Global
        );
        assert!(RegisterScope::try_from("team").is_err());
    }
}
