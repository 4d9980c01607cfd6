//! Payment channels (cash, card, transfer…) referenced by movements.
//!
//! The ledger treats a payment method as an opaque foreign key: it checks
//! that the id exists but does not enforce the `active` flag.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};
use uuid::Uuid;

use crate::{EngineError, ResultEngine, util::parse_uuid};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

impl PaymentMethod {
    pub(crate) fn new(name: &str) -> ResultEngine<Self> {
        let name: String = name.trim().nfc().collect();
        if name.is_empty() {
            return Err(EngineError::Validation(
                "payment method name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            active: true,
        })
    }
}

/// Folds a name for case- and accent-insensitive uniqueness checks.
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payment_methods")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub name_norm: String,
    pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::movements::Entity")]
    Movements,
}

impl Related<super::movements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Movements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&PaymentMethod> for ActiveModel {
    fn from(value: &PaymentMethod) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            name: ActiveValue::Set(value.name.clone()),
            name_norm: ActiveValue::Set(normalize_name(&value.name)),
            active: ActiveValue::Set(value.active),
        }
    }
}

impl TryFrom<Model> for PaymentMethod {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "payment method")?,
            name: model.name,
            active: model.active,
        })
    }
}
