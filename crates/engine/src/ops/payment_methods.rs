use sea_orm::{ActiveValue, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use tracing::info;
use uuid::Uuid;

use crate::{
    Authority, EngineError, PaymentMethod, Permission, ResultEngine,
    payment_methods::{self, normalize_name},
    util::is_unique_violation,
};

use super::{Engine, with_tx};

impl Engine {
    /// Adds a payment method to the catalog.
    ///
    /// Names are unique ignoring case and accents.
    pub async fn new_payment_method(
        &self,
        authority: &Authority,
        name: &str,
    ) -> ResultEngine<PaymentMethod> {
        authority.require(Permission::ManagePaymentMethods)?;
        let method = PaymentMethod::new(name)?;
        let name_norm = normalize_name(&method.name);
        with_tx!(self, |db_tx| {
            let exists = payment_methods::Entity::find()
                .filter(payment_methods::Column::NameNorm.eq(name_norm.clone()))
                .one(&db_tx)
                .await?;
            if exists.is_some() {
                return Err(EngineError::Conflict(format!(
                    "payment method '{}' already exists",
                    method.name
                )));
            }
            if let Err(err) = payment_methods::ActiveModel::from(&method)
                .insert(&db_tx)
                .await
            {
                if is_unique_violation(&err) {
                    return Err(EngineError::Conflict(format!(
                        "payment method '{}' already exists",
                        method.name
                    )));
                }
                return Err(err.into());
            }
            info!(payment_method_id = %method.id, name = %method.name, "payment method added");
            Ok::<_, EngineError>(method)
        })
    }

    /// Sets the `active` flag. Movements keep referencing inactive methods.
    pub async fn set_payment_method_active(
        &self,
        authority: &Authority,
        payment_method_id: Uuid,
        active: bool,
    ) -> ResultEngine<PaymentMethod> {
        authority.require(Permission::ManagePaymentMethods)?;
        with_tx!(self, |db_tx| {
            let model = payment_methods::Entity::find_by_id(payment_method_id.to_string())
                .one(&db_tx)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!("payment method {payment_method_id}"))
                })?;
            let mut active_model: payment_methods::ActiveModel = model.into();
            active_model.active = ActiveValue::Set(active);
            let updated = active_model.update(&db_tx).await?;
            PaymentMethod::try_from(updated)
        })
    }

    /// Flips the `active` flag and returns the updated method.
    pub async fn toggle_payment_method(
        &self,
        authority: &Authority,
        payment_method_id: Uuid,
    ) -> ResultEngine<PaymentMethod> {
        let current = self.payment_method(authority, payment_method_id).await?;
        self.set_payment_method_active(authority, payment_method_id, !current.active)
            .await
    }

    /// Catalog ordered by name.
    pub async fn payment_methods(
        &self,
        authority: &Authority,
        include_inactive: bool,
    ) -> ResultEngine<Vec<PaymentMethod>> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let mut query = payment_methods::Entity::find();
            if !include_inactive {
                query = query.filter(payment_methods::Column::Active.eq(true));
            }
            let models = query
                .order_by_asc(payment_methods::Column::NameNorm)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(PaymentMethod::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// Return a payment method snapshot from DB.
    pub async fn payment_method(
        &self,
        authority: &Authority,
        payment_method_id: Uuid,
    ) -> ResultEngine<PaymentMethod> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let model = payment_methods::Entity::find_by_id(payment_method_id.to_string())
                .one(&db_tx)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!("payment method {payment_method_id}"))
                })?;
            PaymentMethod::try_from(model)
        })
    }

    /// Looks a method up by name, ignoring case and accents.
    pub async fn payment_method_by_name(
        &self,
        authority: &Authority,
        name: &str,
    ) -> ResultEngine<PaymentMethod> {
        authority.require(Permission::ViewLedger)?;
        let name_norm = normalize_name(name);
        with_tx!(self, |db_tx| {
            let model = payment_methods::Entity::find()
                .filter(payment_methods::Column::NameNorm.eq(name_norm.clone()))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("payment method '{name}'")))?;
            PaymentMethod::try_from(model)
        })
    }
}
