use sea_orm::{QueryFilter, QueryOrder, QuerySelect, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{AuditEntry, Authority, EngineError, Permission, ResultEngine, audit};

use super::{Engine, with_tx};

impl Engine {
    /// Most recent audit entries, newest first, optionally restricted to one
    /// register. The audit log has no update or delete counterpart.
    pub async fn list_audit_entries(
        &self,
        authority: &Authority,
        register_id: Option<Uuid>,
        limit: u64,
    ) -> ResultEngine<Vec<AuditEntry>> {
        authority.require(Permission::ViewLedger)?;
        with_tx!(self, |db_tx| {
            let mut query = audit::Entity::find();
            match register_id {
                Some(register_id) => {
                    let (register, _) = Self::require_register(&db_tx, register_id).await?;
                    authority.ensure_operator(register.operator.as_deref())?;
                    query = query.filter(audit::Column::RegisterId.eq(register_id.to_string()));
                }
                None => authority.ensure_operator(None)?,
            }
            let models = query
                .order_by_desc(audit::Column::OccurredAt)
                .order_by_desc(audit::Column::Id)
                .limit(limit)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(AuditEntry::try_from)
                .collect::<Result<Vec<_>, EngineError>>()
        })
    }
}
