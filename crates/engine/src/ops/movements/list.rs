use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sea_orm::{QueryFilter, QueryOrder, QuerySelect, TransactionTrait, prelude::*};

use crate::{
    Authority, EngineError, Movement, MovementKind, MovementOrigin, Permission, ResultEngine,
    movements,
};

use super::super::{Engine, with_tx};

/// Filters for listing movements.
///
/// `from` is inclusive and `to` is exclusive (`[from, to)`), both in UTC.
#[derive(Clone, Debug, Default)]
pub struct MovementListFilter {
    /// Case-insensitive substring of the description.
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub payment_method_id: Option<Uuid>,
    pub kind: Option<MovementKind>,
    pub origin: Option<MovementOrigin>,
}

fn validate_list_filter(filter: &MovementListFilter, limit: u64) -> ResultEngine<()> {
    if limit == 0 {
        return Err(EngineError::Validation(
            "limit must be greater than zero".to_string(),
        ));
    }
    if let (Some(from), Some(to)) = (filter.from, filter.to)
        && from >= to
    {
        return Err(EngineError::Validation(
            "invalid range: from must be < to".to_string(),
        ));
    }
    Ok(())
}

trait ApplyMovementFilters: QueryFilter + Sized {
    fn apply_movement_filters(self, filter: &MovementListFilter) -> Self;
}

impl<T> ApplyMovementFilters for T
where
    T: QueryFilter + Sized,
{
    fn apply_movement_filters(mut self, filter: &MovementListFilter) -> Self {
        if let Some(search) = filter.search.as_deref().map(str::trim)
            && !search.is_empty()
        {
            self = self.filter(movements::Column::Description.contains(search));
        }
        if let Some(from) = filter.from {
            self = self.filter(movements::Column::OccurredAt.gte(from));
        }
        if let Some(to) = filter.to {
            self = self.filter(movements::Column::OccurredAt.lt(to));
        }
        if let Some(method) = filter.payment_method_id {
            self = self.filter(movements::Column::PaymentMethodId.eq(method.to_string()));
        }
        if let Some(kind) = filter.kind {
            self = self.filter(movements::Column::Kind.eq(kind.as_str()));
        }
        if let Some(origin) = filter.origin {
            self = self.filter(movements::Column::Origin.eq(origin.as_str()));
        }
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct MovementsCursor {
    sequence: i64,
}

impl MovementsCursor {
    fn encode(&self) -> ResultEngine<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|_| EngineError::InvalidCursor("invalid movements cursor".to_string()))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    fn decode(input: &str) -> ResultEngine<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(input.as_bytes())
            .map_err(|_| EngineError::InvalidCursor("invalid movements cursor".to_string()))?;
        serde_json::from_slice::<Self>(&bytes)
            .map_err(|_| EngineError::InvalidCursor("invalid movements cursor".to_string()))
    }
}

impl Engine {
    /// Lists the movements of a register, with cursor-based pagination.
    ///
    /// Pagination is newest → older by `sequence DESC`. The returned cursor
    /// is `None` on the last page.
    pub async fn list_movements(
        &self,
        authority: &Authority,
        register_id: Uuid,
        filter: &MovementListFilter,
        limit: u64,
        cursor: Option<&str>,
    ) -> ResultEngine<(Vec<Movement>, Option<String>)> {
        authority.require(Permission::ViewLedger)?;
        validate_list_filter(filter, limit)?;
        let cursor = cursor.map(MovementsCursor::decode).transpose()?;

        with_tx!(self, |db_tx| {
            let (register, _) = Self::require_register(&db_tx, register_id).await?;
            authority.ensure_operator(register.operator.as_deref())?;

            let limit_plus_one = limit.saturating_add(1);
            let mut query = movements::Entity::find()
                .filter(movements::Column::RegisterId.eq(register_id.to_string()))
                .order_by_desc(movements::Column::Sequence)
                .limit(limit_plus_one);
            if let Some(cursor) = &cursor {
                query = query.filter(movements::Column::Sequence.lt(cursor.sequence));
            }
            query = query.apply_movement_filters(filter);

            let models = query.all(&db_tx).await?;
            let has_more = models.len() as u64 > limit;

            let mut out = Vec::with_capacity(models.len());
            for model in models.into_iter().take(limit as usize) {
                out.push(Movement::try_from(model)?);
            }

            let next_cursor = if has_more {
                out.last()
                    .map(|m| MovementsCursor {
                        sequence: m.sequence,
                    })
                    .map(|c| c.encode())
                    .transpose()?
            } else {
                None
            };

            Ok::<_, EngineError>((out, next_cursor))
        })
    }
}
