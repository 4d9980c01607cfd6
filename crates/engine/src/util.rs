//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation and mapping logic so the engine enforces consistent invariants.

use sea_orm::{DbErr, SqlErr};
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// Parse a UUID from storage and return a labeled error on failure.
pub(crate) fn parse_uuid(value: &str, label: &str) -> ResultEngine<Uuid> {
    Uuid::parse_str(value).map_err(|_| EngineError::Validation(format!("invalid {label} id")))
}

pub(crate) fn parse_optional_uuid(value: Option<&str>, label: &str) -> ResultEngine<Option<Uuid>> {
    value.map(|v| parse_uuid(v, label)).transpose()
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Returns `true` when the storage rejected the unit of work because of lock
/// contention or a serialization conflict, i.e. resubmitting may succeed.
pub(crate) fn is_transient(err: &DbErr) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    [
        "database is locked",
        "database table is locked",
        "database is busy",
        "could not serialize access",
        "deadlock detected",
        "pool timed out",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Returns `true` when the insert clashed with a unique index.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_errors_are_transient() {
        assert!(is_transient(&DbErr::Custom(
            "error returned from database: (code: 5) database is locked".to_string()
        )));
        assert!(is_transient(&DbErr::Custom(
            "ERROR: could not serialize access due to concurrent update".to_string()
        )));
        assert!(!is_transient(&DbErr::Custom(
            "no such table: movements".to_string()
        )));
    }

    #[test]
    fn optional_text_is_trimmed() {
        assert_eq!(normalize_optional_text(Some("  ")), None);
        assert_eq!(
            normalize_optional_text(Some(" ana ")),
            Some("ana".to_string())
        );
        assert_eq!(normalize_optional_text(None), None);
    }

    #[test]
    fn uuid_parse_errors_are_labeled() {
        assert_eq!(
            parse_uuid("nope", "register").unwrap_err(),
            EngineError::Validation("invalid register id".to_string())
        );
    }
}
