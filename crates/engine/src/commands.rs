//! Command structs for engine operations.
//!
//! These types group parameters for write operations (open register, append
//! movement), keeping call sites readable and avoiding long argument lists.

use uuid::Uuid;

use crate::{Money, MovementKind, MovementOrigin};

/// Open a new register.
#[derive(Clone, Debug)]
pub struct OpenRegisterCmd {
    /// `None` opens the shared general till.
    pub operator: Option<String>,
    pub initial_balance: Money,
    pub description: Option<String>,
    /// Falls back to the engine default tolerance.
    pub tolerance: Option<Money>,
}

impl OpenRegisterCmd {
    #[must_use]
    pub fn new(initial_balance: Money) -> Self {
        Self {
            operator: None,
            initial_balance,
            description: None,
            tolerance: None,
        }
    }

    #[must_use]
    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn tolerance(mut self, tolerance: Money) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
}

/// Append a movement to an open register.
#[derive(Clone, Debug)]
pub struct MovementCmd {
    pub register_id: Uuid,
    pub kind: MovementKind,
    pub amount: Money,
    pub payment_method_id: Uuid,
    pub description: Option<String>,
    pub origin: MovementOrigin,
    pub origin_ref: Option<String>,
    pub idempotency_key: Option<String>,
}

impl MovementCmd {
    #[must_use]
    pub fn new(
        register_id: Uuid,
        kind: MovementKind,
        amount: Money,
        payment_method_id: Uuid,
    ) -> Self {
        Self {
            register_id,
            kind,
            amount,
            payment_method_id,
            description: None,
            origin: MovementOrigin::Manual,
            origin_ref: None,
            idempotency_key: None,
        }
    }

    /// Cash entering the till.
    #[must_use]
    pub fn inflow(register_id: Uuid, amount: Money, payment_method_id: Uuid) -> Self {
        Self::new(register_id, MovementKind::Inflow, amount, payment_method_id)
    }

    /// Cash leaving the till.
    #[must_use]
    pub fn outflow(register_id: Uuid, amount: Money, payment_method_id: Uuid) -> Self {
        Self::new(register_id, MovementKind::Outflow, amount, payment_method_id)
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the producing event and its external reference.
    #[must_use]
    pub fn origin(mut self, origin: MovementOrigin, origin_ref: Option<String>) -> Self {
        self.origin = origin;
        self.origin_ref = origin_ref;
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_defaults_to_manual_origin() {
        let cmd = MovementCmd::inflow(Uuid::new_v4(), Money::new(50_000), Uuid::new_v4());
        assert_eq!(cmd.kind, MovementKind::Inflow);
        assert_eq!(cmd.origin, MovementOrigin::Manual);
        assert!(cmd.origin_ref.is_none());
        assert!(cmd.idempotency_key.is_none());
    }

    #[test]
    fn movement_setters_chain() {
        let cmd = MovementCmd::outflow(Uuid::new_v4(), Money::new(20_000), Uuid::new_v4())
            .description("toner")
            .origin(MovementOrigin::Purchase, Some("P-17".to_string()))
            .idempotency_key("purchase:P-17");
        assert_eq!(cmd.kind, MovementKind::Outflow);
        assert_eq!(cmd.description.as_deref(), Some("toner"));
        assert_eq!(cmd.origin, MovementOrigin::Purchase);
        assert_eq!(cmd.origin_ref.as_deref(), Some("P-17"));
        assert_eq!(cmd.idempotency_key.as_deref(), Some("purchase:P-17"));
    }

    #[test]
    fn open_register_builder() {
        let cmd = OpenRegisterCmd::new(Money::new(100_000))
            .operator("ana")
            .tolerance(Money::new(500));
        assert_eq!(cmd.operator.as_deref(), Some("ana"));
        assert_eq!(cmd.tolerance, Some(Money::new(500)));
        assert!(cmd.description.is_none());
    }
}
