//! Capability passed into every ledger call.
//!
//! The surrounding application authenticates the user and builds an
//! [`Authority`]; the engine only checks that the authority carries the
//! permission the operation needs and, for cashiers, that they act on
//! their own till.

use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Shop owner: every operation on every register.
    Owner,
    /// Employee running their own till.
    Cashier,
    /// Read-only access (dashboards, reports).
    Viewer,
    /// Automatic postings from purchases and sales.
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    OpenRegister,
    CloseRegister,
    AddMovement,
    ViewLedger,
    ManagePaymentMethods,
    RepairLedger,
}

impl Permission {
    fn label(self) -> &'static str {
        match self {
            Self::OpenRegister => "open registers",
            Self::CloseRegister => "close registers",
            Self::AddMovement => "add movements",
            Self::ViewLedger => "view the ledger",
            Self::ManagePaymentMethods => "manage payment methods",
            Self::RepairLedger => "repair the ledger",
        }
    }
}

impl Role {
    pub fn allows(self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Self::Owner => true,
            Self::Cashier => matches!(
                permission,
                OpenRegister | CloseRegister | AddMovement | ViewLedger
            ),
            Self::Viewer => matches!(permission, ViewLedger),
            Self::System => matches!(permission, AddMovement | ViewLedger),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Cashier => "cashier",
            Self::Viewer => "viewer",
            Self::System => "system",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "owner" => Ok(Self::Owner),
            "cashier" => Ok(Self::Cashier),
            "viewer" => Ok(Self::Viewer),
            "system" => Ok(Self::System),
            other => Err(EngineError::Validation(format!("invalid role: {other}"))),
        }
    }
}

/// Who is calling, in which role, and on behalf of which operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authority {
    pub actor: String,
    /// Operator (employee) binding. Required for cashiers.
    pub operator: Option<String>,
    pub role: Role,
    pub source_address: Option<String>,
}

impl Authority {
    #[must_use]
    pub fn new(actor: impl Into<String>, role: Role) -> Self {
        Self {
            actor: actor.into(),
            operator: None,
            role,
            source_address: None,
        }
    }

    #[must_use]
    pub fn owner(actor: impl Into<String>) -> Self {
        Self::new(actor, Role::Owner)
    }

    /// A cashier bound to their own operator identity.
    #[must_use]
    pub fn cashier(actor: impl Into<String>) -> Self {
        let actor = actor.into();
        Self::new(actor.clone(), Role::Cashier).operator(actor)
    }

    #[must_use]
    pub fn system(actor: impl Into<String>) -> Self {
        Self::new(actor, Role::System)
    }

    #[must_use]
    pub fn viewer(actor: impl Into<String>) -> Self {
        Self::new(actor, Role::Viewer)
    }

    #[must_use]
    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    #[must_use]
    pub fn source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    /// Checks identity binding and role for `permission`.
    pub(crate) fn require(&self, permission: Permission) -> ResultEngine<()> {
        if self.actor.trim().is_empty() {
            return Err(EngineError::Validation("missing actor".to_string()));
        }
        if self.role == Role::Cashier && self.operator.is_none() {
            return Err(EngineError::Validation(
                "cashier authority requires an operator binding".to_string(),
            ));
        }
        if !self.role.allows(permission) {
            return Err(EngineError::Forbidden(format!(
                "{} '{}' cannot {}",
                self.role.as_str(),
                self.actor,
                permission.label()
            )));
        }
        Ok(())
    }

    /// Cashiers may only touch registers they operate.
    pub(crate) fn ensure_operator(&self, register_operator: Option<&str>) -> ResultEngine<()> {
        if self.role != Role::Cashier {
            return Ok(());
        }
        if register_operator.is_some() && register_operator == self.operator.as_deref() {
            return Ok(());
        }
        Err(EngineError::Forbidden(format!(
            "cashier '{}' does not operate this register",
            self.actor
        )))
    }

    pub(crate) fn actor(&self) -> &str {
        self.actor.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_cannot_write() {
        let authority = Authority::viewer("auditor");
        assert!(authority.require(Permission::ViewLedger).is_ok());
        assert_eq!(
            authority.require(Permission::AddMovement).unwrap_err(),
            EngineError::Forbidden("viewer 'auditor' cannot add movements".to_string())
        );
    }

    #[test]
    fn system_posts_but_never_opens() {
        let authority = Authority::system("purchases");
        assert!(authority.require(Permission::AddMovement).is_ok());
        assert!(authority.require(Permission::OpenRegister).is_err());
    }

    #[test]
    fn empty_actor_is_a_validation_error() {
        let authority = Authority::owner(" ");
        assert_eq!(
            authority.require(Permission::ViewLedger).unwrap_err(),
            EngineError::Validation("missing actor".to_string())
        );
    }

    #[test]
    fn cashier_needs_operator_binding() {
        let authority = Authority::new("ana", Role::Cashier);
        assert!(matches!(
            authority.require(Permission::OpenRegister),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn cashier_is_limited_to_own_register() {
        let authority = Authority::cashier("ana");
        assert!(authority.ensure_operator(Some("ana")).is_ok());
        assert!(authority.ensure_operator(Some("luis")).is_err());
        assert!(authority.ensure_operator(None).is_err());
        assert!(Authority::owner("boss").ensure_operator(Some("luis")).is_ok());
    }
}
