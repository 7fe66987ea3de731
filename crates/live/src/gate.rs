//! The auth gate: declarative mount and per-action policy checks.
//!
//! Denials here are expected peer behavior: callers surface them as
//! correlated ERROR frames and log at debug, never as errors.

use fluxlive_auth::AuthContext;
use fluxlive_protocol::error_codes;

use crate::component::ComponentDef;

/// Why the gate said no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The component requires authentication and the connection has none.
    Unauthenticated,
    /// The caller lacks a required role.
    MissingRole(&'static str),
    /// The caller lacks a required permission.
    MissingPermission(&'static str),
}

impl Denial {
    /// The stable wire code for this denial.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => error_codes::AUTH_REQUIRED,
            Self::MissingRole(_) | Self::MissingPermission(_) => error_codes::AUTH_DENIED,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Unauthenticated => "authentication required".into(),
            Self::MissingRole(role) => format!("missing role: {role}"),
            Self::MissingPermission(permission) => format!("missing permission: {permission}"),
        }
    }
}

/// Mount-time check: component-level auth requirement and roles.
pub fn check_mount(def: &ComponentDef, context: &AuthContext) -> Result<(), Denial> {
    if def.auth.required && !context.authenticated {
        return Err(Denial::Unauthenticated);
    }
    for role in def.auth.roles {
        if !context.has_role(role) {
            return Err(Denial::MissingRole(role));
        }
    }
    Ok(())
}

/// Action-time check. The component policy always applies; an action with
/// its own entry additionally requires that entry's roles and permissions.
/// An action without an entry inherits the component policy alone.
pub fn check_action(
    def: &ComponentDef,
    action: &str,
    context: &AuthContext,
    admin_bypass: bool,
) -> Result<(), Denial> {
    check_mount(def, context)?;

    let Some(policy) = def.action_policy(action) else {
        return Ok(());
    };
    for role in policy.roles {
        if !context.has_role(role) {
            return Err(Denial::MissingRole(role));
        }
    }
    if !context.has_all_permissions(policy.permissions.iter().copied(), admin_bypass) {
        for permission in policy.permissions {
            if !context.has_all_permissions([*permission], admin_bypass) {
                return Err(Denial::MissingPermission(permission));
            }
        }
    }
    Ok(())
}
