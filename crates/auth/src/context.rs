use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The identity attached to a connection after authentication, and to
/// every action invocation made through it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Subject id (user id). None for the unauthenticated sentinel.
    pub subject: Option<String>,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
    pub authenticated: bool,
}

impl AuthContext {
    /// The unauthenticated sentinel every connection starts with.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_subject(
        subject: impl Into<String>,
        roles: impl IntoIterator<Item = impl Into<String>>,
        permissions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            subject: Some(subject.into()),
            roles: roles.into_iter().map(Into::into).collect(),
            permissions: permissions.into_iter().map(Into::into).collect(),
            authenticated: true,
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// All of `required` present in the role set.
    #[must_use]
    pub fn has_all_roles<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> bool {
        required.into_iter().all(|r| self.roles.contains(r))
    }

    /// All of `required` present in the permission set. When `admin_bypass`
    /// is enabled, the literal `admin` permission satisfies any requirement.
    #[must_use]
    pub fn has_all_permissions<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
        admin_bypass: bool,
    ) -> bool {
        if admin_bypass && self.permissions.contains("admin") {
            return true;
        }
        required.into_iter().all(|p| self.permissions.contains(p))
    }
}
