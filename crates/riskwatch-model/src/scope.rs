//! Roles and visibility scopes
//!
//! The fixed role table:
//!
//! | Role | Default scope | Allowed scopes |
//! |---|---|---|
//! | `super_admin` | system | system |
//! | `tenant_admin`, `org_admin`, `org_member` | organization | organization, system |
//! | `user` | personal | personal, system |
//!
//! A `super_admin` is hard-capped to the system scope: any other requested
//! scope is coerced rather than rejected.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Role of the authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform operator; sees only platform-wide predictions
    SuperAdmin,
    /// Administrator of a tenant
    TenantAdmin,
    /// Administrator of an organization
    OrgAdmin,
    /// Member of an organization
    OrgMember,
    /// Individual user without an organization
    User,
}

impl Role {
    /// All roles, in privilege order
    pub const ALL: [Role; 5] = [
        Role::SuperAdmin,
        Role::TenantAdmin,
        Role::OrgAdmin,
        Role::OrgMember,
        Role::User,
    ];

    /// Wire name of the role
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::TenantAdmin => "tenant_admin",
            Role::OrgAdmin => "org_admin",
            Role::OrgMember => "org_member",
            Role::User => "user",
        }
    }

    /// Whether this role owns personal or organization data worth fetching
    ///
    /// A `super_admin` has no personal data by policy.
    #[inline]
    #[must_use]
    pub fn requires_user_data(&self) -> bool {
        !matches!(self, Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "super_admin" => Ok(Role::SuperAdmin),
            "tenant_admin" => Ok(Role::TenantAdmin),
            "org_admin" => Ok(Role::OrgAdmin),
            "org_member" => Ok(Role::OrgMember),
            "user" => Ok(Role::User),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

/// Visibility scope of a single prediction
///
/// Exactly one per record; it decides which partition holds the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Owned by the requesting user
    Personal,
    /// Shared within the user's organization
    Organization,
    /// Platform-wide
    System,
}

impl Scope {
    /// Wire name of the scope
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Organization => "organization",
            Scope::System => "system",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(Scope::Personal),
            "organization" => Ok(Scope::Organization),
            "system" => Ok(Scope::System),
            other => Err(ModelError::UnknownScope(other.to_string())),
        }
    }
}

/// Scope filter currently applied to reads
///
/// `All` is a pseudo-scope selecting the whole user partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveScope {
    /// Only personal records from the user partition
    Personal,
    /// Only organization records from the user partition
    Organization,
    /// The system partition
    System,
    /// Every record of the user partition
    All,
}

impl ActiveScope {
    /// Whether a record with `scope` belongs to this filter's user-side view
    #[inline]
    #[must_use]
    pub fn admits(&self, scope: Scope) -> bool {
        match self {
            ActiveScope::All => scope != Scope::System,
            other => Some(scope) == other.as_scope(),
        }
    }

    /// Concrete scope, if this is not the `All` pseudo-scope
    #[inline]
    #[must_use]
    pub fn as_scope(&self) -> Option<Scope> {
        match self {
            ActiveScope::Personal => Some(Scope::Personal),
            ActiveScope::Organization => Some(Scope::Organization),
            ActiveScope::System => Some(Scope::System),
            ActiveScope::All => None,
        }
    }
}

impl From<Scope> for ActiveScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Personal => ActiveScope::Personal,
            Scope::Organization => ActiveScope::Organization,
            Scope::System => ActiveScope::System,
        }
    }
}

impl fmt::Display for ActiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_scope() {
            Some(scope) => scope.fmt(f),
            None => f.write_str("all"),
        }
    }
}

impl FromStr for ActiveScope {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(ActiveScope::All);
        }
        s.parse::<Scope>().map(ActiveScope::from)
    }
}

/// Default scope shown to a role after a fetch
#[must_use]
pub fn default_scope_for(role: Role) -> Scope {
    match role {
        Role::SuperAdmin => Scope::System,
        Role::TenantAdmin | Role::OrgAdmin | Role::OrgMember => Scope::Organization,
        Role::User => Scope::Personal,
    }
}

/// Scopes a role may view
#[must_use]
pub fn allowed_scopes_for(role: Role) -> BTreeSet<Scope> {
    match role {
        Role::SuperAdmin => BTreeSet::from([Scope::System]),
        _ => BTreeSet::from([default_scope_for(role), Scope::System]),
    }
}

/// Apply the access cap to a requested scope
///
/// `super_admin` is silently coerced to `System`; every other role gets the
/// requested scope unchanged (server-side enforcement is out of our hands).
#[must_use]
pub fn coerce_scope(requested: ActiveScope, role: Role) -> ActiveScope {
    match role {
        Role::SuperAdmin if requested != ActiveScope::System => {
            tracing::debug!(%requested, "coercing super_admin scope to system");
            ActiveScope::System
        }
        _ => requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_scope_table() {
        assert_eq!(default_scope_for(Role::SuperAdmin), Scope::System);
        assert_eq!(default_scope_for(Role::TenantAdmin), Scope::Organization);
        assert_eq!(default_scope_for(Role::OrgAdmin), Scope::Organization);
        assert_eq!(default_scope_for(Role::OrgMember), Scope::Organization);
        assert_eq!(default_scope_for(Role::User), Scope::Personal);
    }

    #[test]
    fn super_admin_sees_only_system() {
        let allowed = allowed_scopes_for(Role::SuperAdmin);
        assert_eq!(allowed.len(), 1);
        assert!(allowed.contains(&Scope::System));
    }

    #[test]
    fn user_never_gets_organization() {
        let allowed = allowed_scopes_for(Role::User);
        assert!(allowed.contains(&Scope::Personal));
        assert!(allowed.contains(&Scope::System));
        assert!(!allowed.contains(&Scope::Organization));
    }

    #[test]
    fn other_roles_accept_any_request() {
        assert_eq!(
            coerce_scope(ActiveScope::Personal, Role::OrgMember),
            ActiveScope::Personal
        );
        assert_eq!(coerce_scope(ActiveScope::All, Role::User), ActiveScope::All);
    }

    #[test]
    fn active_scope_admits() {
        assert!(ActiveScope::All.admits(Scope::Personal));
        assert!(ActiveScope::All.admits(Scope::Organization));
        assert!(!ActiveScope::All.admits(Scope::System));
        assert!(ActiveScope::Organization.admits(Scope::Organization));
        assert!(!ActiveScope::Organization.admits(Scope::Personal));
    }

    #[test]
    fn parse_names() {
        assert_eq!("org_member".parse::<Role>().unwrap(), Role::OrgMember);
        assert_eq!(" System ".parse::<Scope>().unwrap(), Scope::System);
        assert_eq!("all".parse::<ActiveScope>().unwrap(), ActiveScope::All);
        assert!("root".parse::<Role>().is_err());
        assert!("global".parse::<Scope>().is_err());
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    fn any_active_scope() -> impl Strategy<Value = ActiveScope> {
        prop_oneof![
            Just(ActiveScope::Personal),
            Just(ActiveScope::Organization),
            Just(ActiveScope::System),
            Just(ActiveScope::All),
        ]
    }

    proptest! {
        #[test]
        fn prop_default_scope_is_allowed(role in any_role()) {
            prop_assert!(allowed_scopes_for(role).contains(&default_scope_for(role)));
        }

        #[test]
        fn prop_super_admin_always_coerced(requested in any_active_scope()) {
            prop_assert_eq!(coerce_scope(requested, Role::SuperAdmin), ActiveScope::System);
        }

        #[test]
        fn prop_role_roundtrips_through_name(role in any_role()) {
            prop_assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }
}
