//! Caller identity.
//!
//! A `Caller` is any entity acting against a tenant: a human user, a service
//! account, or the platform itself. Authentication (JWT parsing, token
//! exchange) happens outside this crate; by the time a `Caller` exists it is
//! already trusted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Role a caller holds within its tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary tenant member.
    User,
    /// Tenant administrator.
    Admin,
    /// Platform root. Implies sudo on every request.
    Root,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Root => "root",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "root" => Some(Role::Root),
            _ => None,
        }
    }
}

/// Effective access a caller has on a record, derived from its ACL sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// No access at all (denied or not listed).
    None,
    /// May read the record.
    Read,
    /// May read and update fields.
    Edit,
    /// May read, update, and manage the record.
    Full,
}

/// An entity acting against a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Opaque user identifier as stored in ACL columns.
    pub user_id: String,
    /// Short handle used in display and `/system/whoami`.
    pub username: String,
    /// Role within the tenant.
    pub role: Role,
    /// Opaque group identifiers the caller belongs to.
    pub groups: Vec<String>,
    /// The presented token was marked for elevated access.
    pub sudo_token: bool,
}

impl Caller {
    /// Create an ordinary caller with no groups.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role,
            groups: Vec::new(),
            sudo_token: false,
        }
    }

    /// Add group memberships.
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = String>) -> Self {
        self.groups.extend(groups);
        self
    }

    /// Mark the caller's token as sudo-granting.
    pub fn with_sudo_token(mut self) -> Self {
        self.sudo_token = true;
        self
    }

    /// The set of opaque identifiers used for ACL intersection:
    /// user id, every group id, and the role token.
    pub fn identity_set(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.groups.iter().cloned().collect();
        ids.insert(self.user_id.clone());
        ids.insert(format!("role:{}", self.role.as_str()));
        ids
    }

    /// Whether the caller is entitled to sudo at context build time.
    pub fn grants_sudo(&self) -> bool {
        self.role == Role::Root || self.sudo_token
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.username, self.role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_set_contains_user_groups_and_role() {
        let c = Caller::new("user-1", "alice", Role::Admin)
            .with_groups(["grp-ops".to_string(), "grp-dev".to_string()]);
        let ids = c.identity_set();
        assert!(ids.contains("user-1"));
        assert!(ids.contains("grp-ops"));
        assert!(ids.contains("grp-dev"));
        assert!(ids.contains("role:admin"));
    }

    #[test]
    fn test_root_grants_sudo() {
        assert!(Caller::new("u", "root", Role::Root).grants_sudo());
        assert!(!Caller::new("u", "bob", Role::User).grants_sudo());
        assert!(Caller::new("u", "bob", Role::User).with_sudo_token().grants_sudo());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("nope"), None);
    }

    #[test]
    fn test_caller_display() {
        let c = Caller::new("user-1", "alice", Role::User);
        assert_eq!(c.to_string(), "alice (user)");
    }
}
