//! Subjects, roles and the authorization policy table.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Supervisor,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "supervisor" => Ok(Role::Supervisor),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// An authenticated principal as supplied by the subject directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
}

impl Subject {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    /// Administrative operations on a resource kind as a whole.
    Manage,
}

/// The resource an action targets. `owner_id` is `None` when the resource
/// does not exist yet (create) or has no owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: String,
    pub owner_id: Option<String>,
}

impl ResourceRef {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            owner_id: None,
        }
    }

    pub fn owned_by(kind: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            owner_id: Some(owner_id.into()),
        }
    }
}

pub type Predicate = fn(&Subject, &ResourceRef) -> bool;

pub fn anyone(_: &Subject, _: &ResourceRef) -> bool {
    true
}

pub fn admin_only(subject: &Subject, _: &ResourceRef) -> bool {
    subject.is_admin()
}

pub fn staff(subject: &Subject, _: &ResourceRef) -> bool {
    matches!(subject.role, Role::Admin | Role::Supervisor)
}

pub fn owner_or_admin(subject: &Subject, resource: &ResourceRef) -> bool {
    subject.is_admin() || resource.owner_id.as_deref() == Some(subject.id.as_str())
}

pub fn owner_or_staff(subject: &Subject, resource: &ResourceRef) -> bool {
    staff(subject, resource) || owner_or_admin(subject, resource)
}

/// `(action, resource kind) → predicate` table.
///
/// Pairs without an entry fall back to admin-only. Inactive subjects are
/// refused before any predicate runs.
#[derive(Clone)]
pub struct PolicyTable {
    rules: HashMap<(Action, String), Predicate>,
    fallback: Predicate,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            fallback: admin_only,
        }
    }
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, action: Action, kind: &str, predicate: Predicate) -> Self {
        self.rules.insert((action, kind.to_string()), predicate);
        self
    }

    pub fn with_fallback(mut self, predicate: Predicate) -> Self {
        self.fallback = predicate;
        self
    }

    pub fn is_allowed(&self, subject: &Subject, action: Action, resource: &ResourceRef) -> bool {
        if !subject.active {
            return false;
        }
        let predicate = self
            .rules
            .get(&(action, resource.kind.clone()))
            .copied()
            .unwrap_or(self.fallback);
        predicate(subject, resource)
    }

    /// The single authorization entry point.
    pub fn authorize(
        &self,
        subject: &Subject,
        action: Action,
        resource: &ResourceRef,
    ) -> Result<(), AuthError> {
        if self.is_allowed(subject, action, resource) {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }

    /// Rules for the collaboration platform's resource kinds.
    ///
    /// Everyone reads; files, evidences and messages belong to their author;
    /// groups, projects and milestones are run by staff.
    pub fn platform_default() -> Self {
        let mut table = Self::new();
        for kind in ["file", "evidence", "message"] {
            table = table
                .allow(Action::Read, kind, anyone)
                .allow(Action::Create, kind, anyone)
                .allow(Action::Update, kind, owner_or_admin)
                .allow(Action::Delete, kind, owner_or_staff);
        }
        for kind in ["group", "project", "milestone"] {
            table = table
                .allow(Action::Read, kind, anyone)
                .allow(Action::Create, kind, staff)
                .allow(Action::Update, kind, owner_or_staff)
                .allow(Action::Delete, kind, admin_only);
        }
        table
    }
}

/// Fail with `InsufficientPermissions` unless `subject` holds one of `roles`.
pub fn ensure_role(subject: &Subject, roles: &[Role]) -> Result<(), AuthError> {
    if subject.active && subject.has_role(roles) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(id: &str, role: Role) -> Subject {
        Subject {
            id: id.into(),
            email: format!("{id}@example.com"),
            role,
            active: true,
        }
    }

    #[test]
    fn owners_edit_their_own_files() {
        let table = PolicyTable::platform_default();
        let alice = subject("alice", Role::User);
        let bob = subject("bob", Role::User);
        let file = ResourceRef::owned_by("file", "alice");

        assert!(table.authorize(&alice, Action::Update, &file).is_ok());
        assert_eq!(
            table.authorize(&bob, Action::Update, &file),
            Err(AuthError::InsufficientPermissions)
        );
        assert!(table
            .authorize(&subject("root", Role::Admin), Action::Update, &file)
            .is_ok());
    }

    #[test]
    fn unknown_pairs_fall_back_to_admin_only() {
        let table = PolicyTable::platform_default();
        let settings = ResourceRef::kind("settings");
        assert!(!table.is_allowed(&subject("s", Role::Supervisor), Action::Manage, &settings));
        assert!(table.is_allowed(&subject("a", Role::Admin), Action::Manage, &settings));
    }

    #[test]
    fn inactive_subjects_are_refused() {
        let table = PolicyTable::platform_default();
        let mut admin = subject("a", Role::Admin);
        admin.active = false;
        assert!(!table.is_allowed(&admin, Action::Read, &ResourceRef::kind("project")));
        assert!(ensure_role(&admin, &[Role::Admin]).is_err());
    }

    #[test]
    fn role_requirement() {
        assert!(ensure_role(&subject("a", Role::Admin), &[Role::Admin]).is_ok());
        assert_eq!(
            ensure_role(&subject("u", Role::User), &[Role::Admin, Role::Supervisor]),
            Err(AuthError::InsufficientPermissions)
        );
        assert_eq!("Supervisor".parse::<Role>(), Ok(Role::Supervisor));
    }
}
