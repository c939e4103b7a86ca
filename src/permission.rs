use crate::role::{Role, RoleValidator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("invalid role '{role}': {reason}")]
    InvalidRole { role: String, reason: String },
    #[error("invalid permission '{raw}': {reason}")]
    InvalidPermission { raw: String, reason: String },
    #[error("action '{action}' is not allowed here")]
    ActionNotAllowed { action: String },
    #[error("{count} entries given, at most {max} allowed")]
    TooMany { count: usize, max: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Create, Action::Update, Action::Delete];
    /// Actions a `write` grant expands into.
    pub const WRITE: [Action; 3] = [Action::Create, Action::Update, Action::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "read" => Action::Read,
            "create" => Action::Create,
            "update" => Action::Update,
            "delete" => Action::Delete,
            _ => return None,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant of one action to one role, serialized as `action:role`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub action: Action,
    pub role: Role,
}

impl Permission {
    pub fn new(action: Action, role: Role) -> Self {
        Self { action, role }
    }

    pub fn read(role: Role) -> Self {
        Self::new(Action::Read, role)
    }

    pub fn create(role: Role) -> Self {
        Self::new(Action::Create, role)
    }

    pub fn update(role: Role) -> Self {
        Self::new(Action::Update, role)
    }

    pub fn delete(role: Role) -> Self {
        Self::new(Action::Delete, role)
    }

    /// Canonical string form of `action` granted to `role`.
    pub fn canonical(action: Action, role: &Role) -> String {
        format!("{}:{role}", action.as_str())
    }

    pub fn parse(raw: &str) -> Result<Self, PermissionError> {
        let (action, role) = split_permission(raw)?;
        let action = Action::parse(action).ok_or_else(|| PermissionError::InvalidPermission {
            raw: raw.to_string(),
            reason: format!("unknown action '{action}'"),
        })?;
        Ok(Self::new(action, Role::parse(role)?))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.role)
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::parse(s)
    }
}

fn split_permission(raw: &str) -> Result<(&str, &str), PermissionError> {
    raw.split_once(':')
        .filter(|(action, role)| !action.is_empty() && !role.is_empty())
        .ok_or_else(|| PermissionError::InvalidPermission {
            raw: raw.to_string(),
            reason: "expected 'action:role'".to_string(),
        })
}

/// Parses raw permission strings into a deduplicated list.
///
/// `write` expands into create, update and delete, restricted to `allowed`.
/// Any other action outside a non-empty `allowed` fails the whole batch. An
/// empty result means nothing was granted.
pub fn aggregate<S: AsRef<str>>(
    raw: &[S],
    allowed: &[Action],
) -> Result<Vec<Permission>, PermissionError> {
    let is_allowed = |action: Action| allowed.is_empty() || allowed.contains(&action);
    let mut out: Vec<Permission> = Vec::with_capacity(raw.len());
    let mut push = |permission: Permission| {
        if !out.contains(&permission) {
            out.push(permission);
        }
    };

    for entry in raw {
        let entry = entry.as_ref();
        let (action, role) = split_permission(entry)?;
        let role = Role::parse(role)?;
        if action == "write" {
            for action in Action::WRITE.into_iter().filter(|a| is_allowed(*a)) {
                push(Permission::new(action, role.clone()));
            }
            continue;
        }
        let action = Action::parse(action).ok_or_else(|| PermissionError::InvalidPermission {
            raw: entry.to_string(),
            reason: format!("unknown action '{action}'"),
        })?;
        if !is_allowed(action) {
            return Err(PermissionError::ActionNotAllowed {
                action: action.as_str().to_string(),
            });
        }
        push(Permission::new(action, role));
    }
    Ok(out)
}

/// Deduplicated permission list attached to a collection or document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PermissionSet(Vec<Permission>);

impl PermissionSet {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        let mut set = Self::default();
        for permission in permissions {
            set.insert(permission);
        }
        set
    }

    /// Validates raw strings against the role grammar and `allowed` actions.
    pub fn from_raw<S: AsRef<str>>(
        raw: &[S],
        allowed: &[Action],
        max_count: Option<usize>,
    ) -> Result<Self, PermissionError> {
        let roles = raw
            .iter()
            .map(|p| split_permission(p.as_ref()).map(|(_, role)| role))
            .collect::<Result<Vec<_>, _>>()?;
        RoleValidator::new(max_count).validate(&roles)?;
        Ok(Self(aggregate(raw, allowed)?))
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        if self.0.contains(&permission) {
            return false;
        }
        self.0.push(permission);
        true
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    /// Roles granted `action`, in insertion order.
    pub fn roles_for(&self, action: Action) -> impl Iterator<Item = &Role> {
        self.0
            .iter()
            .filter(move |p| p.action == action)
            .map(|p| &p.role)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self::new(iter)
    }
}
