use crate::permission::PermissionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a role identifier or dimension.
pub const MAX_ROLE_PART_LENGTH: usize = 36;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoleKind {
    Any,
    Guests,
    Users,
    User,
    Team,
    Member,
    Label,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::Any => "any",
            RoleKind::Guests => "guests",
            RoleKind::Users => "users",
            RoleKind::User => "user",
            RoleKind::Team => "team",
            RoleKind::Member => "member",
            RoleKind::Label => "label",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "any" => RoleKind::Any,
            "guests" => RoleKind::Guests,
            "users" => RoleKind::Users,
            "user" => RoleKind::User,
            "team" => RoleKind::Team,
            "member" => RoleKind::Member,
            "label" => RoleKind::Label,
            _ => return None,
        })
    }

    fn grammar(self) -> &'static RoleGrammar {
        ROLE_GRAMMAR
            .iter()
            .find(|g| g.kind == self)
            .unwrap_or(&ROLE_GRAMMAR[0])
    }
}

/// Account verification dimension accepted by `users` and `user` roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verification {
    Verified,
    Unverified,
}

impl Verification {
    pub fn as_str(self) -> &'static str {
        match self {
            Verification::Verified => "verified",
            Verification::Unverified => "unverified",
        }
    }
}

/// An actor class used in permission evaluation.
///
/// Parsed once from `kind[:identifier[:dimension]]` at the boundary and carried
/// as a typed value afterwards. `users` has no identifier slot, so its
/// dimension serializes as `users::verified`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Any,
    Guests,
    Users {
        verification: Option<Verification>,
    },
    User {
        id: String,
        verification: Option<Verification>,
    },
    Team {
        id: String,
        role: Option<String>,
    },
    Member {
        id: String,
    },
    Label {
        id: String,
    },
}

impl Role {
    pub fn users() -> Self {
        Role::Users { verification: None }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Role::User {
            id: id.into(),
            verification: None,
        }
    }

    pub fn team(id: impl Into<String>) -> Self {
        Role::Team {
            id: id.into(),
            role: None,
        }
    }

    pub fn team_role(id: impl Into<String>, role: impl Into<String>) -> Self {
        Role::Team {
            id: id.into(),
            role: Some(role.into()),
        }
    }

    pub fn member(id: impl Into<String>) -> Self {
        Role::Member { id: id.into() }
    }

    pub fn label(id: impl Into<String>) -> Self {
        Role::Label { id: id.into() }
    }

    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Any => RoleKind::Any,
            Role::Guests => RoleKind::Guests,
            Role::Users { .. } => RoleKind::Users,
            Role::User { .. } => RoleKind::User,
            Role::Team { .. } => RoleKind::Team,
            Role::Member { .. } => RoleKind::Member,
            Role::Label { .. } => RoleKind::Label,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            Role::Any | Role::Guests | Role::Users { .. } => None,
            Role::User { id, .. }
            | Role::Team { id, .. }
            | Role::Member { id }
            | Role::Label { id } => Some(id),
        }
    }

    pub fn dimension(&self) -> Option<&str> {
        match self {
            Role::Users { verification } | Role::User { verification, .. } => {
                verification.map(Verification::as_str)
            }
            Role::Team { role, .. } => role.as_deref(),
            _ => None,
        }
    }

    /// Parses and validates one role string against the grammar table.
    pub fn parse(raw: &str) -> Result<Self, PermissionError> {
        let invalid = |reason: String| PermissionError::InvalidRole {
            role: raw.to_string(),
            reason,
        };
        let mut parts = raw.splitn(3, ':');
        let kind_part = parts.next().unwrap_or_default();
        let identifier = parts.next().filter(|s| !s.is_empty());
        let dimension = parts.next().filter(|s| !s.is_empty());

        let kind = RoleKind::parse(kind_part)
            .ok_or_else(|| invalid(format!("unknown role kind '{kind_part}'")))?;
        kind.grammar()
            .check(identifier, dimension)
            .map_err(invalid)?;

        let verification = |dimension: Option<&str>| match dimension {
            Some("verified") => Some(Verification::Verified),
            Some("unverified") => Some(Verification::Unverified),
            _ => None,
        };
        let id = identifier.unwrap_or_default().to_string();
        Ok(match kind {
            RoleKind::Any => Role::Any,
            RoleKind::Guests => Role::Guests,
            RoleKind::Users => Role::Users {
                verification: verification(dimension),
            },
            RoleKind::User => Role::User {
                id,
                verification: verification(dimension),
            },
            RoleKind::Team => Role::Team {
                id,
                role: dimension.map(str::to_string),
            },
            RoleKind::Member => Role::Member { id },
            RoleKind::Label => Role::Label { id },
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())?;
        match (self.identifier(), self.dimension()) {
            (Some(id), Some(dimension)) => write!(f, ":{id}:{dimension}"),
            (Some(id), None) => write!(f, ":{id}"),
            (None, Some(dimension)) => write!(f, "::{dimension}"),
            (None, None) => Ok(()),
        }
    }
}

impl FromStr for Role {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Forbidden,
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    /// Alphanumerics plus `.`, `-` and `_`, not starting with a symbol.
    Uid,
    Alphanumeric,
}

struct RoleGrammar {
    kind: RoleKind,
    identifier: Slot,
    identifier_charset: Charset,
    dimension: Slot,
    dimension_options: Option<&'static [&'static str]>,
}

const VERIFICATION_OPTIONS: &[&str] = &["verified", "unverified"];

const ROLE_GRAMMAR: &[RoleGrammar] = &[
    RoleGrammar {
        kind: RoleKind::Any,
        identifier: Slot::Forbidden,
        identifier_charset: Charset::Uid,
        dimension: Slot::Forbidden,
        dimension_options: None,
    },
    RoleGrammar {
        kind: RoleKind::Guests,
        identifier: Slot::Forbidden,
        identifier_charset: Charset::Uid,
        dimension: Slot::Forbidden,
        dimension_options: None,
    },
    RoleGrammar {
        kind: RoleKind::Users,
        identifier: Slot::Forbidden,
        identifier_charset: Charset::Uid,
        dimension: Slot::Optional,
        dimension_options: Some(VERIFICATION_OPTIONS),
    },
    RoleGrammar {
        kind: RoleKind::User,
        identifier: Slot::Required,
        identifier_charset: Charset::Uid,
        dimension: Slot::Optional,
        dimension_options: Some(VERIFICATION_OPTIONS),
    },
    RoleGrammar {
        kind: RoleKind::Team,
        identifier: Slot::Required,
        identifier_charset: Charset::Uid,
        dimension: Slot::Optional,
        dimension_options: None,
    },
    RoleGrammar {
        kind: RoleKind::Member,
        identifier: Slot::Required,
        identifier_charset: Charset::Uid,
        dimension: Slot::Forbidden,
        dimension_options: None,
    },
    RoleGrammar {
        kind: RoleKind::Label,
        identifier: Slot::Required,
        identifier_charset: Charset::Alphanumeric,
        dimension: Slot::Forbidden,
        dimension_options: None,
    },
];

impl RoleGrammar {
    fn check(&self, identifier: Option<&str>, dimension: Option<&str>) -> Result<(), String> {
        let kind = self.kind.as_str();
        match (self.identifier, identifier) {
            (Slot::Forbidden, Some(_)) => {
                return Err(format!("role '{kind}' can not have an identifier"));
            }
            (Slot::Required, None) => {
                return Err(format!("role '{kind}' must have an identifier"));
            }
            (_, Some(id)) => check_part(id, self.identifier_charset)
                .map_err(|reason| format!("identifier {reason}"))?,
            _ => {}
        }
        match (self.dimension, dimension) {
            (Slot::Forbidden, Some(_)) => {
                Err(format!("role '{kind}' can not have a dimension"))
            }
            (Slot::Required, None) => Err(format!("role '{kind}' must have a dimension")),
            (_, Some(dim)) => {
                if let Some(options) = self.dimension_options
                    && !options.contains(&dim)
                {
                    return Err(format!(
                        "dimension '{dim}' for role '{kind}' must be one of: {}",
                        options.join(", ")
                    ));
                }
                check_part(dim, Charset::Uid).map_err(|reason| format!("dimension {reason}"))
            }
            _ => Ok(()),
        }
    }
}

fn check_part(part: &str, charset: Charset) -> Result<(), String> {
    if part.len() > MAX_ROLE_PART_LENGTH {
        return Err(format!(
            "must be at most {MAX_ROLE_PART_LENGTH} characters"
        ));
    }
    let valid = match charset {
        Charset::Alphanumeric => part.chars().all(|c| c.is_ascii_alphanumeric()),
        Charset::Uid => {
            part.chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        }
    };
    if valid {
        Ok(())
    } else {
        Err(match charset {
            Charset::Alphanumeric => "must contain only alphanumeric characters".to_string(),
            Charset::Uid => "must contain only alphanumerics, period, hyphen or underscore and \
                             can not start with a special character"
                .to_string(),
        })
    }
}

/// Validates a batch of role strings, enforcing an optional maximum count.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleValidator {
    max_count: Option<usize>,
}

impl RoleValidator {
    pub fn new(max_count: Option<usize>) -> Self {
        Self { max_count }
    }

    pub fn validate<S: AsRef<str>>(&self, roles: &[S]) -> Result<Vec<Role>, PermissionError> {
        if let Some(max) = self.max_count
            && roles.len() > max
        {
            return Err(PermissionError::TooMany {
                count: roles.len(),
                max,
            });
        }
        roles.iter().map(|r| Role::parse(r.as_ref())).collect()
    }

    pub fn is_valid<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.validate(roles).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, RoleValidator, Verification};
    use proptest::prelude::*;

    #[test]
    fn serializes_kind_identifier_and_dimension() {
        assert_eq!(Role::team_role("t1", "editor").to_string(), "team:t1:editor");
        assert_eq!(Role::user("u1").to_string(), "user:u1");
        assert_eq!(Role::Any.to_string(), "any");
        assert_eq!(
            Role::Users {
                verification: Some(Verification::Verified)
            }
            .to_string(),
            "users::verified"
        );
    }

    #[test]
    fn grammar_rejects_misplaced_parts() {
        for raw in [
            "any:someone",
            "guests::x",
            "user",
            "team",
            "member:m1:owner",
            "label:vip-1",
            "users::admin",
            "user:u1:admin",
            "owner:o1",
            "user:_hidden",
        ] {
            assert!(Role::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn grammar_error_names_the_violation() {
        let err = Role::parse("member:m1:owner").expect_err("dimension forbidden");
        assert_eq!(
            err.to_string(),
            "invalid role 'member:m1:owner': role 'member' can not have a dimension"
        );
    }

    #[test]
    fn validator_enforces_max_count() {
        let validator = RoleValidator::new(Some(2));
        assert!(validator.is_valid(&["any", "users"]));
        assert!(!validator.is_valid(&["any", "users", "guests"]));
        assert!(RoleValidator::default().is_valid(&["any", "users", "guests"]));
    }

    fn arb_part() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9][a-zA-Z0-9._-]{0,20}"
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        let verification = prop_oneof![
            Just(None),
            Just(Some(Verification::Verified)),
            Just(Some(Verification::Unverified)),
        ];
        prop_oneof![
            Just(Role::Any),
            Just(Role::Guests),
            verification
                .clone()
                .prop_map(|verification| Role::Users { verification }),
            (arb_part(), verification)
                .prop_map(|(id, verification)| Role::User { id, verification }),
            (arb_part(), proptest::option::of(arb_part()))
                .prop_map(|(id, role)| Role::Team { id, role }),
            arb_part().prop_map(|id| Role::Member { id }),
            "[a-zA-Z0-9]{1,20}".prop_map(|id| Role::Label { id }),
        ]
    }

    proptest! {
        #[test]
        fn parse_inverts_display(role in arb_role()) {
            let parsed = Role::parse(&role.to_string()).expect("valid role parses");
            prop_assert_eq!(parsed, role);
        }
    }
}
