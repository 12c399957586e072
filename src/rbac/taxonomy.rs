//! Permission vocabulary
//!
//! Tags are `<action>:<entity>` strings. The full set is the cartesian
//! product of the configured actions and entities; entity names are
//! normalized to snake_case table names first.

use crate::error::AppError;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Known permission actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    List,
    Assign,
    Upload,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::List,
        Action::Assign,
        Action::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::List => "list",
            Action::Assign => "assign",
            Action::Upload => "upload",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::BadRequest(format!("Unknown permission action: {}", s)))
    }
}

/// Entities that exist in every deployment
pub const BUILTIN_ENTITIES: [&str; 6] = [
    "users",
    "user_profiles",
    "roles",
    "permissions",
    "user_api_keys",
    "files",
];

pub fn default_actions() -> Vec<String> {
    Action::ALL.iter().map(|a| a.as_str().to_string()).collect()
}

pub fn default_entities() -> Vec<String> {
    BUILTIN_ENTITIES.iter().map(|e| e.to_string()).collect()
}

/// `UserProfiles` → `user_profiles`, `deletedAt` → `deleted_at`,
/// `HTTPStatus` → `http_status`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() {
            let prev = if i > 0 { chars.get(i - 1) } else { None };
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// A single `<action>:<entity>` capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionTag {
    action: String,
    entity: String,
}

impl PermissionTag {
    pub fn new(action: &str, entity: &str) -> Self {
        Self {
            action: action.trim().to_lowercase(),
            entity: to_snake_case(entity),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Description stored alongside the tag
    pub fn description(&self) -> String {
        format!("Allows the user to {} {}", self.action, self.entity)
    }
}

impl fmt::Display for PermissionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.entity)
    }
}

impl FromStr for PermissionTag {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((action, entity))
                if !action.trim().is_empty()
                    && !entity.trim().is_empty()
                    && !entity.contains(':') =>
            {
                Ok(Self::new(action, entity))
            }
            _ => Err(AppError::BadRequest(format!("Invalid permission tag: {}", s))),
        }
    }
}

/// The action × entity vocabulary
#[derive(Debug, Clone)]
pub struct Taxonomy {
    actions: Vec<String>,
    entities: Vec<String>,
}

impl Taxonomy {
    pub fn new<A, E>(actions: A, entities: E) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let actions = actions
            .into_iter()
            .map(|a| a.as_ref().trim().to_lowercase())
            .filter(|a| !a.is_empty() && seen.insert(a.clone()))
            .collect();

        let mut seen = BTreeSet::new();
        let entities = entities
            .into_iter()
            .map(|e| to_snake_case(e.as_ref()))
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();

        Self { actions, entities }
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Every tag, entity-major
    pub fn tags(&self) -> Vec<PermissionTag> {
        self.entities
            .iter()
            .flat_map(|entity| {
                self.actions
                    .iter()
                    .map(move |action| PermissionTag::new(action, entity))
            })
            .collect()
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new(default_actions(), default_entities())
    }
}

/// A role created by bootstrap
#[derive(Debug, Clone)]
pub struct DefaultRole {
    pub name: &'static str,
    pub description: &'static str,
    /// `None` grants every tag of the taxonomy
    pub grants: Option<&'static [&'static str]>,
}

impl DefaultRole {
    /// Tags this role receives, restricted to what the taxonomy knows
    pub fn tags(&self, taxonomy: &Taxonomy) -> Vec<String> {
        let all: Vec<String> = taxonomy.tags().iter().map(|t| t.to_string()).collect();
        match self.grants {
            None => all,
            Some(grants) => grants
                .iter()
                .filter(|g| all.iter().any(|t| t == *g))
                .map(|g| g.to_string())
                .collect(),
        }
    }
}

pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";

pub fn default_roles() -> [DefaultRole; 2] {
    [
        DefaultRole {
            name: ADMIN_ROLE,
            description: "Administrator of the app",
            grants: None,
        },
        DefaultRole {
            name: USER_ROLE,
            description: "Normal user of the app",
            grants: Some(&["read:users", "read:user_profiles", "update:user_profiles"]),
        },
    ]
}
