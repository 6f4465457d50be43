//! Core data model.
//!
//! A job is one work order's durable identity and content. Routing
//! between groups happens through per-group assignment records; exactly
//! one assignment is active and exactly one is the home assignment for
//! any job. Exception records capture returns and duplicate flags that
//! await resolution.

pub mod billing;
pub mod exception;
pub mod job;
pub mod notify;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for job ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

/// Newtype for assignment ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub Uuid);

/// Newtype for exception-record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionId(pub Uuid);

/// Newtype for group ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

/// Newtype for user ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

/// Newtype for billing-line ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillId(pub Uuid);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

impl_id!(JobId);
impl_id!(AssignmentId);
impl_id!(ExceptionId);
impl_id!(GroupId);
impl_id!(UserId);
impl_id!(BillId);

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Role a user holds, used to filter group membership for routing
/// exceptions and notification fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Inspector,
    GroupManager,
    FieldWorker,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Inspector => "inspector",
            Role::GroupManager => "group_manager",
            Role::FieldWorker => "field_worker",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "inspector" => Ok(Role::Inspector),
            "group_manager" => Ok(Role::GroupManager),
            "field_worker" => Ok(Role::FieldWorker),
            _ => Err(crate::error::Error::Other(format!("unknown role: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Groups and users
// ---------------------------------------------------------------------------

/// An organizational group jobs route between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub is_archive: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A user able to act on jobs. Role determines routing visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub user_name: String,
    pub email: String,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_wire_form() {
        for role in [
            Role::Admin,
            Role::Inspector,
            Role::GroupManager,
            Role::FieldWorker,
        ] {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("superuser".parse::<Role>().is_err());
    }
}
