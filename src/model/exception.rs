//! Exception records: returns for correction and duplicate flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, ExceptionId, GroupId, UserId};

/// Why a job was sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Sent back for correction; carries the reporter's comment.
    WrongInformation,
    /// Flagged as a duplicate of another job's assignment.
    Duplicate,
}

impl ExceptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::WrongInformation => "wrong_information",
            ExceptionKind::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExceptionKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wrong_information" => Ok(ExceptionKind::WrongInformation),
            "duplicate" => Ok(ExceptionKind::Duplicate),
            _ => Err(crate::error::Error::Other(format!(
                "unknown exception kind: {s}"
            ))),
        }
    }
}

/// A pending correction or duplicate flag awaiting resolution.
///
/// Routes to the flagged job's home assignment; `duplicate_assignment_id`
/// names the assignment of the job this one duplicates, when applicable.
/// Deleted on resolution or when a duplicate is confirmed and merged.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionRecord {
    pub id: ExceptionId,
    pub assignment_id: AssignmentId,
    pub duplicate_assignment_id: Option<AssignmentId>,
    pub kind: ExceptionKind,
    /// Present only for wrong-information returns.
    pub comment: Option<String>,
    /// Owning group at the time of the return.
    pub group_id: GroupId,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Users who may resolve this record: the home group's inspectors
    /// and admins, minus the actor who raised it.
    pub recipients: Vec<UserId>,
}
