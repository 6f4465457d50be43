//! Notifications: one persisted row per recipient per transition, plus a
//! best-effort push payload handed to the external transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobStatus;
use super::{AssignmentId, UserId};

/// What kind of transition a notification announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Open,
    Transfer,
    Return,
    Close,
    Delete,
}

impl NotifyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyKind::Open => "open",
            NotifyKind::Transfer => "transfer",
            NotifyKind::Return => "return",
            NotifyKind::Close => "close",
            NotifyKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotifyKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(NotifyKind::Open),
            "transfer" => Ok(NotifyKind::Transfer),
            "return" => Ok(NotifyKind::Return),
            "close" => Ok(NotifyKind::Close),
            "delete" => Ok(NotifyKind::Delete),
            _ => Err(crate::error::Error::Other(format!(
                "unknown notification kind: {s}"
            ))),
        }
    }
}

/// A persisted notification row.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: uuid::Uuid,
    pub assignment_id: Option<AssignmentId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub kind: NotifyKind,
    /// Job status snapshot at send time.
    pub job_status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// Payload handed to the push transport after the owning transaction
/// commits. Delivery is fire-and-forget; failures never roll back the
/// transition.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub kind: NotifyKind,
    pub job_status: JobStatus,
    pub assignment_id: Option<AssignmentId>,
}
