//! Jobs, assignments, and the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, GroupId, JobId, UserId};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Canonical lifecycle status, shared by jobs and assignments.
///
/// A job's status mirrors its home assignment; per-assignment status may
/// lag or lead it during multi-step transitions. Stored as the lowercase
/// wire form; human-facing labels are a display concern, not part of the
/// state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Transfer,
    Partial,
    Close,
    Return,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Transfer => "transfer",
            JobStatus::Partial => "partial",
            JobStatus::Close => "close",
            JobStatus::Return => "return",
        }
    }

    /// Display label for operator-facing output.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Open => "Open",
            JobStatus::Transfer => "Transferred",
            JobStatus::Partial => "Partially closed",
            JobStatus::Close => "Closed",
            JobStatus::Return => "Returned",
        }
    }

    /// Whether a job in this status may still be flagged for return.
    /// Closed and already-returned jobs may not.
    pub fn returnable(self) -> bool {
        !matches!(self, JobStatus::Close | JobStatus::Return)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(JobStatus::Open),
            "transfer" => Ok(JobStatus::Transfer),
            "partial" => Ok(JobStatus::Partial),
            "close" => Ok(JobStatus::Close),
            "return" => Ok(JobStatus::Return),
            _ => Err(crate::error::Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One work order. Routing state lives on its assignments; this row holds
/// the durable identity, location, and lifecycle timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Externally supplied identifier, globally unique.
    pub external_id: String,

    pub address: String,
    pub address_information: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,

    /// Mirrors the home assignment's status.
    pub status: JobStatus,

    pub priority: bool,
    pub further_inspection: bool,
    pub further_billing: bool,
    pub is_lock_closed: bool,

    /// Comma-joined external ids of jobs merged into this one. Append-only.
    pub duplicate_reference: Option<String>,

    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub closed_by: Option<UserId>,

    /// Set once on the first genuine close; reclosing never moves it.
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Append an external id to the duplicate-reference list.
    /// Existing entries are never replaced or reordered.
    pub fn appended_duplicate_reference(&self, external_id: &str) -> String {
        match self.duplicate_reference.as_deref() {
            Some(existing) if !existing.is_empty() => format!("{existing}, {external_id}"),
            _ => external_id.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One (job, group) routing record. The unit that carries per-group status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub job_id: JobId,
    pub group_id: GroupId,

    pub status: JobStatus,

    /// The currently effective routing record. Exactly one per job
    /// outside the atomic update window.
    pub is_active: bool,

    /// The authoritative assignment for close/return targeting and
    /// reporting. Exactly one per job with at least one assignment.
    pub is_home_group: bool,

    pub is_reviewed: bool,
    pub further_inspection: bool,
    pub further_billing: bool,
    pub is_lock_closed: bool,

    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read model returned by every state-machine operation: the job plus its
/// full assignment set, in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job: Job,
    pub assignments: Vec<Assignment>,
}

impl JobView {
    pub fn home(&self) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.is_home_group)
    }

    pub fn active(&self) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.is_active)
    }
}

// ---------------------------------------------------------------------------
// Builders and edits
// ---------------------------------------------------------------------------

/// Builder for creating a job. The engine's public API for intake.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) external_id: String,
    pub(crate) address: String,
    pub(crate) address_information: String,
    pub(crate) latitude: Option<f64>,
    pub(crate) longitude: Option<f64>,
    pub(crate) description: String,
    pub(crate) priority: bool,
    pub(crate) further_inspection: bool,
    pub(crate) is_lock_closed: bool,
    pub(crate) notes: Vec<String>,
    pub(crate) images: Vec<String>,
    pub(crate) attachments: Vec<String>,
}

impl NewJob {
    pub fn new(external_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            address: address.into(),
            address_information: String::new(),
            latitude: None,
            longitude: None,
            description: String::new(),
            priority: false,
            further_inspection: false,
            is_lock_closed: false,
            notes: Vec::new(),
            images: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn address_information(mut self, info: impl Into<String>) -> Self {
        self.address_information = info.into();
        self
    }

    pub fn location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn further_inspection(mut self, flag: bool) -> Self {
        self.further_inspection = flag;
        self
    }

    pub fn lock_closed(mut self, flag: bool) -> Self {
        self.is_lock_closed = flag;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn image(mut self, path: impl Into<String>) -> Self {
        self.images.push(path.into());
        self
    }

    pub fn attachment(mut self, path: impl Into<String>) -> Self {
        self.attachments.push(path.into());
        self
    }
}

/// Field updates applied to a job during close, metadata edits, or
/// wrong-information resolution. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct JobEdit {
    pub external_id: Option<String>,
    pub address: Option<String>,
    pub address_information: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub priority: Option<bool>,
    pub further_inspection: Option<bool>,
    pub further_billing: Option<bool>,
}

impl JobEdit {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none()
            && self.address.is_none()
            && self.address_information.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.further_inspection.is_none()
            && self.further_billing.is_none()
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Operation tag on an audit row. Each action attributes the actor under
/// a dedicated column, so the history view can show who created,
/// transferred, returned, closed, or partially closed the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Create,
    Update,
    Transfer,
    Return,
    Close,
    Partial,
}

impl LogAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LogAction::Create => "create",
            LogAction::Update => "update",
            LogAction::Transfer => "transfer",
            LogAction::Return => "return",
            LogAction::Close => "close",
            LogAction::Partial => "partial",
        }
    }

    /// The actor column this action writes on the audit row.
    pub fn actor_column(self) -> &'static str {
        match self {
            LogAction::Create => "created_by",
            LogAction::Update => "updated_by",
            LogAction::Transfer => "transferred_by",
            LogAction::Return => "returned_by",
            LogAction::Close => "closed_by",
            LogAction::Partial => "partially_closed_by",
        }
    }
}

impl std::fmt::Display for LogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogAction {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(LogAction::Create),
            "update" => Ok(LogAction::Update),
            "transfer" => Ok(LogAction::Transfer),
            "return" => Ok(LogAction::Return),
            "close" => Ok(LogAction::Close),
            "partial" => Ok(LogAction::Partial),
            _ => Err(crate::error::Error::Other(format!("unknown log action: {s}"))),
        }
    }
}

/// One append-only audit row.
#[derive(Debug, Clone, Serialize)]
pub struct JobLogEntry {
    pub job_id: JobId,
    pub action: LogAction,
    pub actor: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_form() {
        for status in [
            JobStatus::Open,
            JobStatus::Transfer,
            JobStatus::Partial,
            JobStatus::Close,
            JobStatus::Return,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn closed_and_returned_jobs_are_not_returnable() {
        assert!(JobStatus::Open.returnable());
        assert!(JobStatus::Transfer.returnable());
        assert!(JobStatus::Partial.returnable());
        assert!(!JobStatus::Close.returnable());
        assert!(!JobStatus::Return.returnable());
    }

    #[test]
    fn duplicate_reference_appends_without_replacing() {
        let mut job_ref: Option<String> = None;

        let job = job_with_reference(job_ref.clone());
        job_ref = Some(job.appended_duplicate_reference("JOB-77"));
        assert_eq!(job_ref.as_deref(), Some("JOB-77"));

        let job = job_with_reference(job_ref.clone());
        job_ref = Some(job.appended_duplicate_reference("JOB-91"));
        assert_eq!(job_ref.as_deref(), Some("JOB-77, JOB-91"));
    }

    #[test]
    fn each_action_maps_to_one_actor_column() {
        let columns: std::collections::HashSet<_> = [
            LogAction::Create,
            LogAction::Update,
            LogAction::Transfer,
            LogAction::Return,
            LogAction::Close,
            LogAction::Partial,
        ]
        .iter()
        .map(|a| a.actor_column())
        .collect();
        assert_eq!(columns.len(), 6);
    }

    fn job_with_reference(duplicate_reference: Option<String>) -> Job {
        let now = chrono::Utc::now();
        Job {
            id: JobId::new(),
            external_id: "JOB-1".into(),
            address: String::new(),
            address_information: String::new(),
            latitude: None,
            longitude: None,
            description: String::new(),
            status: JobStatus::Open,
            priority: false,
            further_inspection: false,
            further_billing: false,
            is_lock_closed: false,
            duplicate_reference,
            created_by: None,
            updated_by: None,
            closed_by: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
