//! Read-model queries over jobs and assignments.
//!
//! Filters are explicit, request-scoped values passed in by the caller —
//! there is no ambient "previously selected group" state anywhere in the
//! query layer.

use crate::error::Result;
use crate::model::job::{Assignment, Job, JobStatus};
use crate::model::GroupId;
use chrono::{DateTime, Utc};

/// Which lifecycle bucket a listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusBucket {
    /// Everything still in flight: excludes closed and returned rows,
    /// ordered by creation time.
    #[default]
    Open,
    /// Closed rows, ordered by the job's close time.
    Closed,
}

/// Explicit request-scoped filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub group: Option<GroupId>,
    pub bucket: StatusBucket,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Matches address, address information, external id, or the
    /// duplicate-reference list.
    pub search: Option<String>,
    pub ascending: bool,
}

/// One listing row: the assignment plus its job.
#[derive(Debug, Clone)]
pub struct JobListEntry {
    pub assignment: Assignment,
    pub job: Job,
}

/// Per-status counts of active assignments under a filter. Returned rows
/// only count toward the Return bucket from the home assignment, so a
/// returned job shows up once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub open: i64,
    pub partial: i64,
    pub returned: i64,
    pub transferred: i64,
}

impl super::Db {
    /// List assignments with their jobs under an explicit filter.
    /// Archived groups are always excluded.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobListEntry>> {
        let (status_clause, date_column, order) = match filter.bucket {
            StatusBucket::Open => (
                "j.status NOT IN ('close', 'return')",
                "a.created_at",
                if filter.ascending { "a.created_at ASC" } else { "a.created_at DESC" },
            ),
            StatusBucket::Closed => (
                "a.status = 'close'",
                "j.closed_at",
                if filter.ascending { "j.closed_at ASC" } else { "j.closed_at DESC" },
            ),
        };

        let sql = format!(
            "SELECT a.id, a.job_id, a.group_id, a.status, a.is_active, a.is_home_group,
                    a.is_reviewed, a.further_inspection, a.further_billing, a.is_lock_closed,
                    a.created_by, a.updated_by, a.created_at, a.updated_at,
                    j.id AS j_id, j.external_id, j.address, j.address_information, j.latitude,
                    j.longitude, j.description, j.status AS j_status, j.priority,
                    j.further_inspection AS j_further_inspection,
                    j.further_billing AS j_further_billing, j.is_lock_closed AS j_is_lock_closed,
                    j.duplicate_reference, j.created_by AS j_created_by,
                    j.updated_by AS j_updated_by, j.closed_by, j.closed_at,
                    j.created_at AS j_created_at, j.updated_at AS j_updated_at
             FROM assignments a
             JOIN jobs j ON j.id = a.job_id
             JOIN groups g ON g.id = a.group_id
             WHERE NOT g.is_archive
               AND {status_clause}
               AND ($1::uuid IS NULL OR a.group_id = $1)
               AND ($2::timestamptz IS NULL OR {date_column} >= $2)
               AND ($3::timestamptz IS NULL OR {date_column} <= $3)
               AND ($4::text IS NULL OR j.address ILIKE '%' || $4 || '%'
                    OR j.address_information ILIKE '%' || $4 || '%'
                    OR j.external_id ILIKE '%' || $4 || '%'
                    OR j.duplicate_reference ILIKE '%' || $4 || '%')
             ORDER BY {order}"
        );

        let rows: Vec<ListRow> = sqlx::query_as(&sql)
            .bind(filter.group.map(|g| g.0))
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.search.as_deref())
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(ListRow::try_into_entry).collect()
    }

    /// Status counts over active assignments, optionally scoped to a group.
    pub async fn status_counts(&self, group: Option<GroupId>) -> Result<StatusCounts> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT
                 COUNT(*) FILTER (WHERE a.status = 'open'),
                 COUNT(*) FILTER (WHERE a.status = 'partial'),
                 COUNT(*) FILTER (WHERE a.status = 'return' AND a.is_home_group),
                 COUNT(*) FILTER (WHERE a.status = 'transfer')
             FROM assignments a
             JOIN groups g ON g.id = a.group_id
             WHERE a.is_active AND NOT g.is_archive
               AND ($1::uuid IS NULL OR a.group_id = $1)",
        )
        .bind(group.map(|g| g.0))
        .fetch_one(self.pool())
        .await?;
        Ok(StatusCounts {
            open: row.0,
            partial: row.1,
            returned: row.2,
            transferred: row.3,
        })
    }

    /// Active assignments with open or transferred status, for the map
    /// and dispatch views.
    pub async fn active_jobs_in_group(&self, group: GroupId) -> Result<Vec<JobListEntry>> {
        self.list_jobs(&JobFilter {
            group: Some(group),
            bucket: StatusBucket::Open,
            ..Default::default()
        })
        .await
        .map(|entries| {
            entries
                .into_iter()
                .filter(|e| {
                    e.assignment.is_active
                        && matches!(e.assignment.status, JobStatus::Open | JobStatus::Transfer)
                })
                .collect()
        })
    }
}

/// Internal row type for sqlx::FromRow — assignment columns followed by
/// aliased job columns.
#[derive(sqlx::FromRow)]
struct ListRow {
    id: uuid::Uuid,
    job_id: uuid::Uuid,
    group_id: uuid::Uuid,
    status: String,
    is_active: bool,
    is_home_group: bool,
    is_reviewed: bool,
    further_inspection: bool,
    further_billing: bool,
    is_lock_closed: bool,
    created_by: Option<uuid::Uuid>,
    updated_by: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    j_id: uuid::Uuid,
    external_id: String,
    address: String,
    address_information: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    description: String,
    j_status: String,
    priority: bool,
    j_further_inspection: bool,
    j_further_billing: bool,
    j_is_lock_closed: bool,
    duplicate_reference: Option<String>,
    j_created_by: Option<uuid::Uuid>,
    j_updated_by: Option<uuid::Uuid>,
    closed_by: Option<uuid::Uuid>,
    closed_at: Option<DateTime<Utc>>,
    j_created_at: DateTime<Utc>,
    j_updated_at: DateTime<Utc>,
}

impl ListRow {
    fn try_into_entry(self) -> Result<JobListEntry> {
        use crate::model::{AssignmentId, JobId, UserId};
        Ok(JobListEntry {
            assignment: Assignment {
                id: AssignmentId(self.id),
                job_id: JobId(self.job_id),
                group_id: GroupId(self.group_id),
                status: self.status.parse()?,
                is_active: self.is_active,
                is_home_group: self.is_home_group,
                is_reviewed: self.is_reviewed,
                further_inspection: self.further_inspection,
                further_billing: self.further_billing,
                is_lock_closed: self.is_lock_closed,
                created_by: self.created_by.map(UserId),
                updated_by: self.updated_by.map(UserId),
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            job: Job {
                id: JobId(self.j_id),
                external_id: self.external_id,
                address: self.address,
                address_information: self.address_information,
                latitude: self.latitude,
                longitude: self.longitude,
                description: self.description,
                status: self.j_status.parse()?,
                priority: self.priority,
                further_inspection: self.j_further_inspection,
                further_billing: self.j_further_billing,
                is_lock_closed: self.j_is_lock_closed,
                duplicate_reference: self.duplicate_reference,
                created_by: self.j_created_by.map(UserId),
                updated_by: self.j_updated_by.map(UserId),
                closed_by: self.closed_by.map(UserId),
                closed_at: self.closed_at,
                created_at: self.j_created_at,
                updated_at: self.j_updated_at,
            },
        })
    }
}
