//! Job intake, metadata edits, the read model, and hard deletes.

use crate::db::{audit, group, notify};
use crate::error::{Error, Result};
use crate::model::job::*;
use crate::model::notify::NotifyKind;
use crate::model::{AssignmentId, GroupId, JobId, Role, UserId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

const JOB_COLS: &str = "id, external_id, address, address_information, latitude, longitude, \
     description, status, priority, further_inspection, further_billing, is_lock_closed, \
     duplicate_reference, created_by, updated_by, closed_by, closed_at, created_at, updated_at";

const ASSIGNMENT_COLS: &str = "id, job_id, group_id, status, is_active, is_home_group, \
     is_reviewed, further_inspection, further_billing, is_lock_closed, created_by, updated_by, \
     created_at, updated_at";

impl super::Db {
    /// Create a job and its first assignment in the given group.
    ///
    /// The first assignment is the home assignment and starts active with
    /// status Open. Priority jobs announce themselves to the group's
    /// field members (admins and inspectors are not notified).
    pub async fn create_job(&self, new: NewJob, group_id: GroupId, actor: UserId) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let now = chrono::Utc::now();
        let job_id = JobId::new();

        group::fetch_live_group(&mut *tx, group_id).await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM jobs WHERE external_id = $1")
            .bind(&new.external_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            return Err(Error::Validation(format!(
                "a job with external id {} already exists",
                new.external_id
            )));
        }

        sqlx::query(
            "INSERT INTO jobs (id, external_id, address, address_information, latitude, longitude,
                 description, status, priority, further_inspection, is_lock_closed,
                 created_by, updated_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $13, $13)",
        )
        .bind(job_id.0)
        .bind(&new.external_id)
        .bind(&new.address)
        .bind(&new.address_information)
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(&new.description)
        .bind(JobStatus::Open.as_str())
        .bind(new.priority)
        .bind(new.further_inspection)
        .bind(new.is_lock_closed)
        .bind(actor.0)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::from(e).integrity_on_unique("a job with this external id already exists")
        })?;

        for path in &new.images {
            sqlx::query(
                "INSERT INTO job_images (id, job_id, path, close_job_image, created_by, created_at)
                 VALUES ($1, $2, $3, FALSE, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(job_id.0)
            .bind(path)
            .bind(actor.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        for path in &new.attachments {
            sqlx::query(
                "INSERT INTO job_attachments (id, job_id, path, close_job_attachment, created_by, created_at)
                 VALUES ($1, $2, $3, FALSE, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(job_id.0)
            .bind(path)
            .bind(actor.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        for note in &new.notes {
            sqlx::query(
                "INSERT INTO job_notes (id, job_id, note, created_by, updated_by, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $4, $5, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(job_id.0)
            .bind(note)
            .bind(actor.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let assignment_id = AssignmentId::new();
        sqlx::query(
            "INSERT INTO assignments (id, job_id, group_id, status, is_active, is_home_group,
                 further_inspection, is_lock_closed, created_by, updated_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, TRUE, TRUE, $5, $6, $7, $7, $8, $8)",
        )
        .bind(assignment_id.0)
        .bind(job_id.0)
        .bind(group_id.0)
        .bind(JobStatus::Open.as_str())
        .bind(new.further_inspection)
        .bind(new.is_lock_closed)
        .bind(actor.0)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        audit::append_log_on(&mut tx, job_id, LogAction::Create, actor).await?;

        let fan_out = if new.priority {
            let recipients = group::members_excluding_roles_on(
                &mut *tx,
                group_id,
                &[Role::Admin, Role::Inspector],
                Some(actor),
            )
            .await?;
            notify::fan_out_on(
                &mut tx,
                Some(assignment_id),
                actor,
                &recipients,
                NotifyKind::Open,
                JobStatus::Open,
                "opened",
            )
            .await?
        } else {
            None
        };

        tx.commit().await?;

        metrics::jobs_created().add(1, &[KeyValue::new("priority", new.priority)]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }

        self.job_view(job_id).await
    }

    /// Get a job by id.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        fetch_job_on(self.pool(), id).await
    }

    /// Get an assignment by id.
    pub async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment> {
        fetch_assignment_on(self.pool(), id).await
    }

    /// The job plus its full assignment set, in creation order.
    pub async fn job_view(&self, id: JobId) -> Result<JobView> {
        let job = fetch_job_on(self.pool(), id).await?;
        let assignments = fetch_assignments_on(self.pool(), id).await?;
        Ok(JobView { job, assignments })
    }

    /// Metadata-only edit of an open or transferred job. Does not touch
    /// routing state; appends an Update (or Transfer, when the assignment
    /// is mid-transfer) audit row.
    pub async fn update_job(
        &self,
        assignment_id: AssignmentId,
        actor: UserId,
        edit: JobEdit,
        home_reassign: Option<GroupId>,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let assignment = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let job = lock_job_on(&mut *tx, assignment.job_id).await?;

        apply_job_edit_on(&mut tx, &job, &edit, actor).await?;

        sqlx::query(
            "UPDATE assignments SET further_inspection = COALESCE($1, further_inspection),
                 further_billing = COALESCE($2, further_billing), updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(edit.further_inspection)
        .bind(edit.further_billing)
        .bind(actor.0)
        .bind(chrono::Utc::now())
        .bind(assignment.id.0)
        .execute(&mut *tx)
        .await?;

        if let Some(target) = home_reassign {
            super::routing::reassign_home_on(&mut tx, job.id, target, actor).await?;
        }

        let action = if assignment.status == JobStatus::Transfer {
            LogAction::Transfer
        } else {
            LogAction::Update
        };
        audit::append_log_on(&mut tx, job.id, action, actor).await?;

        tx.commit().await?;
        self.job_view(job.id).await
    }

    /// Reviewer approval toggle on a single assignment.
    pub async fn set_reviewed(&self, assignment_id: AssignmentId, reviewed: bool) -> Result<()> {
        let rows = sqlx::query("UPDATE assignments SET is_reviewed = $1, updated_at = $2 WHERE id = $3")
            .bind(reviewed)
            .bind(chrono::Utc::now())
            .bind(assignment_id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(Error::NotFound(format!("assignment {assignment_id}")));
        }
        Ok(())
    }

    /// Hard-delete a job and its owned entity graph.
    ///
    /// Destructive and irreversible. The home group's admins and managers
    /// are notified with the address, since the rows are gone afterwards.
    pub async fn delete_job(&self, job_id: JobId, actor: UserId) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let job = lock_job_on(&mut *tx, job_id).await?;
        let home = fetch_home_on(&mut *tx, job_id).await?;

        let recipients = group::members_with_roles_on(
            &mut *tx,
            home.group_id,
            &[Role::Admin, Role::GroupManager],
            Some(actor),
        )
        .await?;
        let message = format!(
            "Job at {} deleted by @{}",
            job.address,
            notify::sender_display_name_on(&mut *tx, actor).await?
        );
        let fan_out = notify::fan_out_message_on(
            &mut tx,
            None,
            actor,
            &recipients,
            NotifyKind::Delete,
            job.status,
            message,
        )
        .await?;

        delete_job_graph_on(&mut tx, job_id).await?;

        tx.commit().await?;

        metrics::job_transitions().add(1, &[KeyValue::new("operation", "delete")]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared fetch helpers — accept any executor so they run both inside
// transactions and directly against the pool.
// ---------------------------------------------------------------------------

pub(crate) async fn fetch_job_on<'e, E>(conn: E, id: JobId) -> Result<Job>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {JOB_COLS} FROM jobs WHERE id = $1"))
        .bind(id.0)
        .fetch_optional(conn)
        .await?;
    row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
        .try_into_job()
}

/// Fetch the job row under `FOR UPDATE`, serializing concurrent
/// operations on the same job so the single-active-assignment invariant
/// survives racing writers.
pub(crate) async fn lock_job_on<'e, E>(conn: E, id: JobId) -> Result<Job>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<JobRow> =
        sqlx::query_as(&format!("SELECT {JOB_COLS} FROM jobs WHERE id = $1 FOR UPDATE"))
            .bind(id.0)
            .fetch_optional(conn)
            .await?;
    row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
        .try_into_job()
}

pub(crate) async fn fetch_assignment_on<'e, E>(conn: E, id: AssignmentId) -> Result<Assignment>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<AssignmentRow> =
        sqlx::query_as(&format!("SELECT {ASSIGNMENT_COLS} FROM assignments WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(conn)
            .await?;
    row.ok_or_else(|| Error::NotFound(format!("assignment {id}")))?
        .try_into_assignment()
}

/// The home assignment for a job. Every routed job has exactly one.
pub(crate) async fn fetch_home_on<'e, E>(conn: E, job_id: JobId) -> Result<Assignment>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<AssignmentRow> = sqlx::query_as(&format!(
        "SELECT {ASSIGNMENT_COLS} FROM assignments WHERE job_id = $1 AND is_home_group"
    ))
    .bind(job_id.0)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| Error::NotFound(format!("home assignment for job {job_id}")))?
        .try_into_assignment()
}

pub(crate) async fn fetch_assignments_on<'e, E>(conn: E, job_id: JobId) -> Result<Vec<Assignment>>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let rows: Vec<AssignmentRow> = sqlx::query_as(&format!(
        "SELECT {ASSIGNMENT_COLS} FROM assignments WHERE job_id = $1 ORDER BY created_at"
    ))
    .bind(job_id.0)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(AssignmentRow::try_into_assignment).collect()
}

pub(crate) async fn find_assignment_for_group_on<'e, E>(
    conn: E,
    job_id: JobId,
    group_id: GroupId,
) -> Result<Option<Assignment>>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<AssignmentRow> = sqlx::query_as(&format!(
        "SELECT {ASSIGNMENT_COLS} FROM assignments WHERE job_id = $1 AND group_id = $2"
    ))
    .bind(job_id.0)
    .bind(group_id.0)
    .fetch_optional(conn)
    .await?;
    row.map(AssignmentRow::try_into_assignment).transpose()
}

/// Apply a partial field edit to a job. A unique-constraint hit on the
/// external id surfaces as `Integrity` and rolls back the caller's
/// transaction.
pub(crate) async fn apply_job_edit_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job: &Job,
    edit: &JobEdit,
    actor: UserId,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET
             external_id = COALESCE($1, external_id),
             address = COALESCE($2, address),
             address_information = COALESCE($3, address_information),
             latitude = COALESCE($4, latitude),
             longitude = COALESCE($5, longitude),
             description = COALESCE($6, description),
             priority = COALESCE($7, priority),
             further_inspection = COALESCE($8, further_inspection),
             further_billing = COALESCE($9, further_billing),
             updated_by = $10, updated_at = $11
         WHERE id = $12",
    )
    .bind(edit.external_id.as_deref())
    .bind(edit.address.as_deref())
    .bind(edit.address_information.as_deref())
    .bind(edit.latitude)
    .bind(edit.longitude)
    .bind(edit.description.as_deref())
    .bind(edit.priority)
    .bind(edit.further_inspection)
    .bind(edit.further_billing)
    .bind(actor.0)
    .bind(chrono::Utc::now())
    .bind(job.id.0)
    .execute(&mut **tx)
    .await
    .map_err(|e| Error::from(e).integrity_on_unique("a job with this external id already exists"))?;
    Ok(())
}

/// Delete a job's owned entity graph in explicit dependency order:
/// billing lines, exception records and their recipients, notifications,
/// media references, notes, audit rows, assignments, then the job row.
pub(crate) async fn delete_job_graph_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: JobId,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM exception_recipients WHERE exception_id IN (
             SELECT e.id FROM exceptions e
             JOIN assignments a ON a.id IN (e.assignment_id, e.duplicate_assignment_id)
             WHERE a.job_id = $1)",
    )
    .bind(job_id.0)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "DELETE FROM exceptions e USING assignments a
         WHERE a.id IN (e.assignment_id, e.duplicate_assignment_id) AND a.job_id = $1",
    )
    .bind(job_id.0)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "DELETE FROM close_job_bills WHERE assignment_id IN (
             SELECT id FROM assignments WHERE job_id = $1)",
    )
    .bind(job_id.0)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "DELETE FROM notifications WHERE assignment_id IN (
             SELECT id FROM assignments WHERE job_id = $1)",
    )
    .bind(job_id.0)
    .execute(&mut **tx)
    .await?;
    for table in ["job_images", "job_attachments", "job_notes", "job_logs"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE job_id = $1"))
            .bind(job_id.0)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query("DELETE FROM assignments WHERE job_id = $1")
        .bind(job_id.0)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(job_id.0)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct JobRow {
    id: Uuid,
    external_id: String,
    address: String,
    address_information: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    description: String,
    status: String,
    priority: bool,
    further_inspection: bool,
    further_billing: bool,
    is_lock_closed: bool,
    duplicate_reference: Option<String>,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
    closed_by: Option<Uuid>,
    closed_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl JobRow {
    pub(crate) fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            id: JobId(self.id),
            external_id: self.external_id,
            address: self.address,
            address_information: self.address_information,
            latitude: self.latitude,
            longitude: self.longitude,
            description: self.description,
            status: self.status.parse()?,
            priority: self.priority,
            further_inspection: self.further_inspection,
            further_billing: self.further_billing,
            is_lock_closed: self.is_lock_closed,
            duplicate_reference: self.duplicate_reference,
            created_by: self.created_by.map(UserId),
            updated_by: self.updated_by.map(UserId),
            closed_by: self.closed_by.map(UserId),
            closed_at: self.closed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct AssignmentRow {
    id: Uuid,
    job_id: Uuid,
    group_id: Uuid,
    status: String,
    is_active: bool,
    is_home_group: bool,
    is_reviewed: bool,
    further_inspection: bool,
    further_billing: bool,
    is_lock_closed: bool,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl AssignmentRow {
    pub(crate) fn try_into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
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
        })
    }
}
