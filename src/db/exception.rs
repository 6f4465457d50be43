//! Return and duplicate reconciliation.
//!
//! A return routes an exception record to the job's home assignment with
//! a recipient set (the home group's inspectors and admins, minus the
//! actor) that may resolve it. Wrong-information records resolve by
//! correcting the job and reopening it in the owning group; duplicate
//! flags resolve either by reopening the flagged job or by confirming the
//! duplicate, which merges the external id into the original and
//! hard-deletes the flagged job's entire graph.

use crate::db::job::{
    apply_job_edit_on, delete_job_graph_on, fetch_assignment_on, fetch_home_on, fetch_job_on,
    find_assignment_for_group_on, lock_job_on,
};
use crate::db::{audit, group, notify};
use crate::error::{Error, Result};
use crate::model::exception::{ExceptionKind, ExceptionRecord};
use crate::model::job::{JobEdit, JobStatus, JobView, LogAction};
use crate::model::notify::NotifyKind;
use crate::model::{AssignmentId, ExceptionId, GroupId, Role, UserId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

impl super::Db {
    /// Send a job back for correction.
    ///
    /// The home assignment becomes the active Return record; the acted-on
    /// assignment also drops to Return and deactivates unless it is the
    /// home itself. Closed or already-returned jobs conflict.
    pub async fn return_wrong_information(
        &self,
        assignment_id: AssignmentId,
        actor: UserId,
        comment: &str,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let acted = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let job = lock_job_on(&mut *tx, acted.job_id).await?;
        if !acted.status.returnable() {
            return Err(Error::Conflict(format!(
                "job {} cannot be returned while {}",
                job.external_id, acted.status
            )));
        }
        let home = fetch_home_on(&mut *tx, job.id).await?;

        let recipients = group::members_with_roles_on(
            &mut *tx,
            home.group_id,
            &[Role::Inspector, Role::Admin],
            Some(actor),
        )
        .await?;
        insert_exception_on(
            &mut tx,
            home.id,
            None,
            ExceptionKind::WrongInformation,
            Some(comment),
            acted.group_id,
            actor,
            &recipients,
        )
        .await?;

        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = $2, updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Return.as_str())
        .bind(acted.id == home.id)
        .bind(actor.0)
        .bind(now)
        .bind(acted.id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = TRUE, updated_by = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(JobStatus::Return.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(home.id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE jobs SET status = $1, updated_by = $2, updated_at = $3 WHERE id = $4")
            .bind(JobStatus::Return.as_str())
            .bind(actor.0)
            .bind(now)
            .bind(job.id.0)
            .execute(&mut *tx)
            .await?;

        audit::append_log_on(&mut tx, job.id, LogAction::Return, actor).await?;

        let inspectors =
            group::members_with_roles_on(&mut *tx, home.group_id, &[Role::Inspector], Some(actor))
                .await?;
        let fan_out = notify::fan_out_on(
            &mut tx,
            Some(home.id),
            actor,
            &inspectors,
            NotifyKind::Return,
            JobStatus::Return,
            "returned",
        )
        .await?;

        tx.commit().await?;

        metrics::exceptions_opened().add(1, &[KeyValue::new("kind", "wrong_information")]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }
        self.job_view(job.id).await
    }

    /// Flag the acted-on job as a duplicate of another job.
    ///
    /// The flagged job's assignments all deactivate, then its home comes
    /// back as the active Return record; the original job is untouched
    /// until the duplicate is confirmed. Flagging the same pair twice
    /// conflicts, as does flagging closed or returned jobs on either side.
    pub async fn return_duplicate(
        &self,
        assignment_id: AssignmentId,
        duplicate_of: AssignmentId,
        actor: UserId,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let acted = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let original = fetch_assignment_on(&mut *tx, duplicate_of).await?;
        if acted.job_id == original.job_id {
            return Err(Error::Validation(
                "a job cannot be flagged as a duplicate of itself".into(),
            ));
        }
        let job = lock_job_on(&mut *tx, acted.job_id).await?;
        let original_job = fetch_job_on(&mut *tx, original.job_id).await?;
        if !job.status.returnable() {
            return Err(Error::Conflict(format!(
                "job {} cannot be returned while {}",
                job.external_id, job.status
            )));
        }
        if !original_job.status.returnable() {
            return Err(Error::Conflict(format!(
                "the selected original job {} is currently {}",
                original_job.external_id, original_job.status
            )));
        }
        let home = fetch_home_on(&mut *tx, job.id).await?;

        let pair_exists: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM exceptions WHERE assignment_id = $1 AND duplicate_assignment_id = $2",
        )
        .bind(home.id.0)
        .bind(original.id.0)
        .fetch_optional(&mut *tx)
        .await?;
        if pair_exists.is_some() {
            return Err(Error::Conflict(format!(
                "job {} is already flagged as a duplicate of {}",
                job.external_id, original_job.external_id
            )));
        }

        let recipients = group::members_with_roles_on(
            &mut *tx,
            home.group_id,
            &[Role::Inspector, Role::Admin],
            Some(actor),
        )
        .await?;
        insert_exception_on(
            &mut tx,
            home.id,
            Some(original.id),
            ExceptionKind::Duplicate,
            None,
            acted.group_id,
            actor,
            &recipients,
        )
        .await?;

        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE assignments SET is_active = FALSE, updated_by = $1, updated_at = $2 WHERE job_id = $3",
        )
        .bind(actor.0)
        .bind(now)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = TRUE, updated_by = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(JobStatus::Return.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(home.id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE jobs SET status = $1, updated_by = $2, updated_at = $3 WHERE id = $4")
            .bind(JobStatus::Return.as_str())
            .bind(actor.0)
            .bind(now)
            .bind(job.id.0)
            .execute(&mut *tx)
            .await?;

        audit::append_log_on(&mut tx, job.id, LogAction::Return, actor).await?;

        let inspectors =
            group::members_with_roles_on(&mut *tx, home.group_id, &[Role::Inspector], Some(actor))
                .await?;
        let fan_out = notify::fan_out_on(
            &mut tx,
            Some(home.id),
            actor,
            &inspectors,
            NotifyKind::Return,
            JobStatus::Return,
            "returned",
        )
        .await?;

        tx.commit().await?;

        metrics::exceptions_opened().add(1, &[KeyValue::new("kind", "duplicate")]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }
        self.job_view(job.id).await
    }

    /// Resolve a wrong-information return: correct the job's fields and
    /// reopen it in the owning group.
    pub async fn resolve_wrong_information(
        &self,
        exception_id: ExceptionId,
        edit: JobEdit,
        actor: UserId,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let exception = fetch_exception_on(&mut *tx, exception_id).await?;
        if exception.kind != ExceptionKind::WrongInformation {
            return Err(Error::Conflict(
                "only wrong-information records resolve through this path".into(),
            ));
        }
        let home = fetch_assignment_on(&mut *tx, exception.assignment_id).await?;
        let job = lock_job_on(&mut *tx, home.job_id).await?;

        apply_job_edit_on(&mut tx, &job, &edit, actor).await?;

        let target = find_assignment_for_group_on(&mut *tx, job.id, exception.group_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "assignment for job {} in the returning group",
                    job.external_id
                ))
            })?;

        // The owning group's assignment becomes the active Open record;
        // the home assignment reopens but stays inactive unless it is
        // that same assignment.
        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = $2, updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Open.as_str())
        .bind(home.id == target.id)
        .bind(actor.0)
        .bind(now)
        .bind(home.id.0)
        .execute(&mut *tx)
        .await?;
        if home.id != target.id {
            sqlx::query(
                "UPDATE assignments SET status = $1, is_active = TRUE, updated_by = $2, updated_at = $3
                 WHERE id = $4",
            )
            .bind(JobStatus::Open.as_str())
            .bind(actor.0)
            .bind(now)
            .bind(target.id.0)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE jobs SET status = $1, updated_by = $2, updated_at = $3 WHERE id = $4")
            .bind(JobStatus::Open.as_str())
            .bind(actor.0)
            .bind(now)
            .bind(job.id.0)
            .execute(&mut *tx)
            .await?;

        delete_exception_on(&mut tx, exception.id).await?;
        audit::append_log_on(&mut tx, job.id, LogAction::Update, actor).await?;

        let recipients = group::members_excluding_roles_on(
            &mut *tx,
            exception.group_id,
            &[Role::Inspector],
            Some(actor),
        )
        .await?;
        let fan_out = notify::fan_out_on(
            &mut tx,
            Some(target.id),
            actor,
            &recipients,
            NotifyKind::Open,
            JobStatus::Open,
            "updated",
        )
        .await?;

        tx.commit().await?;

        metrics::exceptions_resolved().add(1, &[KeyValue::new("kind", "wrong_information")]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }
        self.job_view(job.id).await
    }

    /// Resolve a duplicate flag by keeping the flagged job: its owning
    /// group's assignment reopens as the active record. No field merge.
    pub async fn resolve_duplicate(&self, exception_id: ExceptionId, actor: UserId) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let exception = fetch_exception_on(&mut *tx, exception_id).await?;
        if exception.kind != ExceptionKind::Duplicate {
            return Err(Error::Conflict(
                "only duplicate records resolve through this path".into(),
            ));
        }
        let home = fetch_assignment_on(&mut *tx, exception.assignment_id).await?;
        let job = lock_job_on(&mut *tx, home.job_id).await?;

        let target = find_assignment_for_group_on(&mut *tx, job.id, exception.group_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "assignment for job {} in the returning group",
                    job.external_id
                ))
            })?;

        let now = chrono::Utc::now();
        if home.id != target.id {
            sqlx::query(
                "UPDATE assignments SET status = $1, is_active = FALSE, updated_by = $2, updated_at = $3
                 WHERE id = $4",
            )
            .bind(JobStatus::Open.as_str())
            .bind(actor.0)
            .bind(now)
            .bind(home.id.0)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = TRUE, updated_by = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(JobStatus::Open.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(target.id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE jobs SET status = $1, updated_by = $2, updated_at = $3 WHERE id = $4")
            .bind(JobStatus::Open.as_str())
            .bind(actor.0)
            .bind(now)
            .bind(job.id.0)
            .execute(&mut *tx)
            .await?;

        delete_exception_on(&mut tx, exception.id).await?;
        audit::append_log_on(&mut tx, job.id, LogAction::Update, actor).await?;

        tx.commit().await?;
        metrics::exceptions_resolved().add(1, &[KeyValue::new("kind", "duplicate")]);
        self.job_view(job.id).await
    }

    /// Confirm a duplicate: merge the duplicate's external id into the
    /// original's reference list, then hard-delete the duplicate's entire
    /// graph — bills, media, notes, notifications, exception records,
    /// assignments, and the job row.
    ///
    /// Destructive and irreversible. Callers must have extracted anything
    /// worth keeping from the duplicate before calling this.
    pub async fn confirm_duplicate(
        &self,
        original_assignment: AssignmentId,
        duplicate_assignment: AssignmentId,
        actor: UserId,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let original = fetch_assignment_on(&mut *tx, original_assignment).await?;
        let duplicate = fetch_assignment_on(&mut *tx, duplicate_assignment).await?;
        if original.job_id == duplicate.job_id {
            return Err(Error::Validation(
                "original and duplicate point at the same job".into(),
            ));
        }
        let original_job = lock_job_on(&mut *tx, original.job_id).await?;
        let duplicate_job = lock_job_on(&mut *tx, duplicate.job_id).await?;

        let appended = original_job.appended_duplicate_reference(&duplicate_job.external_id);
        sqlx::query(
            "UPDATE jobs SET duplicate_reference = $1, updated_by = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(&appended)
        .bind(actor.0)
        .bind(chrono::Utc::now())
        .bind(original_job.id.0)
        .execute(&mut *tx)
        .await?;

        delete_job_graph_on(&mut tx, duplicate_job.id).await?;
        audit::append_log_on(&mut tx, original_job.id, LogAction::Update, actor).await?;

        tx.commit().await?;
        metrics::exceptions_resolved().add(1, &[KeyValue::new("kind", "duplicate_confirmed")]);
        self.job_view(original_job.id).await
    }

    /// Get an exception record with its recipient set.
    pub async fn get_exception(&self, id: ExceptionId) -> Result<ExceptionRecord> {
        let mut conn = self.pool().acquire().await?;
        fetch_exception_on(&mut conn, id).await
    }

    /// Exception records the given user may resolve, newest first.
    pub async fn exceptions_for(&self, user: UserId) -> Result<Vec<ExceptionRecord>> {
        let rows: Vec<ExceptionRow> = sqlx::query_as(
            "SELECT e.id, e.assignment_id, e.duplicate_assignment_id, e.kind, e.comment,
                    e.group_id, e.created_by, e.created_at
             FROM exceptions e
             JOIN exception_recipients r ON r.exception_id = e.id
             WHERE r.user_id = $1 ORDER BY e.created_at DESC",
        )
        .bind(user.0)
        .fetch_all(self.pool())
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let recipients = fetch_recipients_on(self.pool(), ExceptionId(row.id)).await?;
            records.push(row.try_into_record(recipients)?);
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn insert_exception_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    assignment_id: AssignmentId,
    duplicate_assignment_id: Option<AssignmentId>,
    kind: ExceptionKind,
    comment: Option<&str>,
    group_id: GroupId,
    actor: UserId,
    recipients: &[UserId],
) -> Result<ExceptionId> {
    let id = ExceptionId::new();
    sqlx::query(
        "INSERT INTO exceptions (id, assignment_id, duplicate_assignment_id, kind, comment,
             group_id, created_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(id.0)
    .bind(assignment_id.0)
    .bind(duplicate_assignment_id.map(|a| a.0))
    .bind(kind.as_str())
    .bind(comment)
    .bind(group_id.0)
    .bind(actor.0)
    .bind(chrono::Utc::now())
    .execute(&mut **tx)
    .await?;

    for recipient in recipients {
        sqlx::query("INSERT INTO exception_recipients (exception_id, user_id) VALUES ($1, $2)")
            .bind(id.0)
            .bind(recipient.0)
            .execute(&mut **tx)
            .await?;
    }
    Ok(id)
}

async fn delete_exception_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: ExceptionId,
) -> Result<()> {
    sqlx::query("DELETE FROM exception_recipients WHERE exception_id = $1")
        .bind(id.0)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM exceptions WHERE id = $1")
        .bind(id.0)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn fetch_exception_on(conn: &mut sqlx::PgConnection, id: ExceptionId) -> Result<ExceptionRecord> {
    let row: Option<ExceptionRow> = sqlx::query_as(
        "SELECT id, assignment_id, duplicate_assignment_id, kind, comment, group_id, created_by,
                created_at
         FROM exceptions WHERE id = $1",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;
    let row = row.ok_or_else(|| Error::NotFound(format!("exception record {id}")))?;
    let recipients = fetch_recipients_on(&mut *conn, id).await?;
    row.try_into_record(recipients)
}

async fn fetch_recipients_on<'e, E>(conn: E, id: ExceptionId) -> Result<Vec<UserId>>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT user_id FROM exception_recipients WHERE exception_id = $1 ORDER BY user_id")
            .bind(id.0)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(|(u,)| UserId(u)).collect())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ExceptionRow {
    id: Uuid,
    assignment_id: Uuid,
    duplicate_assignment_id: Option<Uuid>,
    kind: String,
    comment: Option<String>,
    group_id: Uuid,
    created_by: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl ExceptionRow {
    fn try_into_record(self, recipients: Vec<UserId>) -> Result<ExceptionRecord> {
        Ok(ExceptionRecord {
            id: ExceptionId(self.id),
            assignment_id: AssignmentId(self.assignment_id),
            duplicate_assignment_id: self.duplicate_assignment_id.map(AssignmentId),
            kind: self.kind.parse()?,
            comment: self.comment,
            group_id: GroupId(self.group_id),
            created_by: self.created_by.map(UserId),
            created_at: self.created_at,
            recipients,
        })
    }
}
