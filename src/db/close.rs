//! Close and partial-close, including the close-time billing upsert.

use crate::db::job::{apply_job_edit_on, fetch_assignment_on, fetch_home_on, lock_job_on};
use crate::db::{audit, group, notify};
use crate::error::{Error, Result};
use crate::model::billing::{BillLine, CloseJobBill};
use crate::model::job::{JobEdit, JobStatus, JobView, LogAction};
use crate::model::notify::NotifyKind;
use crate::model::{AssignmentId, BillId, GroupId, Role, UserId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

/// Everything a close or partial-close carries besides the assignment:
/// job field edits, billing lines, close-time notes and media references,
/// the further-billing flag, and an optional home-group reassignment.
#[derive(Debug, Clone, Default)]
pub struct CloseRequest {
    pub edit: JobEdit,
    pub bills: Vec<BillLine>,
    pub notes: Vec<String>,
    pub images: Vec<String>,
    pub attachments: Vec<String>,
    pub further_billing: bool,
    pub home_reassign: Option<GroupId>,
    /// True when this is a metadata re-submission rather than a genuine
    /// close; suppresses the close notification.
    pub metadata_update: bool,
}

impl super::Db {
    /// Close a job.
    ///
    /// Every non-home assignment drops to Close/inactive; the home
    /// assignment closes but stays active as the authoritative record.
    /// `closed_at` is set only on the first genuine close — reclosing
    /// never moves it, and logs an Update instead of a second Close.
    pub async fn close(
        &self,
        assignment_id: AssignmentId,
        actor: UserId,
        req: CloseRequest,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let assignment = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let job = lock_job_on(&mut *tx, assignment.job_id).await?;
        let already_closed = job.status == JobStatus::Close;

        attach_close_artifacts_on(&mut tx, &job, &req, actor).await?;
        upsert_bill_lines_on(&mut tx, assignment.id, &req.bills, actor).await?;
        apply_job_edit_on(&mut tx, &job, &req.edit, actor).await?;

        if let Some(target) = req.home_reassign {
            super::routing::reassign_home_on(&mut tx, job.id, target, actor).await?;
        }
        let home = fetch_home_on(&mut *tx, job.id).await?;

        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = FALSE, updated_by = $2, updated_at = $3
             WHERE job_id = $4 AND NOT is_home_group",
        )
        .bind(JobStatus::Close.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = TRUE, further_billing = $2,
                 updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Close.as_str())
        .bind(req.further_billing)
        .bind(actor.0)
        .bind(now)
        .bind(home.id.0)
        .execute(&mut *tx)
        .await?;

        // closed_at is write-once; COALESCE keeps the first close's stamp.
        sqlx::query(
            "UPDATE jobs SET status = $1, further_billing = $2, closed_by = $3,
                 closed_at = COALESCE(closed_at, $4), updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Close.as_str())
        .bind(req.further_billing)
        .bind(actor.0)
        .bind(now)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?;

        let action = if already_closed { LogAction::Update } else { LogAction::Close };
        audit::append_log_on(&mut tx, job.id, action, actor).await?;

        let fan_out = if req.metadata_update {
            None
        } else {
            let recipients = group::members_excluding_roles_on(
                &mut *tx,
                home.group_id,
                &[Role::GroupManager],
                Some(actor),
            )
            .await?;
            notify::fan_out_on(
                &mut tx,
                Some(home.id),
                actor,
                &recipients,
                NotifyKind::Close,
                JobStatus::Close,
                "closed",
            )
            .await?
        };

        tx.commit().await?;

        metrics::job_transitions().add(1, &[KeyValue::new("operation", "close")]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }
        self.job_view(job.id).await
    }

    /// Partially close a single assignment.
    ///
    /// Deliberately asymmetric with [`Db::close`]: only the acted-on
    /// assignment transitions, siblings and the home assignment's active
    /// flag are untouched, `closed_at` stays unset, and no notification
    /// goes out.
    pub async fn partial_close(
        &self,
        assignment_id: AssignmentId,
        actor: UserId,
        req: CloseRequest,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let assignment = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let job = lock_job_on(&mut *tx, assignment.job_id).await?;

        attach_close_artifacts_on(&mut tx, &job, &req, actor).await?;
        upsert_bill_lines_on(&mut tx, assignment.id, &req.bills, actor).await?;
        apply_job_edit_on(&mut tx, &job, &req.edit, actor).await?;

        if let Some(target) = req.home_reassign {
            super::routing::reassign_home_on(&mut tx, job.id, target, actor).await?;
        }

        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE assignments SET status = $1, further_billing = $2, updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Partial.as_str())
        .bind(req.further_billing)
        .bind(actor.0)
        .bind(now)
        .bind(assignment.id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE jobs SET status = $1, further_billing = $2, closed_by = $3,
                 updated_by = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Partial.as_str())
        .bind(req.further_billing)
        .bind(actor.0)
        .bind(now)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?;

        audit::append_log_on(&mut tx, job.id, LogAction::Partial, actor).await?;

        tx.commit().await?;
        metrics::job_transitions().add(1, &[KeyValue::new("operation", "partial_close")]);
        self.job_view(job.id).await
    }

    /// Billing lines attached to any assignment of a job.
    pub async fn bills_for_job(&self, job_id: crate::model::JobId) -> Result<Vec<CloseJobBill>> {
        let rows: Vec<BillRow> = sqlx::query_as(
            "SELECT id, assignment_id, name, bill_kind, count_unit, jumping_ratio, measurement,
                    image, is_close_time_created, created_by, updated_by, created_at, updated_at
             FROM close_job_bills
             WHERE assignment_id IN (SELECT id FROM assignments WHERE job_id = $1)
             ORDER BY created_at",
        )
        .bind(job_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(BillRow::try_into_bill).collect()
    }
}

// ---------------------------------------------------------------------------
// Billing upsert
// ---------------------------------------------------------------------------

/// How each submitted line lands on the table.
#[derive(Debug, Default, PartialEq)]
struct BillBuckets {
    /// Zero measurement with an id: the existing row is removed.
    delete: Vec<BillId>,
    /// Non-zero measurement with an id: only the measurement changes.
    update: Vec<(BillId, f64)>,
    /// Non-zero measurement without an id: a fresh row.
    ///
    /// Keyed by the externally supplied id, not by content — resubmitting
    /// the same logical line without an id inserts a second row.
    insert: Vec<usize>,
}

fn partition_bill_lines(lines: &[BillLine]) -> BillBuckets {
    let mut buckets = BillBuckets::default();
    for (index, line) in lines.iter().enumerate() {
        match (line.bill_id, line.measurement == 0.0) {
            (Some(id), true) => buckets.delete.push(id),
            (Some(id), false) => buckets.update.push((id, line.measurement)),
            (None, false) => buckets.insert.push(index),
            // zero measurement without an id: nothing to do
            (None, true) => {}
        }
    }
    buckets
}

async fn upsert_bill_lines_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    assignment_id: AssignmentId,
    lines: &[BillLine],
    actor: UserId,
) -> Result<()> {
    let buckets = partition_bill_lines(lines);
    let now = chrono::Utc::now();

    for id in &buckets.delete {
        sqlx::query("DELETE FROM close_job_bills WHERE id = $1")
            .bind(id.0)
            .execute(&mut **tx)
            .await?;
    }
    for (id, measurement) in &buckets.update {
        let rows = sqlx::query(
            "UPDATE close_job_bills SET measurement = $1, updated_by = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(measurement)
        .bind(actor.0)
        .bind(now)
        .bind(id.0)
        .execute(&mut **tx)
        .await?
        .rows_affected();
        if rows == 0 {
            return Err(Error::NotFound(format!("billing line {id}")));
        }
    }
    for &index in &buckets.insert {
        let line = &lines[index];
        sqlx::query(
            "INSERT INTO close_job_bills (id, assignment_id, name, bill_kind, count_unit,
                 jumping_ratio, measurement, image, is_close_time_created, created_by, updated_by,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $9, $10, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(assignment_id.0)
        .bind(line.name.trim())
        .bind(line.kind.as_str())
        .bind(line.count_unit.as_str())
        .bind(line.jumping_ratio)
        .bind(line.measurement)
        .bind(line.image.as_deref())
        .bind(actor.0)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Insert close-time notes and media references against the job.
async fn attach_close_artifacts_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job: &crate::model::job::Job,
    req: &CloseRequest,
    actor: UserId,
) -> Result<()> {
    let now = chrono::Utc::now();
    for note in &req.notes {
        sqlx::query(
            "INSERT INTO job_notes (id, job_id, note, created_by, updated_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4, $5, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(job.id.0)
        .bind(note)
        .bind(actor.0)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    for path in &req.images {
        sqlx::query(
            "INSERT INTO job_images (id, job_id, path, close_job_image, created_by, created_at)
             VALUES ($1, $2, $3, TRUE, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(job.id.0)
        .bind(path)
        .bind(actor.0)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    for path in &req.attachments {
        sqlx::query(
            "INSERT INTO job_attachments (id, job_id, path, close_job_attachment, created_by, created_at)
             VALUES ($1, $2, $3, TRUE, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(job.id.0)
        .bind(path)
        .bind(actor.0)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct BillRow {
    id: Uuid,
    assignment_id: Uuid,
    name: String,
    bill_kind: String,
    count_unit: String,
    jumping_ratio: Option<f64>,
    measurement: f64,
    image: Option<String>,
    is_close_time_created: bool,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl BillRow {
    fn try_into_bill(self) -> Result<CloseJobBill> {
        Ok(CloseJobBill {
            id: BillId(self.id),
            assignment_id: AssignmentId(self.assignment_id),
            name: self.name,
            kind: self.bill_kind.parse()?,
            count_unit: self.count_unit.parse()?,
            jumping_ratio: self.jumping_ratio,
            measurement: self.measurement,
            image: self.image,
            is_close_time_created: self.is_close_time_created,
            created_by: self.created_by.map(UserId),
            updated_by: self.updated_by.map(UserId),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::billing::{BillKind, CountUnit};

    fn line(bill_id: Option<BillId>, measurement: f64) -> BillLine {
        BillLine {
            bill_id,
            name: "Paint".into(),
            kind: BillKind::Material,
            count_unit: CountUnit::Units,
            jumping_ratio: None,
            measurement,
            image: None,
        }
    }

    #[test]
    fn zero_measurement_with_id_deletes() {
        let id = BillId::new();
        let buckets = partition_bill_lines(&[line(Some(id), 0.0)]);
        assert_eq!(buckets.delete, vec![id]);
        assert!(buckets.update.is_empty());
        assert!(buckets.insert.is_empty());
    }

    #[test]
    fn id_carrying_lines_update_measurement_only() {
        let id = BillId::new();
        let buckets = partition_bill_lines(&[line(Some(id), 4.5)]);
        assert_eq!(buckets.update, vec![(id, 4.5)]);
    }

    #[test]
    fn lines_without_ids_insert_even_when_identical() {
        // Resubmitting the same logical line without an id is two inserts,
        // not a dedup. The upsert is keyed by the supplied id alone.
        let buckets = partition_bill_lines(&[line(None, 2.0), line(None, 2.0)]);
        assert_eq!(buckets.insert.len(), 2);
    }

    #[test]
    fn zero_measurement_without_id_is_dropped() {
        let buckets = partition_bill_lines(&[line(None, 0.0)]);
        assert_eq!(buckets, BillBuckets::default());
    }
}
