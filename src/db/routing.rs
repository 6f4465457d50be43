//! Assignment lifecycle: transfers between groups and home reassignment.

use crate::db::job::{
    fetch_assignment_on, find_assignment_for_group_on, fetch_home_on, lock_job_on,
};
use crate::db::{audit, group, notify};
use crate::error::Result;
use crate::model::job::{JobStatus, JobView, LogAction};
use crate::model::notify::NotifyKind;
use crate::model::{AssignmentId, GroupId, JobId, Role, UserId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

impl super::Db {
    /// Move a job's active routing to another group.
    ///
    /// If the job was already assigned to the target group at some point,
    /// that row is reactivated instead of inserting a duplicate: every
    /// assignment drops to Transfer/inactive in bulk, then the target
    /// flips back to Open/active. Otherwise the current assignment is
    /// deactivated and a fresh row is inserted for the target group.
    /// Either way exactly one assignment is active afterwards.
    ///
    /// `override_status` replaces both the job status (instead of
    /// Transfer) and the new assignment's status (instead of Open) on the
    /// fresh-row path.
    pub async fn transfer(
        &self,
        assignment_id: AssignmentId,
        target_group: GroupId,
        actor: UserId,
        override_status: Option<JobStatus>,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let assignment = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let job = lock_job_on(&mut *tx, assignment.job_id).await?;
        group::fetch_live_group(&mut *tx, target_group).await?;

        let target_assignment_id =
            transfer_on(&mut tx, job.id, &assignment, target_group, actor, override_status).await?;
        audit::append_log_on(&mut tx, job.id, LogAction::Transfer, actor).await?;

        let recipients = group::members_with_roles_on(
            &mut *tx,
            target_group,
            &[Role::GroupManager, Role::Admin],
            Some(actor),
        )
        .await?;
        let job_status = crate::db::job::fetch_job_on(&mut *tx, job.id).await?.status;
        let fan_out = notify::fan_out_on(
            &mut tx,
            Some(target_assignment_id),
            actor,
            &recipients,
            NotifyKind::Transfer,
            job_status,
            "transferred",
        )
        .await?;

        tx.commit().await?;

        metrics::job_transitions().add(1, &[KeyValue::new("operation", "transfer")]);
        if let Some(fan_out) = fan_out {
            self.push().deliver(fan_out);
        }
        self.job_view(job.id).await
    }

    /// Transfer several jobs to the same group in one transaction.
    /// Applies the same reuse-or-insert logic per job, with one audit row
    /// each. Bulk moves do not fan out notifications.
    pub async fn transfer_many(
        &self,
        assignment_ids: &[AssignmentId],
        target_group: GroupId,
        actor: UserId,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        group::fetch_live_group(&mut *tx, target_group).await?;

        for &assignment_id in assignment_ids {
            let assignment = fetch_assignment_on(&mut *tx, assignment_id).await?;
            let job = lock_job_on(&mut *tx, assignment.job_id).await?;
            transfer_on(&mut tx, job.id, &assignment, target_group, actor, None).await?;
            audit::append_log_on(&mut tx, job.id, LogAction::Transfer, actor).await?;
        }

        tx.commit().await?;
        metrics::job_transitions().add(
            assignment_ids.len() as u64,
            &[KeyValue::new("operation", "transfer")],
        );
        Ok(())
    }

    /// Change which assignment is the home assignment for a job.
    pub async fn reassign_home_group(
        &self,
        assignment_id: AssignmentId,
        target_group: GroupId,
        actor: UserId,
    ) -> Result<JobView> {
        let mut tx = self.pool().begin().await?;
        let assignment = fetch_assignment_on(&mut *tx, assignment_id).await?;
        let job = lock_job_on(&mut *tx, assignment.job_id).await?;

        reassign_home_on(&mut tx, job.id, target_group, actor).await?;
        audit::append_log_on(&mut tx, job.id, LogAction::Update, actor).await?;

        tx.commit().await?;
        self.job_view(job.id).await
    }
}

/// Apply one transfer inside the caller's transaction. Returns the id of
/// the assignment that ends up active in the target group.
async fn transfer_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: JobId,
    current: &crate::model::job::Assignment,
    target_group: GroupId,
    actor: UserId,
    override_status: Option<JobStatus>,
) -> Result<AssignmentId> {
    let now = chrono::Utc::now();

    if let Some(existing) = find_assignment_for_group_on(&mut **tx, job_id, target_group).await? {
        // Reactivation: the job has been in this group before. No new row.
        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = FALSE, updated_by = $2, updated_at = $3
             WHERE job_id = $4",
        )
        .bind(JobStatus::Transfer.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(job_id.0)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE assignments SET status = $1, is_active = TRUE, updated_by = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(JobStatus::Open.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(existing.id.0)
        .execute(&mut **tx)
        .await?;

        return Ok(existing.id);
    }

    let job_status = override_status.unwrap_or(JobStatus::Transfer);
    let new_status = override_status.unwrap_or(JobStatus::Open);

    sqlx::query(
        "UPDATE assignments SET status = $1, is_active = FALSE, updated_by = $2, updated_at = $3
         WHERE id = $4",
    )
    .bind(JobStatus::Transfer.as_str())
    .bind(actor.0)
    .bind(now)
    .bind(current.id.0)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE jobs SET status = $1, updated_by = $2, updated_at = $3 WHERE id = $4")
        .bind(job_status.as_str())
        .bind(actor.0)
        .bind(now)
        .bind(job_id.0)
        .execute(&mut **tx)
        .await?;

    let job = crate::db::job::fetch_job_on(&mut **tx, job_id).await?;
    let new_id = AssignmentId::new();
    sqlx::query(
        "INSERT INTO assignments (id, job_id, group_id, status, is_active, is_home_group,
             further_inspection, created_by, updated_by, created_at, updated_at)
         VALUES ($1, $2, $3, $4, TRUE, FALSE, $5, $6, $6, $7, $7)",
    )
    .bind(new_id.0)
    .bind(job_id.0)
    .bind(target_group.0)
    .bind(new_status.as_str())
    .bind(job.further_inspection)
    .bind(actor.0)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(new_id)
}

/// Re-point the home flag inside the caller's transaction.
///
/// When the named group already has an assignment for the job the flags
/// flip (old home loses it, named group gains it) without moving rows.
/// Otherwise the home row itself moves to the named group.
pub(crate) async fn reassign_home_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: JobId,
    target_group: GroupId,
    actor: UserId,
) -> Result<()> {
    let home = fetch_home_on(&mut **tx, job_id).await?;
    if home.group_id == target_group {
        return Ok(());
    }
    group::fetch_live_group(&mut **tx, target_group).await?;

    let now = chrono::Utc::now();
    if let Some(existing) = find_assignment_for_group_on(&mut **tx, job_id, target_group).await? {
        sqlx::query(
            "UPDATE assignments SET is_home_group = FALSE, updated_by = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(actor.0)
        .bind(now)
        .bind(home.id.0)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "UPDATE assignments SET is_home_group = TRUE, updated_by = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(actor.0)
        .bind(now)
        .bind(existing.id.0)
        .execute(&mut **tx)
        .await?;
    } else {
        sqlx::query(
            "UPDATE assignments SET group_id = $1, updated_by = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(target_group.0)
        .bind(actor.0)
        .bind(now)
        .bind(home.id.0)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
