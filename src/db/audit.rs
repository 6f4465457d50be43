//! Append-only audit trail. One row per transition, tagging the actor
//! under the column matching the operation.

use crate::error::Result;
use crate::model::job::{JobLogEntry, LogAction};
use crate::model::{JobId, UserId};
use uuid::Uuid;

impl super::Db {
    /// Full audit trail for a job, oldest first.
    pub async fn job_history(&self, job_id: JobId) -> Result<Vec<JobLogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT job_id, action, created_by, updated_by, transferred_by, returned_by,
                    closed_by, partially_closed_by, created_at
             FROM job_logs WHERE job_id = $1 ORDER BY created_at, id",
        )
        .bind(job_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(LogRow::try_into_entry).collect()
    }
}

/// Append one audit row inside the caller's transaction. The actor lands
/// in the column named by the action; the other actor columns stay null.
pub(crate) async fn append_log_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: JobId,
    action: LogAction,
    actor: UserId,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO job_logs (job_id, action, {}, created_at) VALUES ($1, $2, $3, $4)",
        action.actor_column()
    );
    sqlx::query(&sql)
        .bind(job_id.0)
        .bind(action.as_str())
        .bind(actor.0)
        .bind(chrono::Utc::now())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct LogRow {
    job_id: Uuid,
    action: String,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
    transferred_by: Option<Uuid>,
    returned_by: Option<Uuid>,
    closed_by: Option<Uuid>,
    partially_closed_by: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl LogRow {
    fn try_into_entry(self) -> Result<JobLogEntry> {
        let action: LogAction = self.action.parse()?;
        let actor = match action {
            LogAction::Create => self.created_by,
            LogAction::Update => self.updated_by,
            LogAction::Transfer => self.transferred_by,
            LogAction::Return => self.returned_by,
            LogAction::Close => self.closed_by,
            LogAction::Partial => self.partially_closed_by,
        };
        Ok(JobLogEntry {
            job_id: JobId(self.job_id),
            action,
            actor: actor.map(UserId),
            created_at: self.created_at,
        })
    }
}
