//! Notification fan-out.
//!
//! A transition computes its recipient set (role-filtered group
//! membership minus the actor), persists one notification row per
//! recipient inside the owning transaction with the job-status snapshot,
//! and hands the set to the push client after commit. Push delivery is
//! best-effort and never fails the transition.

use crate::error::Result;
use crate::model::job::JobStatus;
use crate::model::notify::{Notification, NotifyKind, PushPayload};
use crate::model::{AssignmentId, UserId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

/// Recipients plus the payload to push after the transaction commits.
#[derive(Debug, Clone)]
pub struct FanOut {
    pub recipients: Vec<UserId>,
    pub payload: PushPayload,
}

impl super::Db {
    /// Notifications addressed to a user, newest first.
    pub async fn notifications_for(&self, user: UserId, limit: i64) -> Result<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            "SELECT id, assignment_id, sender_id, receiver_id, message, kind, job_status, created_at
             FROM notifications WHERE receiver_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user.0)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(NotificationRow::try_into_notification).collect()
    }
}

/// Fan out with the standard message form "Job <verb> by @<sender>".
pub(crate) async fn fan_out_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    assignment_id: Option<AssignmentId>,
    sender: UserId,
    recipients: &[UserId],
    kind: NotifyKind,
    job_status: JobStatus,
    verb: &str,
) -> Result<Option<FanOut>> {
    let name = sender_display_name_on(&mut **tx, sender).await?;
    let message = format!("Job {verb} by @{name}");
    fan_out_message_on(tx, assignment_id, sender, recipients, kind, job_status, message).await
}

/// Fan out a fully composed message. Returns `None` when there is no one
/// to notify.
pub(crate) async fn fan_out_message_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    assignment_id: Option<AssignmentId>,
    sender: UserId,
    recipients: &[UserId],
    kind: NotifyKind,
    job_status: JobStatus,
    message: String,
) -> Result<Option<FanOut>> {
    let recipients: Vec<UserId> = recipients.iter().copied().filter(|r| *r != sender).collect();
    if recipients.is_empty() {
        return Ok(None);
    }

    let now = chrono::Utc::now();
    for receiver in &recipients {
        sqlx::query(
            "INSERT INTO notifications (id, assignment_id, sender_id, receiver_id, message, kind,
                 job_status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(assignment_id.map(|a| a.0))
        .bind(sender.0)
        .bind(receiver.0)
        .bind(&message)
        .bind(kind.as_str())
        .bind(job_status.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    metrics::notifications_fanned_out().add(
        recipients.len() as u64,
        &[KeyValue::new("kind", kind.as_str())],
    );

    Ok(Some(FanOut {
        recipients,
        payload: PushPayload {
            title: kind.to_string(),
            body: message,
            kind,
            job_status,
            assignment_id,
        },
    }))
}

/// The name a sender shows up as in notifications: user_name, or the
/// local part of the email when the name is blank.
pub(crate) async fn sender_display_name_on<'e, E>(conn: E, sender: UserId) -> Result<String>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT user_name, email FROM users WHERE id = $1")
            .bind(sender.0)
            .fetch_optional(conn)
            .await?;
    let (user_name, email) = row.unwrap_or_default();
    if user_name.is_empty() {
        Ok(email.split('@').next().unwrap_or_default().to_string())
    } else {
        Ok(user_name)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    assignment_id: Option<Uuid>,
    sender_id: Uuid,
    receiver_id: Uuid,
    message: String,
    kind: String,
    job_status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl NotificationRow {
    fn try_into_notification(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id,
            assignment_id: self.assignment_id.map(AssignmentId),
            sender_id: UserId(self.sender_id),
            receiver_id: UserId(self.receiver_id),
            message: self.message,
            kind: self.kind.parse()?,
            job_status: self.job_status.parse()?,
            created_at: self.created_at,
        })
    }
}
