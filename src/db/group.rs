//! Groups, users, and role-filtered membership lookup.
//!
//! Membership queries are the collaborator surface the fan-out and
//! exception routing consume: who belongs to a group, filtered by role,
//! always minus the acting user.

use crate::error::{Error, Result};
use crate::model::{Group, GroupId, Role, User, UserId};
use uuid::Uuid;

impl super::Db {
    /// Create a group. Names are unique.
    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let id = GroupId::new();
        let now = chrono::Utc::now();
        sqlx::query("INSERT INTO groups (id, name, is_archive, created_at) VALUES ($1, $2, FALSE, $3)")
            .bind(id.0)
            .bind(name)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(|e| Error::from(e).integrity_on_unique("a group with this name already exists"))?;
        self.get_group(id).await
    }

    /// Archive a group. Archived groups no longer accept transfers.
    pub async fn archive_group(&self, id: GroupId) -> Result<()> {
        let rows = sqlx::query("UPDATE groups SET is_archive = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(Error::NotFound(format!("group {id}")));
        }
        Ok(())
    }

    /// Get a group by id, archived or not.
    pub async fn get_group(&self, id: GroupId) -> Result<Group> {
        let row: Option<GroupRow> =
            sqlx::query_as("SELECT id, name, is_archive, created_at FROM groups WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(GroupRow::into_group)
            .ok_or_else(|| Error::NotFound(format!("group {id}")))
    }

    /// Create a user.
    pub async fn create_user(&self, user_name: &str, email: &str, role: Role) -> Result<User> {
        let id = UserId::new();
        sqlx::query("INSERT INTO users (id, user_name, email, role, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(id.0)
            .bind(user_name)
            .bind(email)
            .bind(role.as_str())
            .bind(chrono::Utc::now())
            .execute(self.pool())
            .await
            .map_err(|e| Error::from(e).integrity_on_unique("a user with this email already exists"))?;
        Ok(User {
            id,
            user_name: user_name.to_string(),
            email: email.to_string(),
            role,
        })
    }

    /// Add a user to a group. Idempotent.
    pub async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(group_id.0)
        .bind(user_id.0)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Members of a group holding one of the given roles.
    pub async fn members_by_role(&self, group_id: GroupId, roles: &[Role]) -> Result<Vec<UserId>> {
        members_with_roles_on(self.pool(), group_id, roles, None).await
    }
}

/// Fetch a group, failing with `NotFound` when missing or archived.
/// Transfer targets and create targets must pass this gate.
pub(crate) async fn fetch_live_group<'e, E>(conn: E, id: GroupId) -> Result<Group>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let row: Option<GroupRow> = sqlx::query_as(
        "SELECT id, name, is_archive, created_at FROM groups WHERE id = $1 AND NOT is_archive",
    )
    .bind(id.0)
    .fetch_optional(conn)
    .await?;
    row.map(GroupRow::into_group)
        .ok_or_else(|| Error::NotFound(format!("group {id} is missing or archived")))
}

/// Group members holding one of `roles`, minus `exclude` when given.
pub(crate) async fn members_with_roles_on<'e, E>(
    conn: E,
    group_id: GroupId,
    roles: &[Role],
    exclude: Option<UserId>,
) -> Result<Vec<UserId>>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let role_names: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT u.id FROM users u
         JOIN group_members gm ON gm.user_id = u.id
         WHERE gm.group_id = $1 AND u.role = ANY($2) AND u.id IS DISTINCT FROM $3
         ORDER BY u.id",
    )
    .bind(group_id.0)
    .bind(&role_names)
    .bind(exclude.map(|u| u.0))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
}

/// Group members NOT holding any of `roles`, minus `exclude` when given.
pub(crate) async fn members_excluding_roles_on<'e, E>(
    conn: E,
    group_id: GroupId,
    roles: &[Role],
    exclude: Option<UserId>,
) -> Result<Vec<UserId>>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let role_names: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT u.id FROM users u
         JOIN group_members gm ON gm.user_id = u.id
         WHERE gm.group_id = $1 AND NOT (u.role = ANY($2)) AND u.id IS DISTINCT FROM $3
         ORDER BY u.id",
    )
    .bind(group_id.0)
    .bind(&role_names)
    .bind(exclude.map(|u| u.0))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    is_archive: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl GroupRow {
    fn into_group(self) -> Group {
        Group {
            id: GroupId(self.id),
            name: self.name,
            is_archive: self.is_archive,
            created_at: self.created_at,
        }
    }
}
