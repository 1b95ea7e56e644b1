use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{
    Membership, Role, Tenant, TenantId, User, UserId, Workflow, WorkflowId, WorkflowStatus,
};

const WORKFLOW_COLUMNS: &str = "id, tenant_id, title, status, created_at, updated_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user: User,
    pub password_hash: String,
}

/// Result of the combined tenant + owner membership insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantProvisioning {
    Created(Tenant),
    /// Another caller already holds a membership for this user; nothing was
    /// written.
    AlreadyProvisioned,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every pooled connection to an in-memory url opens its own database.
        let max_connections = if is_in_memory(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns `None` when the email is already registered.
    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<Option<User>> {
        let user_id = UserId::generate();
        let row = sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(email) DO NOTHING
             RETURNING id",
        )
        .bind(user_id.to_string())
        .bind(email)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert user")?;

        Ok(row.map(|_| User {
            id: user_id,
            email: email.to_string(),
        }))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query("SELECT id, email, password_hash FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up user by email")?;

        row.map(|r| -> Result<StoredUser> {
            Ok(StoredUser {
                user: User {
                    id: parse_id(&r, "id")?,
                    email: r.try_get("email")?,
                },
                password_hash: r.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    pub async fn membership_for_user(&self, user_id: UserId) -> Result<Option<Membership>> {
        let row = sqlx::query(
            "SELECT user_id, tenant_id, role FROM memberships WHERE user_id = ? LIMIT 1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up membership")?;

        row.map(|r| -> Result<Membership> {
            let role: String = r.try_get("role")?;
            Ok(Membership {
                user_id: parse_id(&r, "user_id")?,
                tenant_id: parse_id(&r, "tenant_id")?,
                role: Role::parse(&role)
                    .with_context(|| format!("membership holds unknown role '{role}'"))?,
            })
        })
        .transpose()
    }

    /// Inserts a tenant and its owner membership in one transaction. A
    /// membership that already exists for `owner` rolls the tenant back.
    pub async fn create_tenant_with_owner(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<TenantProvisioning> {
        let tenant = Tenant {
            id: TenantId::generate(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?)")
            .bind(tenant.id.to_string())
            .bind(&tenant.name)
            .bind(tenant.created_at)
            .execute(&mut *tx)
            .await
            .context("failed to insert tenant")?;

        let inserted = sqlx::query(
            "INSERT INTO memberships (user_id, tenant_id, role, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(owner.to_string())
        .bind(tenant.id.to_string())
        .bind(Role::Owner.as_str())
        .bind(tenant.created_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert membership")?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.context("failed to roll back tenant")?;
            debug!(%owner, "membership already present, tenant insert rolled back");
            return Ok(TenantProvisioning::AlreadyProvisioned);
        }

        tx.commit().await.context("failed to commit tenant")?;
        Ok(TenantProvisioning::Created(tenant))
    }

    pub async fn tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT id, name, created_at FROM tenants WHERE id = ?")
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to load tenant")?;

        row.map(|r| -> Result<Tenant> {
            Ok(Tenant {
                id: parse_id(&r, "id")?,
                name: r.try_get("name")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    /// Newest first; rows created within the same instant keep insertion order
    /// reversed.
    pub async fn list_workflows_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<Workflow>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows
             WHERE tenant_id = ?
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to list workflows")?;

        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn insert_workflow(
        &self,
        tenant_id: TenantId,
        title: &str,
        status: WorkflowStatus,
    ) -> Result<Workflow> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO workflows ({WORKFLOW_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {WORKFLOW_COLUMNS}"
        ))
        .bind(WorkflowId::generate().to_string())
        .bind(tenant_id.to_string())
        .bind(title)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert workflow")?;

        workflow_from_row(&row)
    }

    pub async fn workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"
        ))
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load workflow")?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    pub async fn update_workflow_status(
        &self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?
             RETURNING {WORKFLOW_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(updated_at)
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to update workflow status")?;

        row.as_ref().map(workflow_from_row).transpose()
    }
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    Ok(Workflow {
        id: parse_id(row, "id")?,
        tenant_id: parse_id(row, "tenant_id")?,
        title: row.try_get("title")?,
        status: WorkflowStatus::parse(&row.try_get::<String, _>("status")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_id<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr<Err = uuid::Error>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .with_context(|| format!("column '{column}' holds malformed id '{raw}'"))
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
