//! Postgres-backed batch store implementation.
//!
//! Batches live in `batches`, templates in `templates`; every load joins the
//! two so a batch always arrives with its template and full payload.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | `PoolTimedOut`, `PoolClosed`, `Io`, `Tls`, `WorkerCrashed` | `Unavailable` | Connectivity; retry may succeed |
//! | Database (unique violation, `23505`) on insert | `AlreadyExists` | Duplicate batch id |
//! | Any other | `Storage` | Decode failures, constraint violations, bad queries |
//!
//! ## Atomicity
//!
//! `update` is a single `UPDATE … RETURNING` statement guarded by the allowed
//! predecessor statuses and the output-length rule, so output and status are
//! never committed separately. `delete` is a single `DELETE … RETURNING`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use docgen_core::{
    Batch, BatchId, BatchStatus, BatchUpdate, DomainError, NewBatch, PayloadItem, Template,
    TemplateType,
};

use super::{BatchStore, StoreError};

const SELECT_COLUMNS: &str = r#"
    b.id, b.payload, b.output, b.status, b.created_at, b.updated_at,
    t.id AS template_id, t.template_type, t.content
"#;

/// Embedded schema migrations for the batch store.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Postgres-backed batch store.
///
/// `Send + Sync`; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresBatchStore {
    pool: Arc<PgPool>,
}

impl PostgresBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(classify)?;
        migrator()
            .run(&pool)
            .await
            .map_err(|e| StoreError::Storage(format!("migration failed: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Distinguish "missing" from "rejected" after a guarded update matched no row.
    async fn explain_rejected_update(
        &self,
        id: &BatchId,
        update: &BatchUpdate,
    ) -> Result<StoreError, StoreError> {
        let row = sqlx::query(
            "SELECT status, jsonb_array_length(payload) AS payload_len FROM batches WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(classify)?;

        let Some(row) = row else {
            return Ok(StoreError::NotFound(id.clone()));
        };

        let status: String = row.try_get("status").map_err(classify)?;
        let status: BatchStatus = status
            .parse()
            .map_err(|e: DomainError| StoreError::Storage(e.to_string()))?;
        let payload_len: i32 = row.try_get("payload_len").map_err(classify)?;

        Ok(match update.validate_against(status, payload_len.max(0) as usize) {
            Err(e) => StoreError::Rejected(e),
            // Status moved between the guarded update and this read.
            Ok(()) => StoreError::Storage(format!("concurrent update of batch {id}")),
        })
    }
}

#[async_trait]
impl BatchStore for PostgresBatchStore {
    #[instrument(skip(self), fields(batch_id = %id), err)]
    async fn find_by_id(&self, id: &BatchId) -> Result<Batch, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM batches b JOIN templates t ON t.id = b.template_id WHERE b.id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => batch_from_row(&row),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    #[instrument(skip(self), err)]
    async fn find_all(&self) -> Result<Vec<Batch>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM batches b JOIN templates t ON t.id = b.template_id ORDER BY b.created_at, b.id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(classify)?;

        rows.iter().map(batch_from_row).collect()
    }

    #[instrument(skip(self, update), fields(batch_id = %id, status = ?update.status), err)]
    async fn update(&self, id: &BatchId, update: BatchUpdate) -> Result<Batch, StoreError> {
        let allowed: Vec<String> = match update.status {
            Some(next) => BatchStatus::allowed_predecessors(next)
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            None => [
                BatchStatus::Pending,
                BatchStatus::Processing,
                BatchStatus::Done,
                BatchStatus::Failed,
            ]
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        };

        let sql = format!(
            r#"
            WITH updated AS (
                UPDATE batches
                SET output = COALESCE($2, output),
                    status = COALESCE($3, status),
                    updated_at = now()
                WHERE id = $1
                  AND status = ANY($4)
                  AND (COALESCE($3, status) IS DISTINCT FROM 'done'
                       OR jsonb_array_length(COALESCE($2, output)) = jsonb_array_length(payload))
                RETURNING *
            )
            SELECT {SELECT_COLUMNS}
            FROM updated b JOIN templates t ON t.id = b.template_id
            "#
        );

        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(update.output.clone().map(Json))
            .bind(update.status.map(|s| s.as_str().to_string()))
            .bind(allowed)
            .fetch_optional(&*self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => batch_from_row(&row),
            None => Err(self.explain_rejected_update(id, &update).await?),
        }
    }

    #[instrument(skip(self), fields(batch_id = %id), err)]
    async fn delete(&self, id: &BatchId) -> Result<Batch, StoreError> {
        let sql = format!(
            r#"
            WITH deleted AS (DELETE FROM batches WHERE id = $1 RETURNING *)
            SELECT {SELECT_COLUMNS}
            FROM deleted b JOIN templates t ON t.id = b.template_id
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => batch_from_row(&row),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    #[instrument(skip(self, new), err)]
    async fn insert(&self, mut new: NewBatch) -> Result<Batch, StoreError> {
        let id = new.id.take().unwrap_or_default();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Templates are owned elsewhere; an existing template row is reused as-is.
        sqlx::query(
            r#"
            INSERT INTO templates (id, template_type, content)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(new.template.id.as_str())
        .bind(new.template.template_type.as_str())
        .bind(&new.template.content)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO batches (id, template_id, payload, output, status)
            VALUES ($1, $2, $3, '[]'::jsonb, $4)
            "#,
        )
        .bind(id.as_str())
        .bind(new.template.id.as_str())
        .bind(Json(&new.payload))
        .bind(BatchStatus::Pending.as_str())
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return Err(StoreError::AlreadyExists(id));
                }
            }
            return Err(classify(e));
        }

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM batches b JOIN templates t ON t.id = b.template_id WHERE b.id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;
        let batch = batch_from_row(&row)?;

        tx.commit().await.map_err(classify)?;
        Ok(batch)
    }
}

fn batch_from_row(row: &PgRow) -> Result<Batch, StoreError> {
    let id: String = row.try_get("id").map_err(classify)?;
    let Json(payload): Json<Vec<PayloadItem>> = row.try_get("payload").map_err(classify)?;
    let Json(output): Json<Vec<String>> = row.try_get("output").map_err(classify)?;
    let status: String = row.try_get("status").map_err(classify)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(classify)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(classify)?;
    let template_id: String = row.try_get("template_id").map_err(classify)?;
    let template_type: String = row.try_get("template_type").map_err(classify)?;
    let content: String = row.try_get("content").map_err(classify)?;

    let decode = |e: DomainError| StoreError::Storage(format!("corrupt batch row {id}: {e}"));
    let status: BatchStatus = status.parse().map_err(decode)?;
    let template_type: TemplateType = template_type.parse().map_err(decode)?;

    Ok(Batch {
        id: BatchId::from(id.clone()),
        template: Template::new(template_id, template_type, content),
        payload,
        output,
        status,
        created_at,
        updated_at,
    })
}

fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
        other => StoreError::Storage(other.to_string()),
    }
}
