use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use approvy_core::{
    ApprovalRequest, ApprovalResponse, ApprovalStatus, Decision, RequestId, RequestRecord,
    ResponseId, ResponseOutcome,
};

use super::{RepositoryError, RequestStore};
use crate::DbPool;

pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(|e| {
        RepositoryError::Decode(format!("column `{column}` holds invalid timestamp `{raw}`: {e}"))
    })
}

fn row_to_request(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let requester: String = decode(row.try_get("requester"))?;
    let approver: String = decode(row.try_get("approver"))?;
    let message: String = decode(row.try_get("message"))?;
    let status: String = decode(row.try_get("status"))?;
    let created_at: String = decode(row.try_get("created_at"))?;
    let expires_at: String = decode(row.try_get("expires_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    Ok(ApprovalRequest {
        id: RequestId(id),
        requester,
        approver,
        message,
        status: status
            .parse::<ApprovalStatus>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        created_at: parse_timestamp("created_at", &created_at)?,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_response(row: &SqliteRow) -> Result<ApprovalResponse, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let request_id: String = decode(row.try_get("request_id"))?;
    let approved: bool = decode(row.try_get("approved"))?;
    let created_at: String = decode(row.try_get("created_at"))?;

    Ok(ApprovalResponse {
        id: ResponseId(id),
        request_id: RequestId(request_id),
        decision: Decision::from_approved(approved),
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

async fn load_record(
    conn: &mut SqliteConnection,
    id: &RequestId,
) -> Result<Option<RequestRecord>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, requester, approver, message, status, created_at, expires_at, updated_at
         FROM approval_request WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let request = row_to_request(&row)?;

    let rows = sqlx::query(
        "SELECT id, request_id, approved, created_at
         FROM approval_response WHERE request_id = ? ORDER BY rowid ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;
    let responses = rows.iter().map(row_to_response).collect::<Result<Vec<_>, _>>()?;

    Ok(Some(RequestRecord { request, responses }))
}

#[async_trait::async_trait]
impl RequestStore for SqlRequestStore {
    async fn create_request(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_request
                (id, requester, approver, message, status, created_at, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.requester)
        .bind(&request.approver)
        .bind(&request.message)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.expires_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_request(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, RepositoryError> {
        // One read transaction so the request and its responses come from the same snapshot.
        let mut tx = self.pool.begin().await?;
        let record = load_record(&mut tx, id).await?;
        tx.commit().await?;
        Ok(record.map(|record| record.observed_at(now)))
    }

    async fn record_response(
        &self,
        id: &RequestId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Option<ResponseOutcome>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Write before reading so this transaction owns SQLite's writer lock
        // for the whole read-append-recompute sequence.
        let touched = sqlx::query("UPDATE approval_request SET updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let Some(mut record) = load_record(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let outcome = record.record(decision, now);

        sqlx::query(
            "INSERT INTO approval_response (id, request_id, approved, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&outcome.response.id.0)
        .bind(&outcome.response.request_id.0)
        .bind(outcome.response.decision.is_approve())
        .bind(outcome.response.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if outcome.transitioned() {
            let updated = sqlx::query(
                "UPDATE approval_request SET status = ?, updated_at = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(outcome.status.as_str())
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .bind(outcome.previous_status.as_str())
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepositoryError::Conflict(format!(
                    "approval request `{id}` left `{}` concurrently",
                    outcome.previous_status
                )));
            }
        }

        tx.commit().await?;
        debug!(
            event_name = "db.approval_response.recorded",
            request_id = %id,
            previous_status = %outcome.previous_status,
            status = %outcome.status,
            "approval response stored"
        );

        Ok(Some(outcome))
    }
}
