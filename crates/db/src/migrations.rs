use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Number of schema versions shipped with this build.
pub fn known_versions() -> usize {
    MIGRATOR.iter().filter(|migration| !migration.migration_type.is_down_migration()).count()
}

/// Number of schema versions recorded as applied. Errors when the database was never migrated.
pub async fn applied_versions(pool: &DbPool) -> Result<usize, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    Ok(usize::try_from(count).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, known_versions, run_pending};
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "approval_request",
        "approval_response",
        "idx_approval_request_status",
        "idx_approval_response_request_id",
    ];

    #[tokio::test]
    async fn migrations_create_request_and_response_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?")
                .bind(object)
                .fetch_one(&pool)
                .await
                .expect("check schema object")
                .get::<i64, _>("count");
            assert_eq!(count, 1, "expected schema object `{object}` to exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(applied_versions(&pool).await.is_err(), "fresh database has no history");

        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run should be a no-op");

        assert_eq!(known_versions(), 1);
        assert_eq!(applied_versions(&pool).await.expect("history"), known_versions());
    }

    #[tokio::test]
    async fn deleting_a_request_cascades_to_its_responses() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let now = "2026-01-01T00:00:00+00:00";
        sqlx::query(
            "INSERT INTO approval_request
                (id, requester, approver, message, status, created_at, expires_at, updated_at)
             VALUES ('REQ-1', 'alice', 'bob', 'deploy v2', 'pending', ?, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .expect("insert request");
        sqlx::query(
            "INSERT INTO approval_response (id, request_id, approved, created_at)
             VALUES ('RSP-1', 'REQ-1', 1, ?)",
        )
        .bind(now)
        .execute(&pool)
        .await
        .expect("insert response");

        sqlx::query("DELETE FROM approval_request WHERE id = 'REQ-1'")
            .execute(&pool)
            .await
            .expect("delete request");

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approval_response")
            .fetch_one(&pool)
            .await
            .expect("count responses");
        assert_eq!(remaining, 0);
    }
}
