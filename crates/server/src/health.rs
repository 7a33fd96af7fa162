use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use approvy_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    notifications_enabled: bool,
    notification_channel: &'static str,
}

impl HealthState {
    pub fn new(db_pool: DbPool, notifications_enabled: bool, channel: &'static str) -> Self {
        Self { db_pool, notifications_enabled, notification_channel: channel }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub notifications: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Readiness: the database must answer. Notification state is informational
/// because delivery is best-effort.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let notifications = if state.notifications_enabled {
        HealthCheck {
            status: "enabled",
            detail: format!("approval prompts delivered via {}", state.notification_channel),
        }
    } else {
        HealthCheck {
            status: "disabled",
            detail: "approval prompts are not delivered".to_string(),
        }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        notifications,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
