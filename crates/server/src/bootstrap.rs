use std::sync::Arc;

use axum::Router;
use chrono::Duration;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use approvy_core::config::{AppConfig, ConfigError, LoadOptions};
use approvy_core::{LogNotifier, NotificationDispatcher, Notifier};
use approvy_db::{connect_with_settings, migrations, DbPool, SqlRequestStore};
use approvy_sms::{TwilioSetupError, TwilioSmsNotifier};

use crate::approvals::ApprovalService;
use crate::{api, health};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ApprovalService>,
}

impl Application {
    /// Full HTTP surface: approval routes, health, and request tracing.
    pub fn router(&self) -> Router {
        let dispatcher = self.service.dispatcher();
        let health_state = health::HealthState::new(
            self.db_pool.clone(),
            dispatcher.is_enabled(),
            dispatcher.channel(),
        );

        api::router(Arc::clone(&self.service))
            .merge(health::router(health_state))
            .layer(TraceLayer::new_for_http())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("sms notifier setup failed: {0}")]
    Notifier(#[from] TwilioSetupError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let default_ttl = Duration::try_seconds(config.approvals.default_ttl_secs).ok_or_else(|| {
        ConfigError::Validation("approvals.default_ttl_secs is out of range".to_string())
    })?;
    let dispatcher = notification_dispatcher(&config)?;
    let service = ApprovalService::new(
        Arc::new(SqlRequestStore::new(db_pool.clone())),
        Arc::new(dispatcher),
        default_ttl,
    );

    Ok(Application { config, db_pool, service: Arc::new(service) })
}

fn notification_dispatcher(config: &AppConfig) -> Result<NotificationDispatcher, BootstrapError> {
    let directory = config.contact_directory();
    // Without Twilio, prompts go to the log channel.
    let notifier: Arc<dyn Notifier> = if config.twilio.enabled {
        Arc::new(TwilioSmsNotifier::from_config(&config.twilio)?)
    } else {
        Arc::new(LogNotifier)
    };

    if directory.is_empty() {
        warn!(
            event_name = "system.bootstrap.no_approvers",
            correlation_id = "bootstrap",
            "no approver contacts configured; every prompt will fail to resolve"
        );
    }
    info!(
        event_name = "system.bootstrap.notifications",
        correlation_id = "bootstrap",
        channel = notifier.channel(),
        enabled = config.approvals.notify,
        approvers = directory.len(),
        "notification dispatcher configured"
    );

    Ok(NotificationDispatcher::new(directory, notifier, config.approvals.notify))
}
