use approvy_core::config::{AppConfig, LoadOptions};
use approvy_db::{connect_with_settings, migrations};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{escape_json, runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when every check passes or only warns, 1 otherwise.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::text(exit_code, output);
    }

    CommandResult::text(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_twilio(&config));
            checks.push(check_approvers(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            let details = error.to_string();
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, details));
            let dependent = [
                "twilio_readiness",
                "approver_directory",
                "database_connectivity",
                "database_schema",
            ];
            for name in dependent {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_twilio(config: &AppConfig) -> DoctorCheck {
    let twilio = &config.twilio;
    if !twilio.enabled {
        return DoctorCheck::new(
            "twilio_readiness",
            CheckStatus::Pass,
            "twilio disabled; approval prompts are written to the log",
        );
    }

    let token_present = twilio
        .auth_token
        .as_ref()
        .map(|token| !token.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if twilio.account_sid.is_some() && twilio.from_number.is_some() && token_present {
        DoctorCheck::new(
            "twilio_readiness",
            CheckStatus::Pass,
            format!("twilio credentials present; sending via `{}`", twilio.api_base_url),
        )
    } else {
        DoctorCheck::new("twilio_readiness", CheckStatus::Fail, "twilio credentials incomplete")
    }
}

fn check_approvers(config: &AppConfig) -> DoctorCheck {
    if !config.approvals.notify {
        return DoctorCheck::new(
            "approver_directory",
            CheckStatus::Pass,
            "notifications switched off; contacts are not used",
        );
    }

    match config.approvers.len() {
        0 => DoctorCheck::new(
            "approver_directory",
            CheckStatus::Warn,
            "no approvers configured; requests will be created but nobody is prompted",
        ),
        count => DoctorCheck::new(
            "approver_directory",
            CheckStatus::Pass,
            format!("{count} approver contact(s) configured"),
        ),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            )];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::new(
                        "database_schema",
                        CheckStatus::Skipped,
                        "skipped because the database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        );
        let known = migrations::known_versions();
        let schema = match migrations::applied_versions(&pool).await {
            Ok(applied) if applied >= known => DoctorCheck::new(
                "database_schema",
                CheckStatus::Pass,
                format!("{applied} of {known} migrations applied"),
            ),
            Ok(applied) => DoctorCheck::new(
                "database_schema",
                CheckStatus::Fail,
                format!("{applied} of {known} migrations applied; run `approvy migrate`"),
            ),
            Err(_) => DoctorCheck::new(
                "database_schema",
                CheckStatus::Fail,
                "database has never been migrated; run `approvy migrate`",
            ),
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
