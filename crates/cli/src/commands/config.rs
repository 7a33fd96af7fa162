use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use approvy_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct ConfigFile {
    path: PathBuf,
    doc: Value,
}

impl ConfigFile {
    fn detect() -> Option<Self> {
        let path = resolve_config_path(None)?;
        let doc = fs::read_to_string(&path).ok()?.parse::<Value>().ok()?;
        Some(Self { path, doc })
    }

    fn contains(&self, key_path: &str) -> bool {
        let mut current = &self.doc;
        for key in key_path.split('.') {
            let Some(next) = current.get(key) else {
                return false;
            };
            current = next;
        }
        true
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::text(2, format!("config validation failed: {error}")),
    };

    let file = ConfigFile::detect();
    CommandResult::text(0, render(&config, file.as_ref()))
}

fn render(config: &AppConfig, file: Option<&ConfigFile>) -> String {
    let entries: Vec<(&str, String, Option<&str>)> = vec![
        ("database.url", config.database.url.clone(), Some("APPROVY_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("APPROVY_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("APPROVY_DATABASE_TIMEOUT_SECS"),
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("APPROVY_SERVER_BIND_ADDRESS"),
        ),
        ("server.port", config.server.port.to_string(), Some("APPROVY_SERVER_PORT")),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            Some("APPROVY_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        (
            "approvals.default_ttl_secs",
            config.approvals.default_ttl_secs.to_string(),
            Some("APPROVY_APPROVALS_DEFAULT_TTL_SECS"),
        ),
        ("approvals.notify", config.approvals.notify.to_string(), Some("APPROVY_APPROVALS_NOTIFY")),
        ("twilio.enabled", config.twilio.enabled.to_string(), Some("APPROVY_TWILIO_ENABLED")),
        (
            "twilio.account_sid",
            config.twilio.account_sid.as_deref().map(redact_sid).unwrap_or_else(unset),
            Some("APPROVY_TWILIO_ACCOUNT_SID"),
        ),
        (
            "twilio.auth_token",
            config
                .twilio
                .auth_token
                .as_ref()
                .map(|token| redact_secret(token.expose_secret()))
                .unwrap_or_else(unset),
            Some("APPROVY_TWILIO_AUTH_TOKEN"),
        ),
        (
            "twilio.from_number",
            config.twilio.from_number.clone().unwrap_or_else(unset),
            Some("APPROVY_TWILIO_FROM_NUMBER"),
        ),
        (
            "twilio.api_base_url",
            config.twilio.api_base_url.clone(),
            Some("APPROVY_TWILIO_API_BASE_URL"),
        ),
        (
            "twilio.timeout_secs",
            config.twilio.timeout_secs.to_string(),
            Some("APPROVY_TWILIO_TIMEOUT_SECS"),
        ),
        ("logging.level", config.logging.level.clone(), Some("APPROVY_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("APPROVY_LOGGING_FORMAT")),
    ];

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        lines.push(render_line(key, &value, field_source(key, env_key, file)));
    }

    if config.approvers.is_empty() {
        lines.push("- approvers = <none> (source: default)".to_string());
    }
    for (approver, contact) in &config.approvers {
        let key = format!("approvers.{approver}.sms");
        let source = field_source(&key, None, file);
        lines.push(render_line(&key, &mask_phone(&contact.sms), source));
    }

    lines.join("\n")
}

fn field_source(key_path: &str, env_key: Option<&str>, file: Option<&ConfigFile>) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    match file {
        Some(file) if file.contains(key_path) => format!("file ({})", display(&file.path)),
        _ => "default".to_string(),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn unset() -> String {
    "<unset>".to_string()
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

fn redact_sid(sid: &str) -> String {
    let chars: Vec<char> = sid.trim().chars().collect();
    if chars.len() <= 6 {
        return "<redacted>".to_string();
    }
    let prefix: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}***{tail}")
}

/// Keeps the last four digits so operators can tell numbers apart.
fn mask_phone(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***{tail}")
}
