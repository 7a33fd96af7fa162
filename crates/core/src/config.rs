use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::{DEFAULT_REQUEST_TTL_SECS, MAX_REQUEST_TTL_SECS};
use crate::notify::ContactDirectory;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub approvals: ApprovalsConfig,
    pub twilio: TwilioConfig,
    pub approvers: BTreeMap<String, ApproverConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ApprovalsConfig {
    pub default_ttl_secs: i64,
    /// Master switch for approval prompts. Requests are still created when off.
    pub notify: bool,
}

/// SMS delivery settings. `enabled = false` keeps the service offline: prompts
/// are written to the log instead of being sent.
#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    pub from_number: Option<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverConfig {
    pub sms: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub default_ttl_secs: Option<i64>,
    pub notify: Option<bool>,
    pub twilio_enabled: Option<bool>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub twilio_api_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_TWILIO_API_BASE_URL: &str = "https://api.twilio.com";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://approvy.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                graceful_shutdown_secs: 15,
            },
            approvals: ApprovalsConfig { default_ttl_secs: DEFAULT_REQUEST_TTL_SECS, notify: true },
            twilio: TwilioConfig {
                enabled: false,
                account_sid: None,
                auth_token: None,
                from_number: None,
                api_base_url: DEFAULT_TWILIO_API_BASE_URL.to_string(),
                timeout_secs: 10,
            },
            approvers: BTreeMap::new(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("approvy.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Approver contact lookup handed to the notification dispatcher.
    pub fn contact_directory(&self) -> ContactDirectory {
        ContactDirectory::new(
            self.approvers
                .iter()
                .map(|(approver, contact)| (approver.as_str(), contact.sms.clone())),
        )
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(approvals) = patch.approvals {
            if let Some(default_ttl_secs) = approvals.default_ttl_secs {
                self.approvals.default_ttl_secs = default_ttl_secs;
            }
            if let Some(notify) = approvals.notify {
                self.approvals.notify = notify;
            }
        }

        if let Some(twilio) = patch.twilio {
            if let Some(enabled) = twilio.enabled {
                self.twilio.enabled = enabled;
            }
            if let Some(account_sid) = twilio.account_sid {
                self.twilio.account_sid = Some(account_sid);
            }
            if let Some(auth_token_value) = twilio.auth_token {
                self.twilio.auth_token = Some(secret_value(auth_token_value));
            }
            if let Some(from_number) = twilio.from_number {
                self.twilio.from_number = Some(from_number);
            }
            if let Some(api_base_url) = twilio.api_base_url {
                self.twilio.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = twilio.timeout_secs {
                self.twilio.timeout_secs = timeout_secs;
            }
        }

        if let Some(approvers) = patch.approvers {
            self.approvers.extend(approvers);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("APPROVY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("APPROVY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("APPROVY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("APPROVY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("APPROVY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("APPROVY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("APPROVY_SERVER_PORT") {
            self.server.port = parse_u16("APPROVY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("APPROVY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("APPROVY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("APPROVY_APPROVALS_DEFAULT_TTL_SECS") {
            self.approvals.default_ttl_secs =
                parse_i64("APPROVY_APPROVALS_DEFAULT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("APPROVY_APPROVALS_NOTIFY") {
            self.approvals.notify = parse_bool("APPROVY_APPROVALS_NOTIFY", &value)?;
        }

        if let Some(value) = read_env("APPROVY_TWILIO_ENABLED") {
            self.twilio.enabled = parse_bool("APPROVY_TWILIO_ENABLED", &value)?;
        }
        if let Some(value) = read_env("APPROVY_TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = Some(value);
        }
        if let Some(value) = read_env("APPROVY_TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("APPROVY_TWILIO_FROM_NUMBER") {
            self.twilio.from_number = Some(value);
        }
        if let Some(value) = read_env("APPROVY_TWILIO_API_BASE_URL") {
            self.twilio.api_base_url = value;
        }
        if let Some(value) = read_env("APPROVY_TWILIO_TIMEOUT_SECS") {
            self.twilio.timeout_secs = parse_u64("APPROVY_TWILIO_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("APPROVY_LOGGING_LEVEL").or_else(|| read_env("APPROVY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("APPROVY_LOGGING_FORMAT").or_else(|| read_env("APPROVY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(default_ttl_secs) = overrides.default_ttl_secs {
            self.approvals.default_ttl_secs = default_ttl_secs;
        }
        if let Some(notify) = overrides.notify {
            self.approvals.notify = notify;
        }
        if let Some(enabled) = overrides.twilio_enabled {
            self.twilio.enabled = enabled;
        }
        if let Some(account_sid) = overrides.twilio_account_sid {
            self.twilio.account_sid = Some(account_sid);
        }
        if let Some(auth_token) = overrides.twilio_auth_token {
            self.twilio.auth_token = Some(secret_value(auth_token));
        }
        if let Some(from_number) = overrides.twilio_from_number {
            self.twilio.from_number = Some(from_number);
        }
        if let Some(api_base_url) = overrides.twilio_api_base_url {
            self.twilio.api_base_url = api_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_approvals(&self.approvals)?;
        validate_twilio(&self.twilio)?;
        validate_approvers(&self.approvers)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// First existing config file: the explicit path, else `approvy.toml`, else `config/approvy.toml`.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("approvy.toml"), PathBuf::from("config/approvy.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_approvals(approvals: &ApprovalsConfig) -> Result<(), ConfigError> {
    if approvals.default_ttl_secs <= 0 {
        return Err(ConfigError::Validation(
            "approvals.default_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if approvals.default_ttl_secs > MAX_REQUEST_TTL_SECS {
        return Err(ConfigError::Validation(format!(
            "approvals.default_ttl_secs must not exceed {MAX_REQUEST_TTL_SECS}"
        )));
    }

    Ok(())
}

fn validate_twilio(twilio: &TwilioConfig) -> Result<(), ConfigError> {
    let base_url = twilio.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "twilio.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if twilio.timeout_secs == 0 || twilio.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "twilio.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if !twilio.enabled {
        return Ok(());
    }

    let blank = |value: Option<&str>| value.map(|value| value.trim().is_empty()).unwrap_or(true);
    if blank(twilio.account_sid.as_deref()) {
        return Err(ConfigError::Validation(
            "twilio.account_sid is required when twilio.enabled is true. Find it on the Twilio console dashboard".to_string(),
        ));
    }
    if blank(twilio.auth_token.as_ref().map(|token| token.expose_secret())) {
        return Err(ConfigError::Validation(
            "twilio.auth_token is required when twilio.enabled is true. Find it on the Twilio console dashboard".to_string(),
        ));
    }
    if blank(twilio.from_number.as_deref()) {
        return Err(ConfigError::Validation(
            "twilio.from_number is required when twilio.enabled is true (an SMS-capable Twilio number)".to_string(),
        ));
    }

    Ok(())
}

fn validate_approvers(approvers: &BTreeMap<String, ApproverConfig>) -> Result<(), ConfigError> {
    for (approver, contact) in approvers {
        if contact.sms.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "approvers.{approver}.sms must not be empty"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    approvals: Option<ApprovalsPatch>,
    twilio: Option<TwilioPatch>,
    approvers: Option<BTreeMap<String, ApproverConfig>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalsPatch {
    default_ttl_secs: Option<i64>,
    notify: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioPatch {
    enabled: Option<bool>,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::notify::ContactAddress;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.server.port == 3000, "default port should be 3000")?;
        ensure(config.approvals.default_ttl_secs == 3600, "default ttl should be one hour")?;
        ensure(!config.twilio.enabled, "twilio should be disabled by default")?;
        ensure(config.approvals.notify, "prompts should be dispatched by default")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_approvers_and_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TWILIO_AUTH_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("approvy.toml");
            fs::write(
                &path,
                r#"
[twilio]
enabled = true
account_sid = "AC123"
auth_token = "${TEST_TWILIO_AUTH_TOKEN}"
from_number = "+15550000"

[approvers.bob]
sms = "+15550100"

[approvers.carol]
sms = "+15550101"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .twilio
                    .auth_token
                    .as_ref()
                    .map(|token| token.expose_secret() == "token-from-env")
                    .unwrap_or(false),
                "auth token should be interpolated from environment",
            )?;
            ensure(config.approvers.len() == 2, "both approvers should be loaded")?;

            let directory = config.contact_directory();
            ensure(
                directory.resolve("bob").ok() == Some(&ContactAddress("+15550100".to_string())),
                "bob should resolve to his sms number",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TWILIO_AUTH_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVY_LOG_LEVEL", "debug");
        env::set_var("APPROVY_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "debug", "debug log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["APPROVY_LOG_LEVEL", "APPROVY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("APPROVY_SERVER_PORT", "4100");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("approvy.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 4000

[approvals]
default_ttl_secs = 600
notify = false

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 4100, "env port should win over file")?;
            ensure(config.approvals.default_ttl_secs == 600, "file ttl should win over default")?;
            ensure(!config.approvals.notify, "file should switch prompts off")?;
            Ok(())
        })();

        clear_vars(&["APPROVY_DATABASE_URL", "APPROVY_SERVER_PORT"]);
        result
    }

    #[test]
    fn enabled_twilio_without_credentials_fails_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVY_TWILIO_ENABLED", "yes");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("twilio.account_sid")
            );
            ensure(has_message, "validation failure should mention twilio.account_sid")
        })();

        clear_vars(&["APPROVY_TWILIO_ENABLED"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVY_TWILIO_ENABLED", "maybe");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "APPROVY_TWILIO_ENABLED", "error should name the env key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["APPROVY_TWILIO_ENABLED"]);
        result
    }

    #[test]
    fn default_ttl_beyond_one_year_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                default_ttl_secs: Some(i64::MAX),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        match result {
            Err(ConfigError::Validation(message)) => ensure(
                message.contains("approvals.default_ttl_secs"),
                "validation failure should name approvals.default_ttl_secs",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected oversized default ttl to fail validation".to_string()),
        }
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                twilio_enabled: Some(true),
                twilio_account_sid: Some("AC-test".to_string()),
                twilio_auth_token: Some("twilio-secret-value".to_string()),
                twilio_from_number: Some("+15550000".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;
        let debug = format!("{config:?}");

        ensure(!debug.contains("twilio-secret-value"), "debug output should not contain token")
    }
}
