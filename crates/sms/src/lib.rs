//! SMS delivery of approval prompts through the Twilio Messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use approvy_core::config::TwilioConfig;
use approvy_core::{ContactAddress, NotificationError, Notifier};

#[derive(Debug, Error)]
pub enum TwilioSetupError {
    #[error("twilio setting `{0}` is not configured")]
    Missing(&'static str),
    #[error("failed to build twilio http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct TwilioOptions {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    pub api_base_url: String,
    pub timeout: Duration,
}

impl TwilioOptions {
    pub fn from_config(config: &TwilioConfig) -> Result<Self, TwilioSetupError> {
        let account_sid =
            config.account_sid.clone().ok_or(TwilioSetupError::Missing("twilio.account_sid"))?;
        let auth_token =
            config.auth_token.clone().ok_or(TwilioSetupError::Missing("twilio.auth_token"))?;
        let from_number =
            config.from_number.clone().ok_or(TwilioSetupError::Missing("twilio.from_number"))?;

        Ok(Self {
            account_sid,
            auth_token,
            from_number,
            api_base_url: config.api_base_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Sends approval prompts as text messages from a single Twilio number.
#[derive(Clone, Debug)]
pub struct TwilioSmsNotifier {
    options: TwilioOptions,
    client: Client,
}

impl TwilioSmsNotifier {
    pub fn new(options: TwilioOptions) -> Result<Self, TwilioSetupError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { options, client })
    }

    pub fn from_config(config: &TwilioConfig) -> Result<Self, TwilioSetupError> {
        Self::new(TwilioOptions::from_config(config)?)
    }
}

#[async_trait]
impl Notifier for TwilioSmsNotifier {
    fn channel(&self) -> &'static str {
        "twilio_sms"
    }

    async fn send(&self, to: &ContactAddress, body: &str) -> Result<(), NotificationError> {
        let form =
            [("From", self.options.from_number.as_str()), ("To", to.0.as_str()), ("Body", body)];

        let response = self
            .client
            .post(self.options.messages_url())
            .basic_auth(&self.options.account_sid, Some(self.options.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(format!("twilio request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&raw).unwrap_or_default();
            warn!(
                event_name = "sms.twilio.rejected",
                http_status = status.as_u16(),
                twilio_code = detail.code,
                "twilio rejected message"
            );
            return Err(NotificationError::Delivery(format!(
                "twilio returned {status}: {}",
                detail.message.unwrap_or(raw)
            )));
        }

        let message = response.json::<MessageResource>().await.map_err(|e| {
            NotificationError::Delivery(format!("failed to parse twilio response: {e}"))
        })?;
        debug!(
            event_name = "sms.twilio.accepted",
            message_sid = %message.sid,
            message_status = message.status.as_deref().unwrap_or("unknown"),
            "twilio accepted message"
        );

        Ok(())
    }
}
