//! Mail runner — SMTP notification delivery.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::error::RunnerError;
use crate::runner::{optional_str, require_str, RunnerContext, RunnerOutput, TaskRunner};

/// SMTP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (mail runner disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// SMTP mail runner.
///
/// Params: `to` (required), `subject` (required), `body` (default empty),
/// `from` (defaults to the configured sender).
pub struct MailRunner {
    config: SmtpConfig,
}

impl MailRunner {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn send_failed(&self, reason: String) -> RunnerError {
        RunnerError::Failed {
            runner: "mail".to_string(),
            reason,
        }
    }
}

#[async_trait]
impl TaskRunner for MailRunner {
    fn name(&self) -> &str {
        "mail"
    }

    async fn run(&self, ctx: RunnerContext) -> Result<RunnerOutput, RunnerError> {
        let to = require_str(self.name(), &ctx.params, "to")?;
        let subject = require_str(self.name(), &ctx.params, "subject")?;
        let body = optional_str(&ctx.params, "body").unwrap_or_default();
        let from = optional_str(&ctx.params, "from").unwrap_or(&self.config.from_address);

        let email = Message::builder()
            .from(
                from.parse()
                    .map_err(|e| self.send_failed(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| self.send_failed(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| self.send_failed(format!("Failed to build email: {e}")))?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
            .map_err(|e| self.send_failed(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        let response = transport
            .send(email)
            .await
            .map_err(|e| self.send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %to, "Mail sent");
        Ok(RunnerOutput {
            result: json!({"accepted": true}),
            stdout: Some(Value::String(format!("{:?}", response.message().collect::<Vec<_>>()))),
            stderr: None,
        })
    }
}
