//! HTTP runner — uploads/notifies an external endpoint.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::error::RunnerError;
use crate::runner::{optional_str, require_str, RunnerContext, RunnerOutput, TaskRunner};

/// Maximum response body captured into step diagnostics (8KB).
const MAX_BODY_SIZE: usize = 8 * 1024;

/// HTTP request runner.
///
/// Params: `url` (required), `method` (default POST), `body` (JSON sent
/// as the request body), `headers` (string-valued object). A non-2xx
/// response is a runner failure.
pub struct HttpRunner {
    client: reqwest::Client,
}

impl HttpRunner {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRunner for HttpRunner {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self, ctx: RunnerContext) -> Result<RunnerOutput, RunnerError> {
        let url = require_str(self.name(), &ctx.params, "url")?;
        let method: Method = optional_str(&ctx.params, "method")
            .unwrap_or("POST")
            .to_uppercase()
            .parse()
            .map_err(|_| RunnerError::InvalidParam {
                runner: self.name().to_string(),
                key: "method".to_string(),
                message: "not a valid HTTP method".to_string(),
            })?;

        let mut request = self.client.request(method, url);
        if let Some(Value::Object(headers)) = ctx.params.get("headers") {
            for (key, value) in headers {
                if let Value::String(v) = value {
                    request = request.header(key, v);
                }
            }
        }
        if let Some(body) = ctx.params.get("body") {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| RunnerError::Failed {
            runner: self.name().to_string(),
            reason: format!("request failed: {e}"),
        })?;

        let status = response.status();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_SIZE {
            body.truncate(MAX_BODY_SIZE);
        }

        if !status.is_success() {
            return Err(RunnerError::Failed {
                runner: self.name().to_string(),
                reason: format!("endpoint returned {status}: {body}"),
            });
        }

        Ok(RunnerOutput {
            result: json!({"status": status.as_u16()}),
            stdout: Some(Value::String(body)),
            stderr: None,
        })
    }
}
