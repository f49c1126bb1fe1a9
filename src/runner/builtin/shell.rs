//! Shell runner — executes a command and captures its output.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::error::RunnerError;
use crate::runner::{optional_str, require_str, RunnerContext, RunnerOutput, TaskRunner};

/// Maximum captured output per stream before truncation (16KB).
const MAX_OUTPUT_SIZE: usize = 16 * 1024;

/// Command execution runner.
///
/// Params: `command` (required), `args` (string array), `cwd`.
/// The process's exit code becomes the result; a non-zero exit is a
/// runner failure so the step records an error.
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_OUTPUT_SIZE {
        s.truncate(MAX_OUTPUT_SIZE);
        s.push_str("\n[truncated]");
    }
    s
}

#[async_trait]
impl TaskRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, ctx: RunnerContext) -> Result<RunnerOutput, RunnerError> {
        let command = require_str(self.name(), &ctx.params, "command")?;
        let args: Vec<String> = match ctx.params.get("args") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(RunnerError::InvalidParam {
                        runner: self.name().to_string(),
                        key: "args".to_string(),
                        message: format!("expected string elements, got {other}"),
                    }),
                })
                .collect::<Result<_, _>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(RunnerError::InvalidParam {
                    runner: self.name().to_string(),
                    key: "args".to_string(),
                    message: format!("expected an array, got {other}"),
                });
            }
        };

        let mut cmd = Command::new(command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = optional_str(&ctx.params, "cwd") {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await.map_err(|e| RunnerError::Failed {
            runner: self.name().to_string(),
            reason: format!("failed to spawn {command}: {e}"),
        })?;

        let stdout = truncate(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).into_owned());
        let code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(RunnerError::Failed {
                runner: self.name().to_string(),
                reason: format!("{command} exited with code {code}: {stderr}"),
            });
        }

        Ok(RunnerOutput {
            result: json!({"code": code}),
            stdout: Some(Value::String(stdout)),
            stderr: Some(Value::String(stderr)),
        })
    }
}
