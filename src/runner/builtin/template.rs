//! Template runner — renders `{{key}}` placeholders from params.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RunnerError;
use crate::runner::{require_str, RunnerContext, RunnerOutput, TaskRunner};

/// Text templating runner.
///
/// Params: `template` (required), `vars` (object; defaults to the full
/// param set). Unknown placeholders are left untouched so downstream
/// steps can spot them.
#[derive(Debug, Default)]
pub struct TemplateRunner;

impl TemplateRunner {
    pub fn new() -> Self {
        Self
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{{key}}` occurrences with values from `vars`.
fn render(template: &str, vars: &Value) -> String {
    let Some(map) = vars.as_object() else {
        return template.to_string();
    };
    let mut rendered = template.to_string();
    for (key, value) in map {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), &value_to_text(value));
    }
    rendered
}

#[async_trait]
impl TaskRunner for TemplateRunner {
    fn name(&self) -> &str {
        "template"
    }

    async fn run(&self, ctx: RunnerContext) -> Result<RunnerOutput, RunnerError> {
        let template = require_str(self.name(), &ctx.params, "template")?;
        let vars = ctx.params.get("vars").unwrap_or(&ctx.params);
        Ok(RunnerOutput::result(Value::String(render(template, vars))))
    }
}
