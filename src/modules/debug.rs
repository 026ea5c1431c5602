//! Debug capability: print a message or a variable value.
//!
//! Runs entirely on the control node and never reports a change, so it is
//! trivially idempotent and never triggers handlers.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::info;

use super::{Capability, CapabilityError, Invocation};
use crate::tasks::TaskResult;

/// Prints `msg`, or the value of the variable named by `var`.
pub struct DebugCapability;

impl DebugCapability {
    fn render(value: &JsonValue) -> String {
        match value {
            JsonValue::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
        }
    }
}

#[async_trait]
impl Capability for DebugCapability {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn invoke(
        &self,
        args: &IndexMap<String, JsonValue>,
        invocation: &Invocation<'_>,
    ) -> Result<TaskResult, CapabilityError> {
        let message = if let Some(msg) = args.get("msg") {
            Self::render(msg)
        } else if let Some(JsonValue::String(var)) = args.get("var") {
            match invocation.ctx.lookup(var) {
                Some(value) => format!("{var}: {}", Self::render(value)),
                None => format!("{var}: (undefined)"),
            }
        } else {
            "Hello world!".to_string()
        };

        info!(host = %invocation.target, "{message}");
        Ok(TaskResult::ok().with_msg(message))
    }
}
