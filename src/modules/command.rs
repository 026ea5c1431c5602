//! Command capability: run a shell command on the control node.
//!
//! Commands are not idempotent by themselves; declarations combine this
//! capability with `creates`/`removes` guards or `changed_when` overrides to
//! get convergent behavior.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::process::Command;

use super::{Capability, CapabilityError, Invocation};
use crate::tasks::TaskResult;

/// Runs `cmd` through the shell, capturing rc, stdout, and stderr.
///
/// A zero exit reports changed; a nonzero exit reports failed with the
/// capture attached so `failed_when` can override it.
pub struct CommandCapability;

#[async_trait]
impl Capability for CommandCapability {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn invoke(
        &self,
        args: &IndexMap<String, JsonValue>,
        _invocation: &Invocation<'_>,
    ) -> Result<TaskResult, CapabilityError> {
        let cmd = match args.get("cmd") {
            Some(JsonValue::String(cmd)) => cmd.clone(),
            Some(other) => {
                return Err(CapabilityError::InvalidArgs(format!(
                    "'cmd' must be a string, got {other}"
                )))
            }
            None => {
                return Err(CapabilityError::InvalidArgs(
                    "'cmd' is required".to_string(),
                ))
            }
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .output()
            .await
            .map_err(|e| CapabilityError::Unreachable(e.to_string()))?;

        let rc = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        let mut result = if rc == 0 {
            TaskResult::changed()
        } else {
            TaskResult::failed(format!("command exited with rc {rc}"))
        };
        result.rc = Some(rc);
        result.stdout = Some(stdout);
        result.stderr = Some(stderr);
        Ok(result)
    }
}
