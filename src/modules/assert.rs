//! Assert capability: fail the task unless every given expression holds.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::{Capability, CapabilityError, Invocation};
use crate::condition;
use crate::tasks::TaskResult;

/// Evaluates `that` (an expression or list of expressions) against the
/// task's variable context; all must be true. Never reports a change.
pub struct AssertCapability;

#[async_trait]
impl Capability for AssertCapability {
    fn name(&self) -> &'static str {
        "assert"
    }

    async fn invoke(
        &self,
        args: &IndexMap<String, JsonValue>,
        invocation: &Invocation<'_>,
    ) -> Result<TaskResult, CapabilityError> {
        let that = args
            .get("that")
            .ok_or_else(|| CapabilityError::InvalidArgs("'that' is required".to_string()))?;

        let exprs: Vec<String> = match that {
            JsonValue::String(expr) => vec![expr.clone()],
            JsonValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    JsonValue::String(expr) => Ok(expr.clone()),
                    other => Err(CapabilityError::InvalidArgs(format!(
                        "'that' entries must be strings, got {other}"
                    ))),
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(CapabilityError::InvalidArgs(format!(
                    "'that' must be a string or list, got {other}"
                )))
            }
        };

        for expr in &exprs {
            let holds = condition::eval(expr, invocation.ctx)
                .map_err(|e| CapabilityError::Failure(e.to_string()))?;
            if !holds {
                return Err(CapabilityError::Failure(format!(
                    "assertion failed: {expr}"
                )));
            }
        }

        Ok(TaskResult::ok().with_msg(format!("all {} assertions passed", exprs.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Host;
    use crate::vars::Context;
    use serde_json::json;

    #[tokio::test]
    async fn test_assertions_pass_and_fail() {
        let host = Host::new("web1");
        let mut base = indexmap::IndexMap::new();
        base.insert("env".to_string(), json!("prod"));
        let ctx = Context::from_map(base);
        let invocation = Invocation {
            host: &host,
            target: "web1",
            ctx: &ctx,
        };

        let mut args = IndexMap::new();
        args.insert("that".to_string(), json!(["env == 'prod'"]));
        assert!(AssertCapability.invoke(&args, &invocation).await.is_ok());

        args.insert("that".to_string(), json!("env == 'staging'"));
        let err = AssertCapability.invoke(&args, &invocation).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Failure(_)));
    }
}
