//! Loop expansion.
//!
//! A `loop` clause expands one declared task into bound instances, one per
//! item, executed in item order on the same host. Map sources yield
//! `{key, value}` items; an empty source yields zero instances and an
//! unchanged aggregate.

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::tasks::{LoopSource, Task};
use crate::vars::Context;

/// One expansion of a looped task: the item bound for this instance and its
/// position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundInstance {
    /// The loop item, `None` for a task with no loop clause
    pub item: Option<JsonValue>,
    /// Zero-based position in the loop source
    pub index: usize,
}

impl BoundInstance {
    /// The single instance of an unlooped task
    pub fn direct() -> Self {
        Self {
            item: None,
            index: 0,
        }
    }
}

/// Expand a task's loop clause against the pre-loop context.
///
/// Returns `None` for tasks without a loop clause; the caller runs the task
/// directly. A looped task always yields a list, possibly empty. The loop
/// source is resolved once, before any item executes, so a task cannot
/// observe items appended by its own register.
pub fn expand(task: &Task, ctx: &Context) -> Result<Option<Vec<BoundInstance>>> {
    let source = match &task.loop_source {
        Some(source) => source,
        None => return Ok(None),
    };

    let items = match source {
        LoopSource::Items(items) => items.clone(),
        LoopSource::Expr(expr) => {
            let value = ctx.lookup(expr).ok_or_else(|| {
                Error::loop_source(
                    task.display_name(),
                    format!("loop expression '{expr}' is undefined"),
                )
            })?;
            materialize(task, expr, value)?
        }
    };

    Ok(Some(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| BoundInstance {
                item: Some(item),
                index,
            })
            .collect(),
    ))
}

/// Turn a resolved loop value into a flat item list.
///
/// Lists iterate as-is; maps iterate entries as `{key, value}` objects in
/// declaration order. Anything else is a loop source error.
fn materialize(task: &Task, expr: &str, value: &JsonValue) -> Result<Vec<JsonValue>> {
    match value {
        JsonValue::Array(items) => Ok(items.clone()),
        JsonValue::Object(map) => Ok(map
            .iter()
            .map(|(key, value)| {
                let mut entry = serde_json::Map::new();
                entry.insert("key".to_string(), JsonValue::String(key.clone()));
                entry.insert("value".to_string(), value.clone());
                JsonValue::Object(entry)
            })
            .collect()),
        other => Err(Error::loop_source(
            task.display_name(),
            format!(
                "loop expression '{expr}' must resolve to a list or map, got {}",
                type_name(other)
            ),
        )),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "map",
    }
}
