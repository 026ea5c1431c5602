//! Task, handler, and result definitions.
//!
//! A [`Task`] is one declared unit of desired-state work: a module reference
//! with arguments, optionally conditional (`when`), looped (`loop`),
//! delegated (`delegate_to`/`run_once`), tagged, registered, and notifying.
//! Tasks are immutable once parsed; results live in the variable store, not
//! in the task.
//!
//! A [`Handler`] is a task with an identity name, runnable only via
//! notification.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A `when` clause: a single expression or a list that is AND-combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WhenClause {
    /// One expression
    Single(String),
    /// All expressions must hold
    Multiple(Vec<String>),
}

impl WhenClause {
    /// The expressions in evaluation order
    pub fn entries(&self) -> Vec<String> {
        match self {
            WhenClause::Single(expr) => vec![expr.clone()],
            WhenClause::Multiple(exprs) => exprs.clone(),
        }
    }
}

impl From<&str> for WhenClause {
    fn from(expr: &str) -> Self {
        WhenClause::Single(expr.to_string())
    }
}

/// A loop source: a literal list, or an expression resolving to a list or
/// map in the pre-loop context (e.g. `r.results` to re-iterate a register).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopSource {
    /// Literal items
    Items(Vec<JsonValue>),
    /// Dotted-path expression evaluated once against the pre-loop context
    Expr(String),
}

/// A task to be executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task name (displayed during execution)
    #[serde(default)]
    pub name: String,
    /// Module to execute
    pub module: String,
    /// Module arguments
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,
    /// Conditional expression(s); all must be true
    #[serde(default)]
    pub when: Option<WhenClause>,
    /// Loop source
    #[serde(default, rename = "loop")]
    pub loop_source: Option<LoopSource>,
    /// Delegate execution to another host (`localhost` is reserved)
    #[serde(default)]
    pub delegate_to: Option<String>,
    /// Execute once for the whole fleet, on the first resolved host
    #[serde(default)]
    pub run_once: bool,
    /// Tags for plan filtering
    #[serde(default)]
    pub tags: Vec<String>,
    /// Variable name to register the result under (target-host scoped)
    #[serde(default)]
    pub register: Option<String>,
    /// Handlers to notify on change
    #[serde(default)]
    pub notify: Vec<String>,
    /// Whether a failure should leave the host in the play
    #[serde(default)]
    pub ignore_errors: bool,
    /// Guard: skip invocation if this path already exists
    #[serde(default)]
    pub creates: Option<String>,
    /// Guard: skip invocation if this path no longer exists
    #[serde(default)]
    pub removes: Option<String>,
    /// Override the reported changed state with an expression
    #[serde(default)]
    pub changed_when: Option<String>,
    /// Override the reported failed state with an expression
    #[serde(default)]
    pub failed_when: Option<String>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            name: String::new(),
            module: String::new(),
            args: IndexMap::new(),
            when: None,
            loop_source: None,
            delegate_to: None,
            run_once: false,
            tags: Vec::new(),
            register: None,
            notify: Vec::new(),
            ignore_errors: false,
            creates: None,
            removes: None,
            changed_when: None,
            failed_when: None,
        }
    }
}

impl Task {
    /// Create a new task with the given name and module
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            ..Default::default()
        }
    }

    /// Add an argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the when condition
    pub fn when(mut self, condition: impl Into<WhenClause>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// Set literal loop items
    pub fn loop_over(mut self, items: Vec<JsonValue>) -> Self {
        self.loop_source = Some(LoopSource::Items(items));
        self
    }

    /// Set a loop expression resolved against the pre-loop context
    pub fn loop_expr(mut self, expr: impl Into<String>) -> Self {
        self.loop_source = Some(LoopSource::Expr(expr.into()));
        self
    }

    /// Delegate execution to another host
    pub fn delegate_to(mut self, host: impl Into<String>) -> Self {
        self.delegate_to = Some(host.into());
        self
    }

    /// Collapse execution to a single representative host
    pub fn run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Register the result under a variable name
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    /// Notify a handler on change
    pub fn notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    /// Keep the host in the play even if this task fails
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Skip invocation when the given path already exists
    pub fn creates(mut self, path: impl Into<String>) -> Self {
        self.creates = Some(path.into());
        self
    }

    /// Skip invocation when the given path no longer exists
    pub fn removes(mut self, path: impl Into<String>) -> Self {
        self.removes = Some(path.into());
        self
    }

    /// The `when` expressions, empty when unconditional
    pub fn when_entries(&self) -> Vec<String> {
        self.when.as_ref().map(WhenClause::entries).unwrap_or_default()
    }

    /// Display name falling back to the module reference
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.module
        } else {
            &self.name
        }
    }
}

/// A handler: a task with an identity name, executable only via
/// notification and never directly scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    /// Handler name (the notification target)
    pub name: String,
    /// Module to execute
    pub module: String,
    /// Module arguments
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,
    /// Optional when condition
    #[serde(default)]
    pub when: Option<WhenClause>,
}

impl Handler {
    /// Create a new handler
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args: IndexMap::new(),
            when: None,
        }
    }

    /// Add an argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the when condition
    pub fn when(mut self, condition: impl Into<WhenClause>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// View this handler as a plain task for execution
    pub fn as_task(&self) -> Task {
        Task {
            name: self.name.clone(),
            module: self.module.clone(),
            args: self.args.clone(),
            when: self.when.clone(),
            ..Default::default()
        }
    }
}

/// Status of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Completed successfully without changes
    Ok,
    /// Completed successfully with changes
    Changed,
    /// Failed
    Failed,
    /// Skipped (condition not met, guard held, or undefined variable)
    Skipped,
    /// Not executed here because a `run_once` sibling ran elsewhere
    FanOutSkipped,
    /// Host was unreachable
    Unreachable,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Ok
    }
}

/// Result of executing a task against one host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    /// Final status
    pub status: TaskStatus,
    /// Whether something was changed
    pub changed: bool,
    /// Optional message from the capability or engine
    #[serde(default)]
    pub msg: Option<String>,
    /// Return code, when the capability ran a command
    #[serde(default)]
    pub rc: Option<i32>,
    /// Captured standard output
    #[serde(default)]
    pub stdout: Option<String>,
    /// Captured standard error
    #[serde(default)]
    pub stderr: Option<String>,
    /// Module-specific result fields
    #[serde(default)]
    pub data: IndexMap<String, JsonValue>,
    /// Per-item results for loop-expanded tasks; each entry carries the
    /// originating loop item under `item`
    #[serde(default)]
    pub results: Option<Vec<TaskResult>>,
}

impl TaskResult {
    /// Create a successful, unchanged result
    pub fn ok() -> Self {
        Self {
            status: TaskStatus::Ok,
            ..Default::default()
        }
    }

    /// Create a changed result
    pub fn changed() -> Self {
        Self {
            status: TaskStatus::Changed,
            changed: true,
            ..Default::default()
        }
    }

    /// Create a failed result
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Create a skipped result
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Skipped,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Create a fan-out skip result (a `run_once` sibling ran elsewhere)
    pub fn fan_out_skipped(executed_on: &str) -> Self {
        Self {
            status: TaskStatus::FanOutSkipped,
            msg: Some(format!("run_once executed on '{executed_on}'")),
            ..Default::default()
        }
    }

    /// Create an unreachable result
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Unreachable,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Set the message
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Set the return code
    pub fn with_rc(mut self, rc: i32) -> Self {
        self.rc = Some(rc);
        self
    }

    /// Set standard output
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Add a module-specific field
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Whether the task failed
    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    /// Whether the task was skipped (including fan-out skips)
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, TaskStatus::Skipped | TaskStatus::FanOutSkipped)
    }

    /// Aggregate per-item results into one result for a loop-expanded task.
    ///
    /// `changed`/`failed` fold over the items; the entries keep their order.
    pub fn aggregate(results: Vec<TaskResult>) -> Self {
        let changed = results.iter().any(|r| r.changed);
        let failed = results.iter().any(|r| r.is_failed());
        let unreachable = results.iter().any(|r| r.status == TaskStatus::Unreachable);
        let all_skipped = !results.is_empty() && results.iter().all(|r| r.is_skipped());
        let status = if unreachable {
            TaskStatus::Unreachable
        } else if failed {
            TaskStatus::Failed
        } else if all_skipped {
            TaskStatus::Skipped
        } else if changed {
            TaskStatus::Changed
        } else {
            TaskStatus::Ok
        };
        Self {
            status,
            changed,
            results: Some(results),
            ..Default::default()
        }
    }

    /// The value stored under a `register` name: status flags, command
    /// capture, module fields, and the per-item `results` list.
    pub fn to_registered_value(&self) -> JsonValue {
        let mut map = serde_json::Map::new();
        map.insert("changed".into(), JsonValue::Bool(self.changed));
        map.insert("failed".into(), JsonValue::Bool(self.is_failed()));
        map.insert("skipped".into(), JsonValue::Bool(self.is_skipped()));
        if let Some(msg) = &self.msg {
            map.insert("msg".into(), JsonValue::String(msg.clone()));
        }
        if let Some(rc) = self.rc {
            map.insert("rc".into(), JsonValue::from(rc));
        }
        if let Some(stdout) = &self.stdout {
            map.insert("stdout".into(), JsonValue::String(stdout.clone()));
        }
        if let Some(stderr) = &self.stderr {
            map.insert("stderr".into(), JsonValue::String(stderr.clone()));
        }
        for (key, value) in &self.data {
            map.insert(key.clone(), value.clone());
        }
        if let Some(results) = &self.results {
            map.insert(
                "results".into(),
                JsonValue::Array(results.iter().map(TaskResult::to_registered_value).collect()),
            );
        }
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_builder() {
        let task = Task::new("install nginx", "package")
            .arg("name", "nginx")
            .arg("state", "present")
            .when("env == 'prod'")
            .notify("restart nginx")
            .register("install_result")
            .tag("packages");

        assert_eq!(task.display_name(), "install nginx");
        assert_eq!(task.when_entries(), vec!["env == 'prod'"]);
        assert_eq!(task.notify, vec!["restart nginx"]);
        assert_eq!(task.register.as_deref(), Some("install_result"));
    }

    #[test]
    fn test_task_yaml_round_trip() {
        let yaml = r#"
name: open ports
module: firewall
args:
  state: open
when:
  - env == 'prod'
  - port is defined
loop: [80, 443]
tags: [network, never]
notify: [reload firewall]
register: fw
"#;
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.name, "open ports");
        assert_eq!(task.when_entries().len(), 2);
        assert_eq!(
            task.loop_source,
            Some(LoopSource::Items(vec![json!(80), json!(443)]))
        );
        assert_eq!(task.tags, vec!["network", "never"]);
    }

    #[test]
    fn test_loop_expr_from_yaml() {
        let task: Task = serde_yaml::from_str("module: debug\nloop: r.results\n").unwrap();
        assert_eq!(task.loop_source, Some(LoopSource::Expr("r.results".into())));
    }

    #[test]
    fn test_handler_as_task() {
        let handler = Handler::new("restart nginx", "service")
            .arg("name", "nginx")
            .arg("state", "restarted");
        let task = handler.as_task();
        assert_eq!(task.name, "restart nginx");
        assert_eq!(task.module, "service");
        assert_eq!(task.args.len(), 2);
        assert!(task.notify.is_empty());
    }

    #[test]
    fn test_constructors_and_predicates() {
        assert!(TaskResult::failed("boom").is_failed());
        assert!(!TaskResult::failed("boom").is_skipped());
        assert!(TaskResult::skipped("nope").is_skipped());
        assert!(TaskResult::fan_out_skipped("web1").is_skipped());
        assert!(!TaskResult::ok().is_failed());
    }

    #[test]
    fn test_aggregate_folds_status() {
        let agg = TaskResult::aggregate(vec![TaskResult::ok(), TaskResult::changed()]);
        assert!(agg.changed);
        assert!(!agg.is_failed());
        assert_eq!(agg.status, TaskStatus::Changed);

        let agg = TaskResult::aggregate(vec![TaskResult::changed(), TaskResult::failed("boom")]);
        assert!(agg.is_failed());
        assert!(agg.changed);

        let agg = TaskResult::aggregate(vec![
            TaskResult::skipped("a"),
            TaskResult::skipped("b"),
        ]);
        assert_eq!(agg.status, TaskStatus::Skipped);
    }

    #[test]
    fn test_registered_value_shape() {
        let item = TaskResult::changed().with_data("item", json!(80)).with_rc(0);
        let agg = TaskResult::aggregate(vec![item]);
        let value = agg.to_registered_value();
        assert_eq!(value["changed"], json!(true));
        assert_eq!(value["results"][0]["item"], json!(80));
        assert_eq!(value["results"][0]["rc"], json!(0));
    }
}
