//! Single-task execution against one target host.
//!
//! The pipeline per task, per host: merge the variable context, evaluate
//! `when`, expand the loop, and for each bound instance resolve the
//! execution host, check `creates`/`removes` guards, invoke the capability,
//! and apply `changed_when`/`failed_when` overrides. Register capture and
//! handler notification always attach to the target host, never the
//! delegate.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::condition;
use crate::delegation;
use crate::error::Error;
use crate::handlers::HandlerQueue;
use crate::inventory::{Host, Inventory};
use crate::loops::{self, BoundInstance};
use crate::modules::{GuardPredicate, Invocation, ModuleRegistry};
use crate::modules::CapabilityError;
use crate::tasks::{Task, TaskResult, TaskStatus};
use crate::vars::{Context, VariableStore};

/// Runs one task (possibly looped, possibly delegated) against one target
/// host.
pub struct TaskExecutor {
    inventory: Arc<Inventory>,
    registry: Arc<ModuleRegistry>,
    guard: GuardPredicate,
}

impl TaskExecutor {
    /// Create an executor over the given inventory and registry
    pub fn new(
        inventory: Arc<Inventory>,
        registry: Arc<ModuleRegistry>,
        guard: GuardPredicate,
    ) -> Self {
        Self {
            inventory,
            registry,
            guard,
        }
    }

    /// Execute `task` for `target`, recording register captures and handler
    /// notifications as side effects.
    pub async fn run(
        &self,
        task: &Task,
        target: &Host,
        store: &Mutex<VariableStore>,
        play_vars: &IndexMap<String, JsonValue>,
        queue: &HandlerQueue,
    ) -> TaskResult {
        let mut ctx = store.lock().merge(target, &self.inventory, play_vars);

        let result = match loops::expand(task, &ctx) {
            Err(err) => TaskResult::failed(err.to_string()),
            Ok(None) => match self.check_when(task, &ctx) {
                WhenOutcome::Run => {
                    self.run_instance(task, target, &mut ctx, &BoundInstance::direct())
                        .await
                }
                WhenOutcome::Skip(msg) => TaskResult::skipped(msg),
                WhenOutcome::Fail(msg) => TaskResult::failed(msg),
            },
            Ok(Some(bound)) => {
                // Each bound instance gets an independent `when` evaluation,
                // so one iteration may skip while others run.
                let mut per_item = Vec::with_capacity(bound.len());
                for instance in &bound {
                    if let Some(item) = &instance.item {
                        ctx.push_binding("item", item.clone());
                    }
                    let mut result = match self.check_when(task, &ctx) {
                        WhenOutcome::Run => {
                            self.run_instance(task, target, &mut ctx, instance).await
                        }
                        WhenOutcome::Skip(msg) => TaskResult::skipped(msg),
                        WhenOutcome::Fail(msg) => TaskResult::failed(msg),
                    };
                    if let Some(item) = &instance.item {
                        result.data.insert("item".to_string(), item.clone());
                        ctx.pop_frame();
                    }
                    let unreachable = result.status == TaskStatus::Unreachable;
                    per_item.push(result);
                    if unreachable {
                        break;
                    }
                }
                TaskResult::aggregate(per_item)
            }
        };

        if let Some(name) = &task.register {
            store
                .lock()
                .set_registered(&target.name, name, result.to_registered_value());
        }
        if result.changed {
            for handler in &task.notify {
                debug!(host = %target.name, handler = %handler, "notifying handler");
                queue.notify(handler, &target.name);
            }
        }
        result
    }

    /// Run one bound instance: delegation, guards, capability invocation,
    /// and result overrides.
    async fn run_instance(
        &self,
        task: &Task,
        target: &Host,
        ctx: &mut Context,
        _instance: &BoundInstance,
    ) -> TaskResult {
        let execution_host = match delegation::resolve_execution_host(task, target, &self.inventory)
        {
            Ok(host) => host,
            Err(err) => return TaskResult::failed(err.to_string()),
        };

        if let Some(path) = &task.creates {
            if (self.guard)(path) {
                return TaskResult::ok()
                    .with_msg(format!("'{path}' already exists, nothing to do"));
            }
        }
        if let Some(path) = &task.removes {
            if !(self.guard)(path) {
                return TaskResult::ok()
                    .with_msg(format!("'{path}' does not exist, nothing to do"));
            }
        }

        let capability = match self.registry.get(&task.module) {
            Some(capability) => capability,
            None => {
                return TaskResult::failed(Error::UnknownModule(task.module.clone()).to_string())
            }
        };

        let invocation = Invocation {
            host: &execution_host,
            target: &target.name,
            ctx,
        };
        let result = match capability.invoke(&task.args, &invocation).await {
            Ok(result) => result,
            Err(CapabilityError::Unreachable(msg)) => {
                return TaskResult::unreachable(msg);
            }
            Err(err) => TaskResult::failed(err.to_string()),
        };

        self.apply_overrides(task, ctx, result)
    }

    /// Apply `changed_when`/`failed_when` against the raw capability result.
    ///
    /// Both expressions see the capture as task-local bindings (`changed`,
    /// `failed`, `rc`, `stdout`, `stderr`, `msg`); an evaluation error is a
    /// task failure.
    fn apply_overrides(&self, task: &Task, ctx: &mut Context, mut result: TaskResult) -> TaskResult {
        if task.changed_when.is_none() && task.failed_when.is_none() {
            return result;
        }

        let mut frame = IndexMap::new();
        frame.insert("changed".to_string(), JsonValue::Bool(result.changed));
        frame.insert("failed".to_string(), JsonValue::Bool(result.is_failed()));
        if let Some(rc) = result.rc {
            frame.insert("rc".to_string(), JsonValue::from(rc));
        }
        if let Some(stdout) = &result.stdout {
            frame.insert("stdout".to_string(), JsonValue::String(stdout.clone()));
        }
        if let Some(stderr) = &result.stderr {
            frame.insert("stderr".to_string(), JsonValue::String(stderr.clone()));
        }
        if let Some(msg) = &result.msg {
            frame.insert("msg".to_string(), JsonValue::String(msg.clone()));
        }
        ctx.push_frame(frame);

        let mut failed = result.is_failed();
        if let Some(expr) = &task.failed_when {
            match condition::eval(expr, ctx) {
                Ok(value) => failed = value,
                Err(err) => {
                    ctx.pop_frame();
                    return TaskResult::failed(err.to_string());
                }
            }
        }
        if let Some(expr) = &task.changed_when {
            match condition::eval(expr, ctx) {
                Ok(value) => result.changed = value,
                Err(err) => {
                    ctx.pop_frame();
                    return TaskResult::failed(err.to_string());
                }
            }
        }
        ctx.pop_frame();

        result.status = if failed {
            if result.msg.is_none() {
                result.msg = Some("failed_when condition met".to_string());
            }
            TaskStatus::Failed
        } else if result.changed {
            TaskStatus::Changed
        } else {
            TaskStatus::Ok
        };
        result
    }

    /// Evaluate the task's `when` entries against the current context.
    fn check_when(&self, task: &Task, ctx: &Context) -> WhenOutcome {
        let entries = task.when_entries();
        if entries.is_empty() {
            return WhenOutcome::Run;
        }
        match condition::eval_all(&entries, ctx) {
            Ok(true) => WhenOutcome::Run,
            Ok(false) => WhenOutcome::Skip("condition not met".to_string()),
            // Undefined variables skip the task rather than failing it; the
            // `is defined` test opts out of this.
            Err(Error::UndefinedVariable(name)) => {
                WhenOutcome::Skip(format!("'{name}' is undefined"))
            }
            Err(err) => WhenOutcome::Fail(err.to_string()),
        }
    }
}

enum WhenOutcome {
    Run,
    Skip(String),
    Fail(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Group;
    use crate::modules::Capability;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCapability {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl Capability for CountingCapability {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn invoke(
            &self,
            _args: &IndexMap<String, JsonValue>,
            _invocation: &Invocation<'_>,
        ) -> Result<TaskResult, CapabilityError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(TaskResult::changed())
        }
    }

    fn setup() -> (Arc<Inventory>, Arc<ModuleRegistry>, Arc<CountingCapability>) {
        let inventory = Arc::new(
            Inventory::build(
                vec![Host::new("web1").group("webservers")],
                vec![Group::new("webservers")],
            )
            .unwrap(),
        );
        let counting = Arc::new(CountingCapability {
            invocations: AtomicUsize::new(0),
        });
        let mut registry = ModuleRegistry::with_builtins();
        registry.register_named("counting", counting.clone());
        (inventory, Arc::new(registry), counting)
    }

    fn executor(
        inventory: Arc<Inventory>,
        registry: Arc<ModuleRegistry>,
        guard: GuardPredicate,
    ) -> TaskExecutor {
        TaskExecutor::new(inventory, registry, guard)
    }

    #[tokio::test]
    async fn test_when_false_skips_without_invoking() {
        let (inventory, registry, counting) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory, registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let task = Task::new("t", "counting").when("1 == 2");
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(result.status, TaskStatus::Skipped);
        assert_eq!(counting.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undefined_when_skips() {
        let (inventory, registry, _) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory, registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let task = Task::new("t", "counting").when("mystery == 'x'");
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(result.status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_loop_invokes_per_item_and_registers_aggregate() {
        let (inventory, registry, counting) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory, registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let task = Task::new("t", "counting")
            .loop_over(vec![json!(80), json!(443)])
            .register("r");
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(counting.invocations.load(Ordering::SeqCst), 2);
        assert!(result.changed);

        let registered = store
            .lock()
            .get_registered("web1", "r")
            .cloned()
            .unwrap();
        assert_eq!(registered["results"][0]["item"], json!(80));
        assert_eq!(registered["results"][1]["item"], json!(443));
    }

    #[tokio::test]
    async fn test_per_item_when() {
        let (inventory, registry, counting) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory, registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let task = Task::new("t", "counting")
            .loop_over(vec![json!(80), json!(443)])
            .when("item == 80");
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(counting.invocations.load(Ordering::SeqCst), 1);
        let results = result.results.unwrap();
        assert_eq!(results[0].status, TaskStatus::Changed);
        assert_eq!(results[1].status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_creates_guard_skips_invocation() {
        let (inventory, registry, counting) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let guard: GuardPredicate = Arc::new(|_: &str| true);
        let exec = executor(inventory, registry, guard);
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let task = Task::new("t", "counting").creates("/etc/converged");
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(result.status, TaskStatus::Ok);
        assert!(!result.changed);
        assert_eq!(counting.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notify_on_change_only() {
        let (inventory, registry, _) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory.clone(), registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        // debug never reports changed, so no notification is queued
        let task = Task::new("t", "debug")
            .arg("msg", "hi")
            .notify("restart nginx");
        exec.run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert!(!queue.has_pending());

        let task = Task::new("t", "counting").notify("restart nginx");
        exec.run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(queue.pending_names(), vec!["restart nginx"]);
    }

    #[tokio::test]
    async fn test_changed_when_override() {
        let (inventory, registry, _) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory, registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let mut task = Task::new("t", "counting");
        task.changed_when = Some("1 == 2".to_string());
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert_eq!(result.status, TaskStatus::Ok);
        assert!(!result.changed);
    }

    #[tokio::test]
    async fn test_failed_when_override() {
        let (inventory, registry, _) = setup();
        let target = inventory.get_host("web1").unwrap().clone();
        let exec = executor(inventory, registry, crate::modules::fs_guard());
        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();

        let mut task = Task::new("t", "counting");
        task.failed_when = Some("changed".to_string());
        let result = exec
            .run(&task, &target, &store, &IndexMap::new(), &queue)
            .await;
        assert!(result.is_failed());
    }
}
