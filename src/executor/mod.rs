//! Play orchestration.
//!
//! Scheduling model: play-level barrier, host-level parallelism, task-level
//! sequential per host. Every task fans out across the still-active hosts
//! under a fork limit and joins before the next task starts, so a later
//! task can rely on every host having finished the earlier one. Handler
//! flushes are barriers by construction: they run between fan-outs.

mod report;
mod task;

pub use report::{HostSummary, RunReport, TaskRecord};
pub use task::TaskExecutor;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::handlers::{HandlerQueue, FLUSH_HANDLERS};
use crate::inventory::{Host, Inventory};
use crate::modules::{fs_guard, GuardPredicate, ModuleRegistry};
use crate::plan::{self, Plan, TagFilter};
use crate::playbook::{Play, Playbook};
use crate::tasks::{Task, TaskResult};
use crate::vars::VariableStore;

/// Default fan-out limit, matching the conventional forks default.
pub const DEFAULT_FORKS: usize = 5;

/// Orchestrates plan building, per-host task execution, and handler
/// flushing for a playbook run.
pub struct PlayRunner {
    inventory: Arc<Inventory>,
    registry: Arc<ModuleRegistry>,
    forks: usize,
    guard: GuardPredicate,
    cancel: CancellationToken,
}

impl PlayRunner {
    /// Create a runner over an inventory and capability registry
    pub fn new(inventory: Inventory, registry: ModuleRegistry) -> Self {
        Self {
            inventory: Arc::new(inventory),
            registry: Arc::new(registry),
            forks: DEFAULT_FORKS,
            guard: fs_guard(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the fan-out limit (minimum 1)
    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks.max(1);
        self
    }

    /// Replace the `creates`/`removes` guard predicate
    pub fn with_guard(mut self, guard: GuardPredicate) -> Self {
        self.guard = guard;
        self
    }

    /// Token that aborts scheduling of further tasks when cancelled.
    ///
    /// In-flight capability invocations are allowed to finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every play in order, honoring the tag filter and an optional
    /// host-pattern limit.
    ///
    /// Configuration errors (unknown modules, handlers, delegates, or
    /// patterns) abort before any host is touched.
    pub async fn run_playbook(
        &self,
        playbook: &Playbook,
        filter: &TagFilter,
        limit: Option<&str>,
    ) -> Result<RunReport> {
        // Validate every play before executing any, so a configuration
        // error in a later play cannot leave earlier plays half-applied.
        let mut prepared = Vec::with_capacity(playbook.plays.len());
        for play in &playbook.plays {
            prepared.push(self.prepare(play, filter, limit)?);
        }

        let mut report = RunReport::new();
        for (plan, targets) in prepared {
            self.execute(plan, targets, &mut report).await;
        }
        Ok(report)
    }

    /// Run a single play
    pub async fn run_play(
        &self,
        play: &Play,
        filter: &TagFilter,
        limit: Option<&str>,
        report: &mut RunReport,
    ) -> Result<()> {
        let (plan, targets) = self.prepare(play, filter, limit)?;
        self.execute(plan, targets, report).await;
        Ok(())
    }

    /// Validate a play and resolve its targets without touching any host.
    fn prepare(
        &self,
        play: &Play,
        filter: &TagFilter,
        limit: Option<&str>,
    ) -> Result<(Plan, Vec<Host>)> {
        let plan = plan::build(play, &self.registry, filter)?;
        self.validate_delegates(play)?;
        let targets = self.resolve_targets(play, limit)?;
        Ok((plan, targets))
    }

    #[instrument(skip_all, fields(play = %plan.play.name))]
    async fn execute(&self, plan: Plan, targets: Vec<Host>, report: &mut RunReport) {
        let mut active = targets;
        for host in &active {
            report.ensure_host(&host.name);
        }
        info!(hosts = active.len(), tasks = plan.tasks.len(), "starting play");

        let store = Mutex::new(VariableStore::new());
        let queue = HandlerQueue::new();
        let executor = TaskExecutor::new(
            self.inventory.clone(),
            self.registry.clone(),
            self.guard.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(self.forks));

        for task in &plan.tasks {
            if self.cancel.is_cancelled() {
                warn!("run cancelled, no further tasks scheduled");
                break;
            }
            if active.is_empty() {
                break;
            }
            if task.module == FLUSH_HANDLERS {
                self.flush(&plan, &queue, &executor, &store, &mut active, report, &semaphore)
                    .await;
                continue;
            }

            debug!(task = %task.display_name(), hosts = active.len(), "running task");
            let results = if task.run_once {
                self.run_collapsed(task, &active, &executor, &store, &plan, &queue)
                    .await
            } else {
                self.fan_out(task, &active, &executor, &store, &plan, &queue, &semaphore)
                    .await
            };

            active = self.absorb(task.display_name(), task.ignore_errors, &active, results, report);
        }

        if !self.cancel.is_cancelled() {
            self.flush(&plan, &queue, &executor, &store, &mut active, report, &semaphore)
                .await;
        }
    }

    /// Resolve the play's host pattern, intersected with the run limit.
    fn resolve_targets(&self, play: &Play, limit: Option<&str>) -> Result<Vec<Host>> {
        let mut hosts = self.inventory.resolve(&play.hosts)?;
        if let Some(limit) = limit {
            let allowed: HashSet<String> = self
                .inventory
                .resolve(limit)?
                .into_iter()
                .map(|h| h.name)
                .collect();
            hosts.retain(|h| allowed.contains(&h.name));
        }
        Ok(hosts)
    }

    /// Delegation targets must resolve before any host is touched.
    fn validate_delegates(&self, play: &Play) -> Result<()> {
        for task in &play.tasks {
            if let Some(delegate) = &task.delegate_to {
                if delegate != crate::delegation::LOCALHOST
                    && self.inventory.get_host(delegate).is_none()
                {
                    return Err(Error::UnknownDelegate(delegate.clone()));
                }
            }
        }
        Ok(())
    }

    /// Run one task concurrently across the active hosts, joined before
    /// returning. Result order follows host order.
    async fn fan_out(
        &self,
        task: &Task,
        active: &[Host],
        executor: &TaskExecutor,
        store: &Mutex<VariableStore>,
        plan: &Plan,
        queue: &HandlerQueue,
        semaphore: &Arc<Semaphore>,
    ) -> Vec<(String, TaskResult)> {
        let futures = active.iter().map(|host| {
            let semaphore = semaphore.clone();
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        executor
                            .run(task, host, store, &plan.play.vars, queue)
                            .await
                    }
                    Err(_) => TaskResult::failed("executor shut down"),
                };
                (host.name.clone(), result)
            }
        });
        join_all(futures).await
    }

    /// Run a `run_once` task on the first active host only; every other host
    /// records a fan-out skip at the same sequential position.
    async fn run_collapsed(
        &self,
        task: &Task,
        active: &[Host],
        executor: &TaskExecutor,
        store: &Mutex<VariableStore>,
        plan: &Plan,
        queue: &HandlerQueue,
    ) -> Vec<(String, TaskResult)> {
        let representative = match crate::delegation::representative(active) {
            Some(host) => host,
            None => return Vec::new(),
        };
        let result = executor
            .run(task, representative, store, &plan.play.vars, queue)
            .await;

        let mut results = vec![(representative.name.clone(), result)];
        for host in active.iter().skip(1) {
            results.push((
                host.name.clone(),
                TaskResult::fan_out_skipped(&representative.name),
            ));
        }
        results
    }

    /// Record results and drop hosts that failed out or became unreachable.
    fn absorb(
        &self,
        task_name: &str,
        ignore_errors: bool,
        active: &[Host],
        results: Vec<(String, TaskResult)>,
        report: &mut RunReport,
    ) -> Vec<Host> {
        let mut dropped: HashSet<String> = HashSet::new();
        for (host, result) in results {
            report.record(TaskRecord::new(&host, task_name, &result));
            if result.status == crate::tasks::TaskStatus::Unreachable {
                warn!(host = %host, "host unreachable, removed from play");
                dropped.insert(host);
            } else if result.is_failed() && !ignore_errors {
                warn!(host = %host, task = %task_name, "host failed, removed from play");
                dropped.insert(host);
            }
        }
        active
            .iter()
            .filter(|h| !dropped.contains(&h.name))
            .cloned()
            .collect()
    }

    /// Flush all pending handler notifications as a barrier.
    ///
    /// Handlers run in first-notified order, each against exactly the hosts
    /// that notified it and are still in the play.
    #[allow(clippy::too_many_arguments)]
    async fn flush(
        &self,
        plan: &Plan,
        queue: &HandlerQueue,
        executor: &TaskExecutor,
        store: &Mutex<VariableStore>,
        active: &mut Vec<Host>,
        report: &mut RunReport,
        semaphore: &Arc<Semaphore>,
    ) {
        for pending in queue.drain() {
            let handler = match plan.play.find_handler(&pending.name) {
                Some(handler) => handler,
                None => continue,
            };
            let handler_task = handler.as_task();
            let targets: Vec<Host> = active
                .iter()
                .filter(|h| pending.hosts.contains(&h.name))
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }
            debug!(handler = %pending.name, hosts = targets.len(), "flushing handler");
            let results = self
                .fan_out(&handler_task, &targets, executor, store, plan, queue, semaphore)
                .await;
            *active = self.absorb(&pending.name, false, active, results, report);
        }
    }
}
