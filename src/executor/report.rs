//! Run reporting.
//!
//! Every host's outcome is enumerated even when it failed early; partial
//! success is a first-class reportable outcome. Records are appended in
//! completion order within a task and declaration order across tasks.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::tasks::{TaskResult, TaskStatus};

/// One per-host, per-task outcome line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Target host the task was about
    pub host: String,
    /// Task display name
    pub task: String,
    /// Final status
    pub status: TaskStatus,
    /// Whether the task changed anything
    pub changed: bool,
    /// Whether the task failed
    pub failed: bool,
    /// Whether the task was skipped
    pub skipped: bool,
    /// Message, if any
    pub msg: Option<String>,
}

impl TaskRecord {
    /// Build a record from a task result
    pub fn new(host: impl Into<String>, task: impl Into<String>, result: &TaskResult) -> Self {
        Self {
            host: host.into(),
            task: task.into(),
            status: result.status,
            changed: result.changed,
            failed: result.is_failed(),
            skipped: result.is_skipped(),
            msg: result.msg.clone(),
        }
    }
}

/// Per-host outcome counters, Ansible recap style.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HostSummary {
    /// Tasks that completed without change
    pub ok: usize,
    /// Tasks that reported a change
    pub changed: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Tasks skipped on this host (including fan-out skips)
    pub skipped: usize,
    /// Unreachable outcomes
    pub unreachable: usize,
}

impl HostSummary {
    fn absorb(&mut self, record: &TaskRecord) {
        match record.status {
            TaskStatus::Ok => self.ok += 1,
            TaskStatus::Changed => self.changed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Skipped | TaskStatus::FanOutSkipped => self.skipped += 1,
            TaskStatus::Unreachable => self.unreachable += 1,
        }
    }

    /// Whether the host finished the run without failing out
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.unreachable == 0
    }
}

/// The ordered result log for one engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// All task records in execution order
    pub records: Vec<TaskRecord>,
    /// Per-host recap, in inventory resolution order
    pub summaries: IndexMap<String, HostSummary>,
}

impl RunReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a host appears in the recap even if no task ran on it
    pub fn ensure_host(&mut self, host: &str) {
        self.summaries.entry(host.to_string()).or_default();
    }

    /// Append one record and fold it into the host's recap
    pub fn record(&mut self, record: TaskRecord) {
        self.summaries
            .entry(record.host.clone())
            .or_default()
            .absorb(&record);
        self.records.push(record);
    }

    /// Records for one host, in execution order
    pub fn records_for(&self, host: &str) -> Vec<&TaskRecord> {
        self.records.iter().filter(|r| r.host == host).collect()
    }

    /// Records for one task name, across hosts
    pub fn records_for_task(&self, task: &str) -> Vec<&TaskRecord> {
        self.records.iter().filter(|r| r.task == task).collect()
    }

    /// Total changed count across all hosts
    pub fn total_changed(&self) -> usize {
        self.summaries.values().map(|s| s.changed).sum()
    }

    /// Whether any host failed or was unreachable
    pub fn has_failures(&self) -> bool {
        self.summaries.values().any(|s| !s.succeeded())
    }
}
