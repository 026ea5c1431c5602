//! # Converge - A Declarative Configuration-Management Execution Engine
//!
//! Converge applies desired-state tasks across a fleet of hosts: it resolves
//! per-host variables by precedence, builds an ordered task plan honoring
//! tag filters and conditionals, executes tasks with loop expansion,
//! delegation, and registered-result capture, and reacts to change events
//! through deduplicated handler flushes.
//!
//! ## Core Concepts
//!
//! - **Play**: one declarative unit binding a host pattern to an ordered
//!   task and handler list
//! - **Task**: one declared unit of desired-state work, optionally
//!   conditional, looped, delegated, tagged
//! - **Capability**: pluggable executor of one task's actual state-changing
//!   work, resolved by name through a registry
//! - **Handler**: a task runnable only via notification, deduplicated,
//!   deferred to a flush point
//! - **Registered variable**: a host-scoped variable holding a prior task's
//!   result for later reuse
//!
//! ## Scheduling
//!
//! Play-level barrier, host-level parallelism, task-level sequential per
//! host: all resolved hosts run a task concurrently (bounded by a fork
//! limit) and join before the next task starts. Handlers flush at explicit
//! flush points and at end of play, after every host has finished.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use converge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let inventory = Inventory::build(
//!         vec![Host::new("web1").group("webservers")],
//!         vec![Group::new("webservers").var("http_port", 80)],
//!     )?;
//!
//!     let playbook = Playbook::from_yaml(std::fs::read_to_string("site.yml")?.as_str())?;
//!
//!     let runner = PlayRunner::new(inventory, ModuleRegistry::with_builtins())
//!         .with_forks(10);
//!     let report = runner
//!         .run_playbook(&playbook, &TagFilter::all(), None)
//!         .await?;
//!
//!     for (host, summary) in &report.summaries {
//!         println!("{host}: ok={} changed={}", summary.ok, summary.changed);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod condition;
pub mod delegation;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod inventory;
pub mod loops;
pub mod modules;
pub mod plan;
pub mod playbook;
pub mod tasks;
pub mod vars;

pub use error::{Error, Result};

pub mod prelude {
    //! Convenient re-exports of the most commonly needed types.

    pub use crate::error::{Error, Result};
    pub use crate::executor::{PlayRunner, RunReport, TaskExecutor};
    pub use crate::handlers::HandlerQueue;
    pub use crate::inventory::{Group, Host, Inventory};
    pub use crate::modules::{Capability, CapabilityError, Invocation, ModuleRegistry};
    pub use crate::plan::TagFilter;
    pub use crate::playbook::{Play, Playbook};
    pub use crate::tasks::{Handler, Task, TaskResult, TaskStatus};
    pub use crate::vars::{Context, VariableStore};
}

/// Engine version, from the crate metadata.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_version_is_set() {
        assert!(!super::version().is_empty());
    }
}
