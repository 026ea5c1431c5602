//! Delegation and run-once resolution.
//!
//! `delegate_to` separates where a task executes from which host it is
//! about: the capability runs against the delegate while the variable
//! context, register scope, and result attribution stay with the target
//! host. `run_once` collapses fan-out to one representative host per task.

use crate::error::{Error, Result};
use crate::inventory::{Host, Inventory};
use crate::tasks::Task;

/// The host name reserved for control-node execution. It resolves even when
/// absent from the inventory.
pub const LOCALHOST: &str = "localhost";

/// Resolve the host a task actually executes on, given its target host.
///
/// Without `delegate_to` this is the target itself. `localhost` always
/// resolves; any other delegate must exist in the inventory or the plan is
/// rejected with [`Error::UnknownDelegate`].
pub fn resolve_execution_host(
    task: &Task,
    target: &Host,
    inventory: &Inventory,
) -> Result<Host> {
    let delegate = match &task.delegate_to {
        Some(delegate) => delegate,
        None => return Ok(target.clone()),
    };

    if let Some(host) = inventory.get_host(delegate) {
        return Ok(host.clone());
    }
    if delegate == LOCALHOST {
        return Ok(Host::localhost());
    }
    Err(Error::UnknownDelegate(delegate.clone()))
}

/// The representative host for a `run_once` task: the first host in the
/// resolved, still-active fan-out order.
pub fn representative<'a>(active_hosts: &'a [Host]) -> Option<&'a Host> {
    active_hosts.first()
}
