//! Capability system for Converge.
//!
//! A [`Capability`] is an opaque idempotent operation invoked with resolved
//! arguments against one host; it reports back whether it changed anything,
//! whether it failed, and any module-specific fields. The engine never
//! inspects what a capability does, only the contract it reports.

pub mod assert;
pub mod command;
pub mod debug;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::inventory::Host;
use crate::tasks::TaskResult;
use crate::vars::Context;

/// Errors a capability can raise.
///
/// `Unreachable` is a transport-level failure and is always fatal for the
/// host regardless of `ignore_errors`; `Failure` is an ordinary reported
/// failure subject to the usual bulkhead rules.
#[derive(Error, Debug)]
pub enum CapabilityError {
    /// The execution host could not be reached at all.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The capability ran and reported failure.
    #[error("{0}")]
    Failure(String),

    /// The arguments did not satisfy the capability's contract.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Everything a capability sees besides its arguments: the host it executes
/// on, the host the task is about, and the target-relative variable context.
pub struct Invocation<'a> {
    /// Host the capability executes on (the delegate, if any)
    pub host: &'a Host,
    /// Host the task is about; register and variable scope stay here
    pub target: &'a str,
    /// Merged variable context, target-relative
    pub ctx: &'a Context,
}

/// An idempotent operation the engine can invoke.
///
/// Implementations must converge: invoking twice with the same arguments
/// against the same state reports `changed` at most once.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry name tasks refer to
    fn name(&self) -> &'static str;

    /// Execute against one host with fully resolved arguments
    async fn invoke(
        &self,
        args: &IndexMap<String, JsonValue>,
        invocation: &Invocation<'_>,
    ) -> Result<TaskResult, CapabilityError>;
}

/// Predicate deciding whether a `creates`/`removes` guard path exists.
///
/// Injectable so tests can model convergence without touching a filesystem.
pub type GuardPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The default guard: filesystem existence on the control node.
pub fn fs_guard() -> GuardPredicate {
    Arc::new(|path: &str| Path::new(path).exists())
}

/// Name-keyed capability registry.
///
/// Lookup happens at plan-build time; an unknown module name rejects the
/// whole plan before any host is touched.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    capabilities: IndexMap<String, Arc<dyn Capability>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in capabilities
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(debug::DebugCapability));
        registry.register(Arc::new(assert::AssertCapability));
        registry.register(Arc::new(command::CommandCapability));
        registry
    }

    /// Register a capability under its name
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    /// Register a capability under an explicit name
    pub fn register_named(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.capabilities.insert(name.into(), capability);
    }

    /// Look up a capability by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Whether a capability is registered under this name
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Registered capability names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}
