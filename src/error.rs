//! Error types for Converge.
//!
//! This module defines the error taxonomy used throughout the engine. The
//! variants split along the propagation boundaries the runner cares about:
//! configuration errors (`UnknownHandler`, `UnknownModule`, `UnknownPattern`,
//! `InventoryCycle`) abort a run before any host is touched, while
//! `Unreachable` and `ModuleFailure` are scoped to a single host and play.

use thiserror::Error;

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Converge.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors (fatal at plan-build time)
    // ========================================================================
    /// A `notify` entry references a handler that does not exist in the play.
    #[error("Task '{task}' notifies unknown handler '{handler}'")]
    UnknownHandler {
        /// Task name
        task: String,
        /// Handler name that could not be resolved
        handler: String,
    },

    /// A task references a module that is not present in the registry.
    #[error("Module '{0}' not found in registry")]
    UnknownModule(String),

    /// A host pattern matched nothing and is not wildcarded.
    #[error("Host pattern '{0}' matched no hosts or groups")]
    UnknownPattern(String),

    /// Group inheritance forms a cycle.
    #[error("Inventory group cycle detected involving '{0}'")]
    InventoryCycle(String),

    /// A `delegate_to` target could not be resolved.
    #[error("Delegation target '{0}' is not resolvable in the inventory")]
    UnknownDelegate(String),

    // ========================================================================
    // Host-scoped execution errors
    // ========================================================================
    /// Transport-level failure; always fatal for that host, that play.
    #[error("Host '{host}' unreachable: {message}")]
    Unreachable {
        /// Target host
        host: String,
        /// Transport error description
        message: String,
    },

    /// A capability reported `failed: true` and the failure was not ignorable.
    #[error("Module '{module}' failed on host '{host}': {message}")]
    ModuleFailure {
        /// Module name
        module: String,
        /// Target host
        host: String,
        /// Failure message from the capability
        message: String,
    },

    // ========================================================================
    // Evaluation errors
    // ========================================================================
    /// A variable lookup failed during expression or argument evaluation.
    #[error("Undefined variable: '{0}'")]
    UndefinedVariable(String),

    /// An expression could not be parsed.
    #[error("Failed to parse expression '{expr}': {message}")]
    ConditionParse {
        /// The offending expression text
        expr: String,
        /// Parser diagnostic
        message: String,
    },

    /// An expression parsed but could not be evaluated.
    #[error("Failed to evaluate expression '{expr}': {message}")]
    ConditionEval {
        /// The offending expression text
        expr: String,
        /// Evaluator diagnostic
        message: String,
    },

    /// A loop source did not evaluate to a list or map.
    #[error("Loop source for task '{task}' is not a list: {message}")]
    LoopSource {
        /// Task name
        task: String,
        /// Diagnostic
        message: String,
    },

    // ========================================================================
    // Parsing and IO
    // ========================================================================
    /// Error validating playbook structure.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new unknown-handler error.
    pub fn unknown_handler(task: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::UnknownHandler {
            task: task.into(),
            handler: handler.into(),
        }
    }

    /// Creates a new unreachable error.
    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new module failure error.
    pub fn module_failure(
        module: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ModuleFailure {
            module: module.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new condition parse error.
    pub fn condition_parse(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConditionParse {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Creates a new condition evaluation error.
    pub fn condition_eval(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConditionEval {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Creates a new loop source error.
    pub fn loop_source(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoopSource {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is a plan-time configuration error that
    /// should abort the run before any host is touched.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownHandler { .. }
                | Error::UnknownModule(_)
                | Error::UnknownPattern(_)
                | Error::InventoryCycle(_)
                | Error::UnknownDelegate(_)
                | Error::PlaybookValidation(_)
        )
    }
}
