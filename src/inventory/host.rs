//! Host definition for the Converge inventory.
//!
//! A `Host` is a managed node: an immutable identity plus connection
//! attributes and a host-scoped variable bag. Group memberships keep their
//! declared order because variable precedence breaks ties by it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A managed host in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host name (can be hostname, IP, or alias)
    pub name: String,

    /// Connection attributes (address, port, user, transport hints).
    /// Opaque to the engine; consumed by the transport layer.
    #[serde(default)]
    pub connection: IndexMap<String, JsonValue>,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,

    /// Groups this host belongs to, in declared order
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: IndexMap::new(),
            vars: IndexMap::new(),
            groups: Vec::new(),
        }
    }

    /// Create the reserved `localhost` host used by delegation
    pub fn localhost() -> Self {
        let mut host = Self::new("localhost");
        host.set_connection("transport", JsonValue::String("local".to_string()));
        host
    }

    /// Set a variable on this host (builder style)
    pub fn var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Add this host to a group (builder style)
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.add_to_group(group);
        self
    }

    /// Set a variable on this host
    pub fn set_var(&mut self, key: impl Into<String>, value: JsonValue) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this host
    pub fn get_var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    /// Check if the host has a specific variable
    pub fn has_var(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Set a connection attribute
    pub fn set_connection(&mut self, key: impl Into<String>, value: JsonValue) {
        self.connection.insert(key.into(), value);
    }

    /// Add this host to a group, preserving declared order
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }

    /// Check if the host belongs to a specific group (direct membership only)
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
