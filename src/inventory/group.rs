//! Group definition for the Converge inventory.
//!
//! A `Group` is a named collection of hosts with its own variable bag and
//! child groups. The child relation forms a tree (cycles are rejected at
//! inventory load), and a host's effective group variables are the union of
//! all ancestor bags with nearer groups overriding farther ones.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A group of hosts in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Host names directly belonging to this group, in declared order
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Child group names, in declared order
    #[serde(default)]
    pub children: Vec<String>,

    /// Group-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
}

impl Group {
    /// Create a new group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: Vec::new(),
            children: Vec::new(),
            vars: IndexMap::new(),
        }
    }

    /// Add a host to this group (builder style)
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.add_host(host);
        self
    }

    /// Add a child group (builder style)
    pub fn child(mut self, child: impl Into<String>) -> Self {
        self.add_child(child);
        self
    }

    /// Set a variable on this group (builder style)
    pub fn var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Add a host to this group, preserving declared order
    pub fn add_host(&mut self, host: impl Into<String>) {
        let host = host.into();
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }

    /// Add a child group, preserving declared order
    pub fn add_child(&mut self, child: impl Into<String>) {
        let child = child.into();
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    /// Check if a host directly belongs to this group
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// Check if a group is a direct child of this group
    pub fn has_child(&self, child: &str) -> bool {
        self.children.iter().any(|c| c == child)
    }

    /// Get a variable from this group
    pub fn get_var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Group {}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} hosts", self.name, self.hosts.len())?;
        if !self.children.is_empty() {
            write!(f, ", {} children", self.children.len())?;
        }
        write!(f, ")")
    }
}
