//! Variable management and precedence for Converge.
//!
//! Variables live in scoped bags that merge into one read-only [`Context`]
//! per task evaluation. Precedence, highest wins:
//!
//! 1. task-local (loop item frame, registered results)
//! 2. host variables
//! 3. group variables, nearest ancestor first
//! 4. play-level variables
//! 5. engine defaults
//!
//! The merge is total: every lookup either resolves through this chain or is
//! undefined, and truthiness follows a fixed table (empty string, `0`,
//! `false`, null/undefined are false; everything else is true).

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::inventory::{Host, Inventory};

/// Variable precedence levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Scope {
    /// Engine-provided defaults (lowest priority)
    EngineDefaults = 1,
    /// Play-level variables
    PlayVars = 2,
    /// Group variables (nearest ancestor overrides farther)
    GroupVars = 3,
    /// Host variables
    HostVars = 4,
    /// Registered results and loop-item frames (highest priority)
    TaskLocal = 5,
}

impl Scope {
    /// All precedence levels in merge order (lowest to highest)
    pub fn all() -> impl Iterator<Item = Scope> {
        [
            Scope::EngineDefaults,
            Scope::PlayVars,
            Scope::GroupVars,
            Scope::HostVars,
            Scope::TaskLocal,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scope::EngineDefaults => "engine defaults",
            Scope::PlayVars => "play vars",
            Scope::GroupVars => "group vars",
            Scope::HostVars => "host vars",
            Scope::TaskLocal => "task-local",
        };
        write!(f, "{}", name)
    }
}

/// The fully merged, read-only variable context for one task evaluation.
///
/// Loop items are pushed as explicit frames on top of the merged base, never
/// as process-global state; a frame is popped when the iteration ends.
#[derive(Debug, Clone, Default)]
pub struct Context {
    base: IndexMap<String, JsonValue>,
    frames: Vec<IndexMap<String, JsonValue>>,
}

impl Context {
    /// Create a context from an already merged map
    pub fn from_map(base: IndexMap<String, JsonValue>) -> Self {
        Self {
            base,
            frames: Vec::new(),
        }
    }

    /// Push a task-local frame (e.g. a loop-item binding)
    pub fn push_frame(&mut self, frame: IndexMap<String, JsonValue>) {
        self.frames.push(frame);
    }

    /// Push a frame containing a single binding
    pub fn push_binding(&mut self, name: impl Into<String>, value: JsonValue) {
        let mut frame = IndexMap::new();
        frame.insert(name.into(), value);
        self.frames.push(frame);
    }

    /// Pop the most recent task-local frame
    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Look up a top-level variable by name, frames first
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value);
            }
        }
        self.base.get(name)
    }

    /// Look up a dotted path (e.g. `r.results.1.item`).
    ///
    /// Path segments index into maps by key and into lists by position.
    pub fn lookup(&self, path: &str) -> Option<&JsonValue> {
        let mut parts = path.split('.');
        let head = parts.next()?;
        let mut current = self.get(head)?;
        for part in parts {
            current = match current {
                JsonValue::Object(map) => map.get(part)?,
                JsonValue::Array(seq) => {
                    let index: usize = part.parse().ok()?;
                    seq.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Check whether a dotted path resolves
    pub fn is_defined(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Number of distinct top-level names visible in this context
    pub fn len(&self) -> usize {
        let mut names: Vec<&str> = self.base.keys().map(String::as_str).collect();
        for frame in &self.frames {
            for key in frame.keys() {
                if !names.contains(&key.as_str()) {
                    names.push(key);
                }
            }
        }
        names.len()
    }

    /// Check if the context is empty
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.frames.iter().all(IndexMap::is_empty)
    }
}

/// Truthiness per the engine's fixed coercion table.
///
/// Empty string, `0`, `false`, and null are false; everything else is true.
pub fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Holds engine defaults and host-scoped registered results, and produces
/// merged contexts.
///
/// Registered variables are written only by the owning host's executor and
/// are visible to subsequent tasks on that host for the remainder of the
/// play.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    defaults: IndexMap<String, JsonValue>,
    registered: HashMap<String, IndexMap<String, JsonValue>>,
}

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an engine default (lowest precedence)
    pub fn set_default(&mut self, key: impl Into<String>, value: JsonValue) {
        self.defaults.insert(key.into(), value);
    }

    /// Store a registered result, scoped to the given host
    pub fn set_registered(&mut self, host: &str, name: impl Into<String>, value: JsonValue) {
        self.registered
            .entry(host.to_string())
            .or_default()
            .insert(name.into(), value);
    }

    /// Get a registered value for a host
    pub fn get_registered(&self, host: &str, name: &str) -> Option<&JsonValue> {
        self.registered.get(host).and_then(|bag| bag.get(name))
    }

    /// Clear registered results (called at play start)
    pub fn reset_registered(&mut self) {
        self.registered.clear();
    }

    /// Produce the merged, read-only context for one task evaluation on one
    /// host.
    ///
    /// Scopes apply lowest to highest; within group vars, farther ancestors
    /// apply before nearer ones so the nearest wins. The engine injects
    /// `inventory_hostname` and `groups` at the defaults level.
    pub fn merge(
        &self,
        host: &Host,
        inventory: &Inventory,
        play_vars: &IndexMap<String, JsonValue>,
    ) -> Context {
        let mut merged = IndexMap::new();

        // Engine defaults
        for (key, value) in &self.defaults {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert(
            "inventory_hostname".to_string(),
            JsonValue::String(host.name.clone()),
        );
        merged.insert(
            "groups".to_string(),
            JsonValue::Array(
                inventory
                    .group_names_of(&host.name)
                    .iter()
                    .map(|g| JsonValue::String(g.clone()))
                    .collect(),
            ),
        );

        // Play vars
        for (key, value) in play_vars {
            merged.insert(key.clone(), value.clone());
        }

        // Group vars, farthest ancestor first so nearer overrides
        for group in inventory.groups_of(&host.name).iter().rev() {
            for (key, value) in &group.vars {
                merged.insert(key.clone(), value.clone());
            }
        }

        // Host vars
        for (key, value) in &host.vars {
            merged.insert(key.clone(), value.clone());
        }

        // Registered results, host-scoped
        if let Some(bag) = self.registered.get(&host.name) {
            for (key, value) in bag {
                merged.insert(key.clone(), value.clone());
            }
        }

        Context::from_map(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Group;
    use serde_json::json;

    fn inventory() -> Inventory {
        let hosts = vec![
            Host::new("web1").group("webservers").var("env", "staging"),
            Host::new("web2").group("webservers"),
        ];
        let groups = vec![
            Group::new("webservers").var("env", "group-level").var("port", 80),
            Group::new("prod").child("webservers").var("env", "prod"),
        ];
        Inventory::build(hosts, groups).unwrap()
    }

    #[test]
    fn test_precedence_host_over_group_over_play() {
        let inv = inventory();
        let store = VariableStore::new();
        let mut play_vars = IndexMap::new();
        play_vars.insert("env".to_string(), json!("play-level"));

        // web1 has a host var: it wins over everything below.
        let ctx = store.merge(inv.get_host("web1").unwrap(), &inv, &play_vars);
        assert_eq!(ctx.get("env"), Some(&json!("staging")));

        // web2 has no host var: the nearest group wins over play vars.
        let ctx = store.merge(inv.get_host("web2").unwrap(), &inv, &play_vars);
        assert_eq!(ctx.get("env"), Some(&json!("group-level")));
    }

    #[test]
    fn test_nearest_group_overrides_farther() {
        let inv = inventory();
        let store = VariableStore::new();
        let ctx = store.merge(inv.get_host("web2").unwrap(), &inv, &IndexMap::new());
        // "webservers" is nearer than its parent "prod".
        assert_eq!(ctx.get("env"), Some(&json!("group-level")));
        assert_eq!(ctx.get("port"), Some(&json!(80)));
    }

    #[test]
    fn test_registered_is_host_scoped() {
        let inv = inventory();
        let mut store = VariableStore::new();
        store.set_registered("web1", "r", json!({"changed": true}));

        let ctx1 = store.merge(inv.get_host("web1").unwrap(), &inv, &IndexMap::new());
        let ctx2 = store.merge(inv.get_host("web2").unwrap(), &inv, &IndexMap::new());
        assert!(ctx1.is_defined("r.changed"));
        assert!(!ctx2.is_defined("r"));

        store.reset_registered();
        let ctx1 = store.merge(inv.get_host("web1").unwrap(), &inv, &IndexMap::new());
        assert!(!ctx1.is_defined("r"));
    }

    #[test]
    fn test_engine_defaults_injected() {
        let inv = inventory();
        let store = VariableStore::new();
        let ctx = store.merge(inv.get_host("web1").unwrap(), &inv, &IndexMap::new());
        assert_eq!(ctx.get("inventory_hostname"), Some(&json!("web1")));
        assert_eq!(ctx.get("groups"), Some(&json!(["webservers", "prod"])));
    }

    #[test]
    fn test_frames_shadow_base() {
        let mut base = IndexMap::new();
        base.insert("item".to_string(), json!("base"));
        let mut ctx = Context::from_map(base);
        assert_eq!(ctx.get("item"), Some(&json!("base")));

        ctx.push_binding("item", json!("frame"));
        assert_eq!(ctx.get("item"), Some(&json!("frame")));
        ctx.pop_frame();
        assert_eq!(ctx.get("item"), Some(&json!("base")));
    }

    #[test]
    fn test_dotted_lookup() {
        let mut base = IndexMap::new();
        base.insert("r".to_string(), json!({"results": [{"item": 80}, {"item": 443}]}));
        let ctx = Context::from_map(base);
        assert_eq!(ctx.lookup("r.results.1.item"), Some(&json!(443)));
        assert!(ctx.lookup("r.results.2").is_none());
        assert!(!ctx.is_defined("r.nope"));
    }

    #[test]
    fn test_truthiness_table() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("no")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }
}
