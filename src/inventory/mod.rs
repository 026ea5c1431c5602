//! Host and group inventory for Converge.
//!
//! The inventory holds the Host/Group graph and resolves host patterns to
//! concrete host sets. Group inheritance is validated to be acyclic at load
//! time, and each host's ancestor group list (nearest first) is precomputed
//! so variable merging never walks the graph per lookup.
//!
//! Pattern syntax, composed left-to-right:
//!
//! - `all` — every host (may be empty without error)
//! - a host or group name — must match, otherwise [`Error::UnknownPattern`]
//! - `~regex` — hosts whose name matches the regex (zero matches allowed)
//! - `a:b` — union, `a:&b` — intersection, `a:!b` — exclusion

pub mod group;
pub mod host;

pub use group::Group;
pub use host::Host;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};

/// The resolved Host/Group graph.
///
/// Built once from hosts and groups, then read-only for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
    /// Precomputed ancestor group names per host, nearest first.
    ancestors: HashMap<String, Vec<String>>,
}

impl Inventory {
    /// Build an inventory from hosts and groups.
    ///
    /// Wires up memberships declared on either side (a host naming its groups
    /// or a group naming its hosts), rejects inheritance cycles, and
    /// precomputes the nearest-first ancestor list for every host.
    pub fn build(hosts: Vec<Host>, groups: Vec<Group>) -> Result<Self> {
        let mut inventory = Self {
            hosts: hosts.into_iter().map(|h| (h.name.clone(), h)).collect(),
            groups: groups.into_iter().map(|g| (g.name.clone(), g)).collect(),
            ancestors: HashMap::new(),
        };

        // Mirror group-side membership onto the hosts.
        let memberships: Vec<(String, String)> = inventory
            .groups
            .values()
            .flat_map(|g| g.hosts.iter().map(|h| (h.clone(), g.name.clone())))
            .collect();
        for (host, group) in memberships {
            if let Some(h) = inventory.hosts.get_mut(&host) {
                h.add_to_group(group);
            }
        }
        // And host-side membership onto the groups.
        let declared: Vec<(String, String)> = inventory
            .hosts
            .values()
            .flat_map(|h| h.groups.iter().map(|g| (g.clone(), h.name.clone())))
            .collect();
        for (group, host) in declared {
            inventory
                .groups
                .entry(group.clone())
                .or_insert_with(|| Group::new(group))
                .add_host(host);
        }

        inventory.check_cycles()?;
        inventory.compute_ancestors();

        debug!(
            hosts = inventory.hosts.len(),
            groups = inventory.groups.len(),
            "inventory built"
        );
        Ok(inventory)
    }

    /// Reject cycles in the group child relation (DFS with a visiting set).
    fn check_cycles(&self) -> Result<()> {
        fn visit(
            name: &str,
            groups: &IndexMap<String, Group>,
            visiting: &mut HashSet<String>,
            done: &mut HashSet<String>,
        ) -> Result<()> {
            if done.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name.to_string()) {
                return Err(Error::InventoryCycle(name.to_string()));
            }
            if let Some(group) = groups.get(name) {
                for child in &group.children {
                    visit(child, groups, visiting, done)?;
                }
            }
            visiting.remove(name);
            done.insert(name.to_string());
            Ok(())
        }

        let mut done = HashSet::new();
        for name in self.groups.keys() {
            visit(name, &self.groups, &mut HashSet::new(), &mut done)?;
        }
        Ok(())
    }

    /// Precompute each host's ancestor groups, nearest first.
    ///
    /// Breadth-first from the host's direct groups in declared order, then
    /// each level of parents; the first occurrence of a group wins, which
    /// encodes both "nearer overrides farther" and the declared-order
    /// tie-break for variable precedence.
    fn compute_ancestors(&mut self) {
        // Reverse edge: group -> parents, in inventory declaration order.
        let mut parents: HashMap<&str, Vec<&str>> = HashMap::new();
        for group in self.groups.values() {
            for child in &group.children {
                parents
                    .entry(child.as_str())
                    .or_default()
                    .push(group.name.as_str());
            }
        }

        let mut ancestors = HashMap::new();
        for host in self.hosts.values() {
            let mut order: Vec<String> = Vec::new();
            let mut frontier: Vec<&str> = host.groups.iter().map(String::as_str).collect();
            while !frontier.is_empty() {
                let mut next = Vec::new();
                for name in frontier {
                    if order.iter().any(|g| g == name) {
                        continue;
                    }
                    order.push(name.to_string());
                    if let Some(ps) = parents.get(name) {
                        next.extend(ps.iter().copied());
                    }
                }
                frontier = next;
            }
            ancestors.insert(host.name.clone(), order);
        }
        self.ancestors = ancestors;
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a group by name
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All hosts in declaration order
    pub fn all_hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Ancestor groups of a host, nearest first.
    pub fn groups_of(&self, host: &str) -> Vec<&Group> {
        self.ancestors
            .get(host)
            .into_iter()
            .flatten()
            .filter_map(|name| self.groups.get(name))
            .collect()
    }

    /// Ancestor group names of a host, nearest first.
    pub fn group_names_of(&self, host: &str) -> &[String] {
        self.ancestors.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All hosts reachable from a group, descending through children.
    fn group_members(&self, name: &str) -> Vec<String> {
        let mut members = Vec::new();
        let mut stack = vec![name];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.to_string()) {
                continue;
            }
            if let Some(group) = self.groups.get(current) {
                for host in &group.hosts {
                    if !members.contains(host) {
                        members.push(host.clone());
                    }
                }
                for child in &group.children {
                    stack.push(child);
                }
            }
        }
        members
    }

    /// Resolve a host pattern to the concrete host set.
    ///
    /// Terms compose left-to-right; the result preserves inventory
    /// declaration order regardless of term order.
    pub fn resolve(&self, pattern: &str) -> Result<Vec<Host>> {
        let mut selected: HashSet<String> = HashSet::new();

        for (op, term) in split_pattern(pattern) {
            let matched = self.match_term(term)?;
            match op {
                PatternOp::Union => selected.extend(matched),
                PatternOp::Intersect => {
                    let keep: HashSet<String> = matched.into_iter().collect();
                    selected.retain(|h| keep.contains(h));
                }
                PatternOp::Exclude => {
                    for host in matched {
                        selected.remove(&host);
                    }
                }
            }
        }

        Ok(self
            .hosts
            .values()
            .filter(|h| selected.contains(&h.name))
            .cloned()
            .collect())
    }

    /// Match one pattern term to host names.
    fn match_term(&self, term: &str) -> Result<Vec<String>> {
        let term = term.trim();
        if term == "all" || term == "*" {
            return Ok(self.hosts.keys().cloned().collect());
        }
        if let Some(pattern) = term.strip_prefix('~') {
            let re = regex::Regex::new(pattern).map_err(|e| {
                Error::UnknownPattern(format!("{term} (invalid regex: {e})"))
            })?;
            return Ok(self
                .hosts
                .keys()
                .filter(|name| re.is_match(name))
                .cloned()
                .collect());
        }
        if self.hosts.contains_key(term) {
            return Ok(vec![term.to_string()]);
        }
        if self.groups.contains_key(term) {
            return Ok(self.group_members(term));
        }
        Err(Error::UnknownPattern(term.to_string()))
    }
}

/// Set operator joining pattern terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternOp {
    Union,
    Intersect,
    Exclude,
}

/// Split a pattern into (operator, term) pairs, left-to-right.
fn split_pattern(pattern: &str) -> Vec<(PatternOp, &str)> {
    let mut terms = Vec::new();
    let mut op = PatternOp::Union;
    let mut start = 0;
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            terms.push((op, &pattern[start..i]));
            if i + 1 < bytes.len() && bytes[i + 1] == b'&' {
                op = PatternOp::Intersect;
                i += 2;
            } else if i + 1 < bytes.len() && bytes[i + 1] == b'!' {
                op = PatternOp::Exclude;
                i += 2;
            } else {
                op = PatternOp::Union;
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    terms.push((op, &pattern[start..]));
    terms.retain(|(_, t)| !t.trim().is_empty());
    terms
}
