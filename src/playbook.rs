//! Play and playbook definitions.
//!
//! A [`Play`] binds a host pattern to an ordered task list, an ordered
//! handler list, and play-level variables. Plays are parsed once and never
//! mutated during execution; results live in the variable store.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::tasks::{Handler, Task};

/// One declarative unit binding a host pattern to tasks and handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    /// Play name
    #[serde(default)]
    pub name: String,
    /// Host pattern resolved against the inventory
    pub hosts: String,
    /// Play-level variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
    /// Ordered task list
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Ordered handler list
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

impl Play {
    /// Create a new play targeting the given host pattern
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            vars: IndexMap::new(),
            tasks: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Set a play-level variable
    pub fn var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Append a task
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Append a handler
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Find a handler by its notification name
    pub fn find_handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Parse a single play from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// An ordered list of plays executed in sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Playbook {
    /// Plays in execution order
    pub plays: Vec<Play>,
}

impl Playbook {
    /// Create an empty playbook
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a play
    pub fn play(mut self, play: Play) -> Self {
        self.plays.push(play);
        self
    }

    /// Parse a playbook (a YAML sequence of plays) from text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_playbook_from_yaml() {
        let yaml = r#"
- name: configure webservers
  hosts: webservers
  vars:
    http_port: 8080
  tasks:
    - name: install nginx
      module: package
      args:
        name: nginx
        state: present
      notify: [restart nginx]
  handlers:
    - name: restart nginx
      module: service
      args:
        name: nginx
        state: restarted
"#;
        let playbook = Playbook::from_yaml(yaml).unwrap();
        assert_eq!(playbook.plays.len(), 1);
        let play = &playbook.plays[0];
        assert_eq!(play.hosts, "webservers");
        assert_eq!(play.vars.get("http_port"), Some(&json!(8080)));
        assert_eq!(play.tasks.len(), 1);
        assert!(play.find_handler("restart nginx").is_some());
    }

    #[test]
    fn test_play_builder() {
        let play = Play::new("p", "all")
            .var("env", "prod")
            .task(Task::new("t", "debug"))
            .handler(Handler::new("h", "debug"));
        assert_eq!(play.tasks.len(), 1);
        assert!(play.find_handler("h").is_some());
        assert!(play.find_handler("missing").is_none());
    }
}
