//! Plan building: validation and tag filtering.
//!
//! A play becomes an executable plan in two steps. Validation first: every
//! module reference and every `notify` target must resolve, whether or not
//! tag filtering would later drop the task, so a bad reference fails the run
//! before any host is touched. Filtering second: the tag filter selects the
//! task subset that will actually execute.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::handlers::FLUSH_HANDLERS;
use crate::modules::ModuleRegistry;
use crate::playbook::Play;
use crate::tasks::Task;

/// The reserved tag that opts a task in regardless of the include filter.
pub const TAG_ALWAYS: &str = "always";
/// The reserved tag that opts a task out unless explicitly requested.
pub const TAG_NEVER: &str = "never";

/// Include/exclude tag selection for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagFilter {
    /// Run only tasks carrying one of these tags (empty selects all)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Skip tasks carrying one of these tags
    #[serde(default)]
    pub skip_tags: Vec<String>,
}

impl TagFilter {
    /// A filter that selects every task
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter down to tasks carrying any of the given tags
    pub fn only(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            skip_tags: Vec::new(),
        }
    }

    /// Add a skip tag
    pub fn skip(mut self, tag: impl Into<String>) -> Self {
        self.skip_tags.push(tag.into());
        self
    }

    /// Decide whether a task with the given tags is part of the plan.
    ///
    /// `always` opts in regardless of the include list and survives skip
    /// tags unless `always` itself is skipped; `never` opts out unless one
    /// of the task's tags is explicitly requested.
    pub fn should_run(&self, task_tags: &[String]) -> bool {
        let has = |name: &str| task_tags.iter().any(|t| t == name);
        let requested = |tags: &[String]| task_tags.iter().any(|t| tags.contains(t));

        if has(TAG_ALWAYS) {
            return !self.skip_tags.iter().any(|t| t == TAG_ALWAYS);
        }
        if requested(&self.skip_tags) {
            return false;
        }
        if has(TAG_NEVER) {
            return requested(&self.tags);
        }
        if self.tags.is_empty() {
            return true;
        }
        requested(&self.tags)
    }
}

/// An executable plan: the validated play with its task list reduced to the
/// tag selection.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The validated play, handlers included
    pub play: Play,
    /// Tasks that survived tag filtering, in declaration order
    pub tasks: Vec<Task>,
}

/// Validate a play against a registry and reduce it to a plan.
pub fn build(play: &Play, registry: &ModuleRegistry, filter: &TagFilter) -> Result<Plan> {
    // Validation covers all declared tasks, filtered or not.
    for task in &play.tasks {
        if task.module != FLUSH_HANDLERS && !registry.contains(&task.module) {
            return Err(Error::UnknownModule(task.module.clone()));
        }
        for handler in &task.notify {
            if play.find_handler(handler).is_none() {
                return Err(Error::unknown_handler(task.display_name(), handler));
            }
        }
    }
    for handler in &play.handlers {
        if !registry.contains(&handler.module) {
            return Err(Error::UnknownModule(handler.module.clone()));
        }
    }

    let tasks = play
        .tasks
        .iter()
        .filter(|task| filter.should_run(&task.tags))
        .cloned()
        .collect();

    Ok(Plan {
        play: play.clone(),
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Handler;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_selects_all_but_never() {
        let filter = TagFilter::all();
        assert!(filter.should_run(&tags(&[])));
        assert!(filter.should_run(&tags(&["network"])));
        assert!(!filter.should_run(&tags(&["never"])));
        assert!(filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_include_filter_intersects() {
        let filter = TagFilter::only(["network"]);
        assert!(filter.should_run(&tags(&["network", "firewall"])));
        assert!(!filter.should_run(&tags(&["packages"])));
        assert!(!filter.should_run(&tags(&[])));
        // always opts in regardless of the include list
        assert!(filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_never_requires_explicit_request() {
        assert!(!TagFilter::all().should_run(&tags(&["never", "danger"])));
        assert!(TagFilter::only(["danger"]).should_run(&tags(&["never", "danger"])));
        assert!(TagFilter::only(["never"]).should_run(&tags(&["never"])));
    }

    #[test]
    fn test_always_survives_skip_of_other_tags() {
        let filter = TagFilter::all().skip("slow");
        assert!(filter.should_run(&tags(&["always", "slow"])));
        assert!(!filter.should_run(&tags(&["slow"])));
    }

    #[test]
    fn test_always_skippable_only_explicitly() {
        let filter = TagFilter::all().skip("always");
        assert!(!filter.should_run(&tags(&["always"])));
        assert!(!filter.should_run(&tags(&["always", "network"])));
    }

    #[test]
    fn test_unknown_module_rejected_even_when_filtered_out() {
        let registry = ModuleRegistry::with_builtins();
        let play = Play::new("p", "all").task(
            Task::new("bad", "ghost_module").tag("never"),
        );
        let err = build(&play, &registry, &TagFilter::all()).unwrap_err();
        assert!(matches!(err, Error::UnknownModule(name) if name == "ghost_module"));
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let registry = ModuleRegistry::with_builtins();
        let play = Play::new("p", "all")
            .task(Task::new("t", "debug").notify("missing handler"));
        let err = build(&play, &registry, &TagFilter::all()).unwrap_err();
        assert!(matches!(err, Error::UnknownHandler { .. }));
    }

    #[test]
    fn test_flush_handlers_is_reserved() {
        let registry = ModuleRegistry::with_builtins();
        let play = Play::new("p", "all")
            .task(Task::new("flush now", FLUSH_HANDLERS))
            .handler(Handler::new("h", "debug"));
        let plan = build(&play, &registry, &TagFilter::all()).unwrap();
        assert_eq!(plan.tasks.len(), 1);
    }

    #[test]
    fn test_filter_preserves_declaration_order() {
        let registry = ModuleRegistry::with_builtins();
        let play = Play::new("p", "all")
            .task(Task::new("a", "debug").tag("x"))
            .task(Task::new("b", "debug"))
            .task(Task::new("c", "debug").tag("x"));
        let plan = build(&play, &registry, &TagFilter::only(["x"])).unwrap();
        let names: Vec<&str> = plan.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
