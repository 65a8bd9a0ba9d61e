//! Capability matching strategies.

use crate::Task;
use std::collections::BTreeSet;
use std::fmt::Debug;

/// Decides whether a worker's capabilities cover a task.
pub trait CapabilityMatcher: Debug + Send + Sync {
    fn matches(&self, task: &Task, capabilities: &BTreeSet<String>) -> bool;
}

/// Case-insensitive free-text matching.
///
/// A capability matches when it equals the task kind, or when it occurs
/// anywhere inside the kind or the description. This is the default and
/// it is fragile: a capability named `"test"` also matches a description
/// mentioning `"latest"`. Use [`ExactTagMatcher`] when kinds are a closed
/// vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl CapabilityMatcher for SubstringMatcher {
    fn matches(&self, task: &Task, capabilities: &BTreeSet<String>) -> bool {
        let kind = task.kind.to_lowercase();
        let description = task.description.to_lowercase();

        capabilities
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .any(|c| kind.contains(&c) || description.contains(&c))
    }
}

/// Matches only when the task kind is one of the capabilities verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactTagMatcher;

impl CapabilityMatcher for ExactTagMatcher {
    fn matches(&self, task: &Task, capabilities: &BTreeSet<String>) -> bool {
        capabilities.contains(&task.kind)
    }
}
