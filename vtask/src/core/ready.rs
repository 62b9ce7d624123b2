//! Dependency resolution over a snapshot.

use std::collections::HashSet;

use crate::task::{Status, Task, find};

/// Pending tasks whose `after` dependency is absent, deleted, or done.
///
/// Snapshot order is creation order, so the result is FIFO.
pub fn ready(snapshot: &[Task]) -> Vec<&Task> {
    snapshot
        .iter()
        .filter(|task| task.status == Status::Pending && blocker(snapshot, task).is_none())
        .collect()
}

/// The dependency still holding `task` back, if any.
///
/// A dependency that no longer exists never blocks.
pub fn blocker<'a>(snapshot: &'a [Task], task: &Task) -> Option<&'a Task> {
    let after = task.after.as_deref()?;
    find(snapshot, after).filter(|dep| !dep.is_done())
}

/// Result of picking the next task for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<'a> {
    /// Nothing is ready.
    AllDone,
    /// Tasks are ready but every one of them is soft-skipped.
    NoEligibleWork,
    Selected(&'a Task),
}

/// Pick the earliest-created ready task not in `skipped`.
pub fn select_next<'a>(snapshot: &'a [Task], skipped: &HashSet<String>) -> Selection<'a> {
    let candidates = ready(snapshot);
    if candidates.is_empty() {
        return Selection::AllDone;
    }
    match candidates
        .into_iter()
        .find(|task| !skipped.contains(&task.id))
    {
        Some(task) => Selection::Selected(task),
        None => Selection::NoEligibleWork,
    }
}
