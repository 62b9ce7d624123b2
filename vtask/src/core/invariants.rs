//! Semantic invariants a decoded snapshot must satisfy.

use std::collections::HashSet;

use crate::task::Task;

/// Check snapshot-level invariants:
/// - Ids are non-empty and unique
/// - Pending tasks carry no `closed_at`/`closed_commit`
/// - No task lists itself in `after`
pub fn validate_invariants(snapshot: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, task) in snapshot.iter().enumerate() {
        let label = if task.id.is_empty() {
            format!("record {}", index + 1)
        } else {
            format!("'{}'", task.id)
        };
        if task.id.trim().is_empty() {
            errors.push(format!("{label}: empty id"));
        } else if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate id '{}'", task.id));
        }
        if !task.is_done() && task.closed_at.is_some() {
            errors.push(format!("{label}: pending task has closed_at"));
        }
        if !task.is_done() && task.closed_commit.is_some() {
            errors.push(format!("{label}: pending task has closed_commit"));
        }
        if task.after.as_deref() == Some(task.id.as_str()) {
            errors.push(format!("{label}: task depends on itself"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{done_task, task, task_after};

    #[test]
    fn valid_snapshot_has_no_errors() {
        let snapshot = vec![done_task("aaaaaa", "a"), task_after("bbbbbb", "b", "aaaaaa")];
        assert!(validate_invariants(&snapshot).is_empty());
    }

    #[test]
    fn reports_each_violation() {
        let mut pending_closed = task("cccccc", "c");
        pending_closed.closed_commit = Some("deadbeef".to_string());
        let snapshot = vec![
            task("aaaaaa", "a"),
            task("aaaaaa", "dup"),
            task_after("bbbbbb", "self", "bbbbbb"),
            pending_closed,
        ];
        let errors = validate_invariants(&snapshot);
        assert!(errors.iter().any(|err| err.contains("duplicate id 'aaaaaa'")));
        assert!(errors.iter().any(|err| err.contains("depends on itself")));
        assert!(errors.iter().any(|err| err.contains("closed_commit")));
    }
}
