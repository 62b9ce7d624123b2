//! Frozen-field checks between an observed snapshot and its replacement.

use std::collections::HashMap;

use crate::task::{Status, Task};

/// Validate that a guarded write only made forward-only changes.
///
/// For each task in `prev`, this check enforces:
/// - The task still exists in `next`.
/// - `id`, `content`, `created_at`, `created_by` and `after` are unchanged.
/// - `prev.notes` is a prefix of `next.notes`.
/// - Status did not move from `done` back to `pending`.
/// - `closed_at` and `closed_commit` were not altered once set.
///
/// Returns a list of stable error messages (sorted by task id).
pub fn check_task_immutability(prev: &[Task], next: &[Task]) -> Vec<String> {
    let next_index: HashMap<&str, &Task> =
        next.iter().map(|task| (task.id.as_str(), task)).collect();

    let mut ordered: Vec<&Task> = prev.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let mut errors = Vec::new();
    for before in ordered {
        let Some(after) = next_index.get(before.id.as_str()) else {
            errors.push(format!("task '{}' missing in next snapshot", before.id));
            continue;
        };
        if before.content != after.content
            || before.created_at != after.created_at
            || before.created_by != after.created_by
            || before.after != after.after
        {
            errors.push(format!("task '{}' changed frozen fields", before.id));
        }
        if !after.notes.starts_with(&before.notes) {
            errors.push(format!("task '{}' rewrote existing notes", before.id));
        }
        if before.status == Status::Done && after.status == Status::Pending {
            errors.push(format!("task '{}' reopened", before.id));
        }
        if before.closed_at.is_some() && before.closed_at != after.closed_at {
            errors.push(format!("task '{}' changed closed_at", before.id));
        }
        if before.closed_commit.is_some() && before.closed_commit != after.closed_commit {
            errors.push(format!("task '{}' changed closed_commit", before.id));
        }
    }

    errors
}
