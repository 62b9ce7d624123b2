//! Markdown checklist for review material (`vtask pr`).

use crate::core::ready::blocker;
use crate::task::Task;

/// Render every task on the branch as a checklist, followed by dependency edges.
pub fn render_checklist(snapshot: &[Task], branch: &str) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("## Tasks (`{branch}`)\n\n"));
    if snapshot.is_empty() {
        buf.push_str("_No tasks._\n");
        return buf;
    }

    for task in snapshot {
        let mark = if task.is_done() { "x" } else { " " };
        buf.push_str(&format!(
            "- [{mark}] {} (`{}`)",
            single_line(&task.content),
            task.id
        ));
        if let Some(commit) = &task.closed_commit {
            buf.push_str(&format!(", closed in {}", short_commit(commit)));
        } else if let Some(dep) = blocker(snapshot, task) {
            buf.push_str(&format!(", blocked by `{}`", dep.id));
        }
        buf.push('\n');
    }

    let edges: Vec<(&str, &str)> = snapshot
        .iter()
        .filter_map(|task| task.after.as_deref().map(|after| (task.id.as_str(), after)))
        .collect();
    if !edges.is_empty() {
        buf.push_str("\n### Dependencies\n\n");
        for (id, after) in edges {
            buf.push_str(&format!("- `{id}` after `{after}`\n"));
        }
    }
    buf
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn short_commit(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}
