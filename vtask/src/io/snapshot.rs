//! Snapshot encoding: one JSON task record per line.

use anyhow::{Context, Result, anyhow};

use crate::core::invariants::validate_invariants;
use crate::task::Task;

/// Encode tasks in order, one record per line, with a trailing newline.
pub fn encode_snapshot(tasks: &[Task]) -> Result<String> {
    let mut buf = String::new();
    for task in tasks {
        let line = serde_json::to_string(task)
            .with_context(|| format!("serialize task {}", task.id))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    Ok(buf)
}

/// Decode a snapshot and check its invariants. Blank lines are ignored.
pub fn decode_snapshot(contents: &str) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let task: Task = serde_json::from_str(line)
            .with_context(|| format!("parse snapshot line {}", index + 1))?;
        tasks.push(task);
    }
    let errors = validate_invariants(&tasks);
    if !errors.is_empty() {
        return Err(anyhow!("snapshot invariants failed: {}", errors.join("; ")));
    }
    Ok(tasks)
}
