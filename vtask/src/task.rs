use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle state. Transitions only move `Pending -> Done`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Done,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Done => "done",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// One record of a branch's task collection.
///
/// `id`, `content`, `created_at`, `created_by` and `after` are frozen at creation.
/// `notes` only grows, and `closed_at`/`closed_commit` are written at most once.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_commit: Option<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        created_by: impl Into<String>,
        after: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status: Status::Pending,
            created_at,
            created_by: created_by.into(),
            after,
            closed_at: None,
            closed_commit: None,
            notes: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    pub fn push_note(&mut self, text: impl Into<String>, at: DateTime<Utc>) {
        self.notes.push(Note {
            at,
            text: text.into(),
        });
    }

    /// Move to `Done` and stamp `closed_at`. Callers check for `AlreadyDone` first.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.status = Status::Done;
        if self.closed_at.is_none() {
            self.closed_at = Some(at);
        }
    }
}

/// Find a task by exact id.
pub fn find<'a>(tasks: &'a [Task], id: &str) -> Option<&'a Task> {
    tasks.iter().find(|task| task.id == id)
}

pub fn find_mut<'a>(tasks: &'a mut [Task], id: &str) -> Option<&'a mut Task> {
    tasks.iter_mut().find(|task| task.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Pending).expect("serialize");
        assert_eq!(json, "\"pending\"");
        let parsed: Status = serde_json::from_str("\"done\"").expect("parse");
        assert_eq!(parsed, Status::Done);
    }

    #[test]
    fn close_keeps_first_closed_at() {
        let created = Utc::now();
        let mut task = Task::new("abc123", "write tests", "alice", None, created);
        let first = created + chrono::Duration::seconds(5);
        task.close(first);
        task.close(first + chrono::Duration::seconds(5));
        assert!(task.is_done());
        assert_eq!(task.closed_at, Some(first));
    }

    #[test]
    fn missing_optional_fields_default() {
        let line = r#"{"id":"a1b2c3","content":"x","status":"pending","created_at":"2026-01-02T03:04:05Z","created_by":"bob"}"#;
        let task: Task = serde_json::from_str(line).expect("parse");
        assert_eq!(task.after, None);
        assert!(task.notes.is_empty());
    }
}
