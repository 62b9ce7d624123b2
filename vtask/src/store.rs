//! Branch-scoped task collection with optimistic compare-and-swap writes.
//!
//! Every mutation follows the same cycle: read the latest snapshot and its
//! version, change an in-memory copy, then swap the pointer from the observed
//! version. A moved pointer re-runs the whole cycle, up to
//! `max_write_attempts` times, before [`TaskError::Conflict`] is surfaced.

use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::core::ids::mint_unique_id;
use crate::core::immutability::check_task_immutability;
use crate::core::invariants::validate_invariants;
use crate::error::{Result, TaskError};
use crate::io::config::VtaskConfig;
use crate::io::pointer::{SnapshotStore, SwapOutcome};
use crate::settings::Settings;
use crate::task::{Status, Task, find, find_mut};

/// Retry and id-minting limits for a [`TaskStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub max_write_attempts: u32,
    /// Base step of the linear backoff between conflicting attempts.
    pub retry_backoff: Duration,
    pub max_id_attempts: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&VtaskConfig::default())
    }
}

impl StoreOptions {
    pub fn from_config(config: &VtaskConfig) -> Self {
        Self {
            max_write_attempts: config.max_write_attempts,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_id_attempts: config.max_id_attempts,
        }
    }
}

/// Which tasks `list` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Status(Status),
}

impl ListFilter {
    fn matches(self, task: &Task) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Status(status) => task.status == status,
        }
    }
}

/// Whether a write must pass the forward-only check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Checked,
    /// Human corrections (`edit`/`delete`) rewrite frozen fields on purpose.
    Override,
}

/// What a mutation closure decided for one attempt.
enum Mutation<T> {
    Apply(T),
    /// Nothing changed; return without swapping.
    Noop(T),
}

/// Owns read/write access to one branch's task collection.
pub struct TaskStore<S> {
    store: S,
    settings: Settings,
    options: StoreOptions,
    clock: fn() -> DateTime<Utc>,
    salt: fn() -> u64,
}

impl<S: SnapshotStore> TaskStore<S> {
    pub fn new(store: S, settings: Settings, options: StoreOptions) -> Self {
        Self {
            store,
            settings,
            options,
            clock: Utc::now,
            salt: rand::random::<u64>,
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the id salt source.
    pub fn with_salt_source(mut self, salt: fn() -> u64) -> Self {
        self.salt = salt;
        self
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Read-only view of the latest snapshot.
    pub fn snapshot(&self) -> Result<Vec<Task>> {
        let observed = self.store.read()?;
        debug!(tasks = observed.tasks.len(), "read snapshot");
        Ok(observed.tasks)
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        let snapshot = self.snapshot()?;
        find(&snapshot, id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Tasks matching `filter`, in creation order.
    pub fn list(&self, filter: ListFilter) -> Result<Vec<Task>> {
        let mut tasks = self.snapshot()?;
        tasks.retain(|task| filter.matches(task));
        Ok(tasks)
    }

    /// Append a new pending task, optionally after an existing one.
    #[instrument(skip_all, fields(after = ?after))]
    pub fn add(&self, content: &str, after: Option<&str>) -> Result<Task> {
        ensure_content(content)?;
        let created_by = self.settings.attribution();
        let max_id_attempts = self.options.max_id_attempts;
        self.write(Guard::Checked, |tasks| {
            if let Some(after) = after.filter(|after| find(tasks.as_slice(), after).is_none()) {
                return Err(TaskError::NotFound(after.to_string()));
            }
            let created_at = (self.clock)();
            let salts = std::iter::repeat_with(self.salt);
            let id = mint_unique_id(tasks, content, &created_at, salts, max_id_attempts).ok_or(
                TaskError::IdCollision {
                    attempts: max_id_attempts,
                },
            )?;
            let task = Task::new(
                id,
                content,
                created_by.clone(),
                after.map(str::to_string),
                created_at,
            );
            tasks.push(task.clone());
            Ok(Mutation::Apply(task))
        })
    }

    pub fn append_note(&self, id: &str, text: &str) -> Result<Task> {
        if text.trim().is_empty() {
            return Err(anyhow!("note text must not be empty").into());
        }
        self.write(Guard::Checked, |tasks| {
            let at = (self.clock)();
            let task = find_mut(tasks, id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            task.push_note(text, at);
            Ok(Mutation::Apply(task.clone()))
        })
    }

    /// Move a pending task to done, stamping `closed_at` and appending `note`.
    pub fn mark_done(&self, id: &str, note: Option<&str>) -> Result<Task> {
        self.write(Guard::Checked, |tasks| {
            let at = (self.clock)();
            let task = find_mut(tasks, id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if task.is_done() {
                return Err(TaskError::AlreadyDone(id.to_string()));
            }
            task.close(at);
            if let Some(note) = note.filter(|note| !note.trim().is_empty()) {
                task.push_note(note, at);
            }
            Ok(Mutation::Apply(task.clone()))
        })
    }

    /// Record the commit that closed a done task. An existing link is kept.
    pub fn set_closed_commit(&self, id: &str, commit: &str) -> Result<Task> {
        self.write(Guard::Checked, |tasks| {
            let task = find_mut(tasks, id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if task.closed_commit.is_some() {
                return Ok(Mutation::Noop(task.clone()));
            }
            if !task.is_done() {
                return Err(TaskError::immutable(format!(
                    "task {id} is not done; closed_commit follows completion"
                )));
            }
            task.closed_commit = Some(commit.to_string());
            Ok(Mutation::Apply(task.clone()))
        })
    }

    /// Human correction of a task's content.
    pub fn edit(&self, id: &str, content: &str) -> Result<Task> {
        self.ensure_human("edit")?;
        ensure_content(content)?;
        self.write(Guard::Override, |tasks| {
            let task = find_mut(tasks, id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if task.content == content {
                return Ok(Mutation::Noop(task.clone()));
            }
            task.content = content.to_string();
            Ok(Mutation::Apply(task.clone()))
        })
    }

    /// Human removal of a task. Dependents become unblocked.
    pub fn delete(&self, id: &str) -> Result<Task> {
        self.ensure_human("delete")?;
        self.write(Guard::Override, |tasks| {
            let index = tasks
                .iter()
                .position(|task| task.id == id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            Ok(Mutation::Apply(tasks.remove(index)))
        })
    }

    fn ensure_human(&self, operation: &str) -> Result<()> {
        if self.settings.agent_mode {
            return Err(TaskError::immutable(format!(
                "{operation} is disabled in agent mode"
            )));
        }
        Ok(())
    }

    /// Read, mutate a copy, and swap; retried from scratch on conflict.
    #[instrument(skip_all, fields(branch = %self.settings.branch))]
    fn write<T, F>(&self, guard: Guard, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut Vec<Task>) -> Result<Mutation<T>>,
    {
        let max_attempts = self.options.max_write_attempts;
        for attempt in 1..=max_attempts {
            let observed = self.store.read()?;
            let mut next = observed.tasks.clone();
            let value = match mutate(&mut next)? {
                Mutation::Apply(value) => value,
                Mutation::Noop(value) => return Ok(value),
            };

            if guard == Guard::Checked {
                let errors = check_task_immutability(&observed.tasks, &next);
                if !errors.is_empty() {
                    return Err(TaskError::immutable(errors.join("; ")));
                }
            }
            let errors = validate_invariants(&next);
            if !errors.is_empty() {
                return Err(anyhow!("snapshot invariants failed: {}", errors.join("; ")).into());
            }

            match self.store.compare_and_swap(observed.version.as_ref(), &next)? {
                SwapOutcome::Swapped(version) => {
                    debug!(%version, attempt, "swapped snapshot");
                    return Ok(value);
                }
                SwapOutcome::Conflict => {
                    warn!(attempt, max_attempts, "pointer moved during write; retrying");
                    if attempt < max_attempts {
                        thread::sleep(self.options.retry_backoff * attempt);
                    }
                }
            }
        }
        Err(TaskError::Conflict {
            attempts: max_attempts,
        })
    }
}

fn ensure_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(anyhow!("task content must not be empty").into());
    }
    Ok(())
}
