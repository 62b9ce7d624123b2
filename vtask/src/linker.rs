//! Binding a just-completed task to the commit that closes it.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::io::pointer::SnapshotStore;
use crate::store::TaskStore;
use crate::task::Task;

/// Trailer key naming the closed task in a linked commit's message.
pub const TASK_TRAILER: &str = "Task";

/// The external "create a commit" primitive.
pub trait CommitCreator {
    /// Create a commit and return its identifier.
    fn create_commit(&self, message: &str) -> anyhow::Result<String>;

    /// The commit `HEAD` names; `None` on an unborn branch.
    fn head_commit(&self) -> anyhow::Result<Option<String>>;
}

/// Result of [`CommitLinker::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub commit: String,
    /// The task whose `closed_commit` now names `commit`, if any.
    pub linked: Option<Task>,
}

/// Remembers the most recently completed task of this process until the next commit.
#[derive(Debug, Default)]
pub struct CommitLinker {
    pending: Option<String>,
}

impl CommitLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Record `task` as awaiting a commit. Replaces any earlier pending task.
    pub fn on_done(&mut self, task: &Task) {
        if let Some(previous) = self.pending.replace(task.id.clone()) {
            debug!(previous = %previous, next = %task.id, "replacing unlinked task");
        }
    }

    /// Link the pending task to `commit`. Pending is cleared whatever the outcome.
    pub fn link<S: SnapshotStore>(
        &mut self,
        store: &TaskStore<S>,
        commit: &str,
    ) -> Result<Option<Task>> {
        let Some(id) = self.pending.take() else {
            return Ok(None);
        };
        let task = store.set_closed_commit(&id, commit)?;
        info!(task_id = %id, commit, "linked task to commit");
        Ok(Some(task))
    }

    /// Create a commit through `creator`, then link it.
    ///
    /// With a task pending, the message gains a `Task: <id>` trailer. A failed
    /// commit leaves the task done but unlinked, and drops the pending id.
    pub fn commit<S: SnapshotStore, C: CommitCreator + ?Sized>(
        &mut self,
        store: &TaskStore<S>,
        creator: &C,
        message: &str,
    ) -> Result<CommitOutcome> {
        let message = match &self.pending {
            Some(id) => format!("{}\n\n{TASK_TRAILER}: {id}", message.trim_end()),
            None => message.to_string(),
        };
        let commit = match creator.create_commit(&message) {
            Ok(commit) => commit,
            Err(err) => {
                if let Some(id) = self.pending.take() {
                    warn!(task_id = %id, err = %err, "commit failed; task stays unlinked");
                }
                return Err(err.context("create commit").into());
            }
        };
        let linked = self.link(store, &commit)?;
        Ok(CommitOutcome { commit, linked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::settings::Settings;
    use crate::test_support::{FakeCommits, memory_task_store};

    #[test]
    fn done_then_commit_links_once() {
        let store = memory_task_store(Settings::human("alice", "main"));
        let commits = FakeCommits::new();
        let mut linker = CommitLinker::new();
        let x = store.add("write tests", None).expect("add");

        let done = store.mark_done(&x.id, None).expect("done");
        linker.on_done(&done);
        let first = linker.commit(&store, &commits, "test: add").expect("commit");
        assert_eq!(first.linked.map(|task| task.id), Some(x.id.clone()));
        assert_eq!(linker.pending(), None);

        let second = linker.commit(&store, &commits, "chore: more").expect("commit");
        assert_eq!(second.linked, None);
        assert_eq!(
            store.get(&x.id).expect("get").closed_commit,
            Some(first.commit)
        );
        assert_eq!(
            commits.messages(),
            vec![format!("test: add\n\nTask: {}", x.id), "chore: more".to_string()]
        );
    }

    #[test]
    fn later_done_replaces_pending() {
        let store = memory_task_store(Settings::human("alice", "main"));
        let mut linker = CommitLinker::new();
        let a = store.add("a", None).expect("add");
        let b = store.add("b", None).expect("add");

        linker.on_done(&store.mark_done(&a.id, None).expect("done"));
        linker.on_done(&store.mark_done(&b.id, None).expect("done"));
        let linked = linker.link(&store, "abc1234").expect("link");

        assert_eq!(linked.map(|task| task.id), Some(b.id));
        assert_eq!(store.get(&a.id).expect("get").closed_commit, None);
    }

    #[test]
    fn failed_commit_leaves_task_done_and_unlinked() {
        let store = memory_task_store(Settings::human("alice", "main"));
        let commits = FakeCommits::failing();
        let mut linker = CommitLinker::new();
        let x = store.add("write tests", None).expect("add");
        linker.on_done(&store.mark_done(&x.id, None).expect("done"));

        let err = linker.commit(&store, &commits, "test: add").unwrap_err();

        assert!(matches!(err, TaskError::Storage(_)));
        assert_eq!(linker.pending(), None);
        let after = store.get(&x.id).expect("get");
        assert!(after.is_done());
        assert_eq!(after.closed_commit, None);
    }

    #[test]
    fn link_clears_pending_even_when_task_vanished() {
        let store = memory_task_store(Settings::human("alice", "main"));
        let mut linker = CommitLinker::new();
        let x = store.add("write tests", None).expect("add");
        linker.on_done(&store.mark_done(&x.id, None).expect("done"));
        store.delete(&x.id).expect("delete");

        let err = linker.link(&store, "abc1234").unwrap_err();

        assert!(matches!(err, TaskError::NotFound(_)));
        assert_eq!(linker.pending(), None);
    }
}
