//! Test-only helpers: deterministic tasks, in-memory stores, and a scripted executor.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};

use crate::io::executor::{ExecReport, ExecRequest, Executor};
use crate::io::pointer::{Observed, SnapshotStore, SwapOutcome, Version};
use crate::linker::{CommitCreator, CommitLinker};
use crate::settings::Settings;
use crate::store::{StoreOptions, TaskStore};
use crate::task::Task;

/// Timestamp shared by every fixture so equal inputs compare equal.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
        .single()
        .unwrap_or_default()
}

/// Create a pending task with no dependency.
pub fn task(id: &str, content: &str) -> Task {
    Task::new(id, content, "tester", None, fixed_time())
}

/// Create a pending task that follows `after`.
pub fn task_after(id: &str, content: &str, after: &str) -> Task {
    Task::new(id, content, "tester", Some(after.to_string()), fixed_time())
}

/// Create a done task closed one minute after creation.
pub fn done_task(id: &str, content: &str) -> Task {
    let mut task = task(id, content);
    task.close(fixed_time() + chrono::Duration::minutes(1));
    task
}

/// Store options with no backoff so conflict tests run instantly.
pub fn fast_options() -> StoreOptions {
    StoreOptions {
        retry_backoff: Duration::ZERO,
        ..StoreOptions::default()
    }
}

pub fn task_store<S: SnapshotStore>(store: S, settings: Settings) -> TaskStore<S> {
    TaskStore::new(store, settings, fast_options())
}

pub fn memory_task_store(settings: Settings) -> TaskStore<MemoryStore> {
    task_store(MemoryStore::new(), settings)
}

/// Mutex-guarded snapshot versioned by a swap counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<(Vec<Task>, u64)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            state: Mutex::new((tasks, 1)),
        }
    }

    fn version_of(counter: u64) -> Option<Version> {
        (counter > 0).then(|| Version::new(counter.to_string()))
    }
}

impl SnapshotStore for MemoryStore {
    fn read(&self) -> Result<Observed> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(Observed {
            tasks: state.0.clone(),
            version: Self::version_of(state.1),
        })
    }

    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        if Self::version_of(state.1).as_ref() != expected {
            return Ok(SwapOutcome::Conflict);
        }
        state.0 = next.to_vec();
        state.1 += 1;
        Ok(SwapOutcome::Swapped(Version::new(state.1.to_string())))
    }
}

type Interleave = Box<dyn FnOnce()>;

/// Runs another writer between this writer's read and its first swap.
pub struct InterleavingStore<S> {
    inner: S,
    before_first_swap: Mutex<Option<Interleave>>,
    conflicts: AtomicU32,
}

impl<S: SnapshotStore> InterleavingStore<S> {
    pub fn new(inner: S, interleave: impl FnOnce() + 'static) -> Self {
        Self {
            inner,
            before_first_swap: Mutex::new(Some(Box::new(interleave))),
            conflicts: AtomicU32::new(0),
        }
    }

    pub fn conflicts(&self) -> u32 {
        self.conflicts.load(Ordering::SeqCst)
    }
}

impl<S: SnapshotStore> SnapshotStore for InterleavingStore<S> {
    fn read(&self) -> Result<Observed> {
        self.inner.read()
    }

    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        let interleave = self
            .before_first_swap
            .lock()
            .map_err(|_| anyhow!("interleave hook poisoned"))?
            .take();
        if let Some(interleave) = interleave {
            interleave();
        }
        let outcome = self.inner.compare_and_swap(expected, next)?;
        if outcome == SwapOutcome::Conflict {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }
}

/// Runs a hook just before the `nth` read (1-based); otherwise behaves like `inner`.
pub struct ReadHookStore<S> {
    inner: S,
    nth: u32,
    reads: AtomicU32,
    hook: Mutex<Option<Interleave>>,
}

impl<S: SnapshotStore> ReadHookStore<S> {
    pub fn new(inner: S, nth: u32, hook: impl FnOnce() + 'static) -> Self {
        Self {
            inner,
            nth,
            reads: AtomicU32::new(0),
            hook: Mutex::new(Some(Box::new(hook))),
        }
    }
}

impl<S: SnapshotStore> SnapshotStore for ReadHookStore<S> {
    fn read(&self) -> Result<Observed> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if read == self.nth {
            let hook = self
                .hook
                .lock()
                .map_err(|_| anyhow!("read hook poisoned"))?
                .take();
            if let Some(hook) = hook {
                hook();
            }
        }
        self.inner.read()
    }

    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        self.inner.compare_and_swap(expected, next)
    }
}

/// A pointer that always moves before the swap lands.
#[derive(Debug, Default)]
pub struct AlwaysConflictStore {
    attempts: AtomicU32,
}

impl AlwaysConflictStore {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for AlwaysConflictStore {
    fn read(&self) -> Result<Observed> {
        Ok(Observed::empty())
    }

    fn compare_and_swap(&self, _expected: Option<&Version>, _next: &[Task]) -> Result<SwapOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(SwapOutcome::Conflict)
    }
}

/// Commit creator over an in-memory history with a movable `HEAD`.
#[derive(Debug, Default)]
pub struct FakeCommits {
    /// `(commit id, message)`, oldest first.
    history: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl FakeCommits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create_commit` fails as if the worktree were clean.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|history| history.iter().map(|(_, message)| message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn head(&self) -> Option<String> {
        self.history
            .lock()
            .ok()
            .and_then(|history| history.last().map(|(id, _)| id.clone()))
    }

    /// Record a commit made behind vtask's back, as an agent running `git commit` would.
    pub fn commit_externally(&self, message: &str) -> Result<String> {
        self.push(message)
    }

    fn push(&self, message: &str) -> Result<String> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| anyhow!("commit history poisoned"))?;
        let id = format!("{:040x}", history.len() + 1);
        history.push((id.clone(), message.to_string()));
        Ok(id)
    }
}

impl CommitCreator for FakeCommits {
    fn create_commit(&self, message: &str) -> Result<String> {
        if self.fail {
            return Err(anyhow!("nothing to commit"));
        }
        self.push(message)
    }

    fn head_commit(&self) -> Result<Option<String>> {
        Ok(self.head())
    }
}

/// What the scripted agent does for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedRun {
    /// Mark the prompted task done and exit 0.
    Complete,
    /// Exit 1 without touching the store.
    Fail,
    /// Exit 0 without touching the store.
    ExitCleanly,
    /// The process never starts.
    SpawnError,
    /// A human deletes the prompted task while the agent runs; exit 1.
    DeleteTask,
    /// Commit directly, then mark the task done without linking; exit 0.
    CommitThenComplete,
    /// Mark done and commit through the linker, as `vtask done --commit` does; exit 0.
    CompleteWithCommit,
}

/// Executor that acts on the store directly instead of spawning a process.
///
/// Once the script runs out, every further dispatch fails.
pub struct ScriptedExecutor<S> {
    store: TaskStore<S>,
    commits: Option<Arc<FakeCommits>>,
    script: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<String>>,
}

impl<S: SnapshotStore> ScriptedExecutor<S> {
    /// `store` must share a backend with the loop's store; it runs as a human
    /// so `DeleteTask` is allowed.
    pub fn new(store: TaskStore<S>, script: Vec<ScriptedRun>) -> Self {
        Self {
            store,
            commits: None,
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// History the committing script steps write to.
    pub fn with_commits(mut self, commits: Arc<FakeCommits>) -> Self {
        self.commits = Some(commits);
        self
    }

    fn commits(&self) -> Result<&FakeCommits> {
        self.commits
            .as_deref()
            .ok_or_else(|| anyhow!("scripted executor has no commit history"))
    }

    /// Task ids in dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl<S: SnapshotStore> Executor for ScriptedExecutor<S> {
    fn program(&self) -> &str {
        "scripted"
    }

    fn exec(&self, request: &ExecRequest) -> Result<ExecReport> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls poisoned"))?
            .push(request.task_id.clone());
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("script poisoned"))?
            .pop_front()
            .unwrap_or(ScriptedRun::Fail);

        let exited = |code: i32| ExecReport {
            exit_code: Some(code),
            success: code == 0,
        };
        match next {
            ScriptedRun::Complete => {
                self.store
                    .mark_done(&request.task_id, Some("done by script"))?;
                Ok(exited(0))
            }
            ScriptedRun::Fail => Ok(exited(1)),
            ScriptedRun::ExitCleanly => Ok(exited(0)),
            ScriptedRun::SpawnError => Err(anyhow!("spawn command: No such file or directory")),
            ScriptedRun::DeleteTask => {
                self.store.delete(&request.task_id)?;
                Ok(exited(1))
            }
            ScriptedRun::CommitThenComplete => {
                self.commits()?.commit_externally("agent work")?;
                self.store.mark_done(&request.task_id, None)?;
                Ok(exited(0))
            }
            ScriptedRun::CompleteWithCommit => {
                let done = self.store.mark_done(&request.task_id, None)?;
                let mut linker = CommitLinker::new();
                linker.on_done(&done);
                linker.commit(&self.store, self.commits()?, "agent work")?;
                Ok(exited(0))
            }
        }
    }
}

/// A temporary directory holding a fresh repository from [`init_git_repo`].
pub fn temp_git_repo() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_repo(temp.path());
    temp
}

/// Initialize a throwaway repository with one commit on `main`.
pub fn init_git_repo(root: &Path) {
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {} failed", args.join(" "));
    };
    git(&["init", "--quiet", "--initial-branch=main"]);
    git(&["config", "user.name", "vtask tests"]);
    git(&["config", "user.email", "vtask@example.com"]);
    git(&["config", "commit.gpgsign", "false"]);
    std::fs::write(root.join("README.md"), "# test repo\n").expect("write readme");
    git(&["add", "-A"]);
    git(&["commit", "--quiet", "-m", "chore: initial commit"]);
}
