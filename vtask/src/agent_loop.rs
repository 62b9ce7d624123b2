//! Headless control loop for `vtask run`.
//!
//! Each iteration selects the earliest ready task, dispatches one agent process
//! for it, waits for the process to exit, and re-reads the task. Completion is
//! recorded by the agent itself through `vtask done`; the loop observes it and,
//! when the agent left the task unlinked, binds it to a commit.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use crate::core::ready::{Selection, select_next};
use crate::error::Result;
use crate::io::executor::{ExecReport, ExecRequest, Executor};
use crate::io::init::{VtaskPaths, ensure_gitignore};
use crate::io::pointer::SnapshotStore;
use crate::io::prompt::render_dispatch_prompt;
use crate::io::task_log::{create_task_log, task_log_path, write_log_header};
use crate::linker::{CommitCreator, CommitLinker};
use crate::store::TaskStore;
use crate::task::{Task, find, find_mut};

/// Loop limits and modes, resolved from config and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop after exactly one dispatch.
    pub once: bool,
    /// Project the run in memory without spawning anything.
    pub dry_run: bool,
    /// Pause between dispatches.
    pub delay: Duration,
    /// Upper bound on dispatches for this invocation.
    pub max_tasks: Option<u32>,
    /// Consecutive failures before a task is soft-skipped.
    pub max_failures: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            once: false,
            dry_run: false,
            delay: Duration::ZERO,
            max_tasks: None,
            max_failures: 3,
        }
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    /// No pending task is ready.
    AllDone,
    /// Ready tasks exist but all were skipped in this run.
    NoEligibleWork,
    /// The `max_tasks` dispatch bound was reached.
    MaxTasks,
    /// `--once` finished its single dispatch.
    Once,
    /// The stop file was observed between iterations.
    StopRequested,
}

impl RunStop {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStop::AllDone => "all done",
            RunStop::NoEligibleWork => "no eligible work",
            RunStop::MaxTasks => "max tasks reached",
            RunStop::Once => "once",
            RunStop::StopRequested => "stop requested",
        }
    }
}

/// Progress reported while the loop runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Dispatched {
        task_id: String,
        /// 1-based attempt within this run.
        attempt: u32,
        log_path: PathBuf,
    },
    Completed {
        task_id: String,
    },
    /// The loop bound a completed task to `commit`.
    Linked {
        task_id: String,
        commit: String,
    },
    Failed {
        task_id: String,
        failures: u32,
        reason: String,
    },
    Skipped {
        task_id: String,
        failures: u32,
    },
    /// The task was deleted while its agent ran.
    Vanished {
        task_id: String,
    },
    /// Dry-run only: what would be dispatched.
    Planned {
        task_id: String,
        prompt: String,
    },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub dispatched: u32,
    /// Ids observed done after their dispatch (projected, under dry-run).
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub stop: RunStop,
}

/// Process-local retry state; nothing here is persisted.
#[derive(Debug, Default)]
struct Run {
    failures: HashMap<String, u32>,
    skipped: HashSet<String>,
}

/// Note appended when a task is skipped for the rest of a run.
pub fn skip_note(failures: u32) -> String {
    format!("skipped: agent failed {failures} times")
}

/// Drive `executor` through the ready queue until a stop condition holds.
///
/// A nonzero exit, a failed spawn, or an unopenable log all count as a failure
/// of the prompted task; only store errors abort the loop. With `commits`, a
/// task completed without a `closed_commit` is linked before the next pick.
pub fn run_loop<S, E, F>(
    paths: &VtaskPaths,
    store: &TaskStore<S>,
    executor: &E,
    commits: Option<&dyn CommitCreator>,
    options: &RunOptions,
    mut on_event: F,
) -> Result<RunOutcome>
where
    S: SnapshotStore,
    E: Executor + ?Sized,
    F: FnMut(&RunEvent),
{
    if options.dry_run {
        return dry_run(store, options, commits.is_some(), on_event);
    }
    // Dispatch logs land in the worktree the loop may commit.
    ensure_gitignore(paths)?;

    let mut run = Run::default();
    let mut dispatched = 0u32;
    let mut completed = Vec::new();
    let mut skipped = Vec::new();
    let mut throttle = false;

    let stop = loop {
        if take_stop_request(paths)? {
            break RunStop::StopRequested;
        }
        let snapshot = store.snapshot()?;
        let task = match select_next(&snapshot, &run.skipped) {
            Selection::AllDone => break RunStop::AllDone,
            Selection::NoEligibleWork => break RunStop::NoEligibleWork,
            Selection::Selected(task) => task.clone(),
        };
        if options.max_tasks.is_some_and(|max| dispatched >= max) {
            break RunStop::MaxTasks;
        }
        if throttle {
            // Re-check the stop file and the queue after pausing.
            throttle = false;
            thread::sleep(options.delay);
            continue;
        }

        let attempt = run.failures.get(&task.id).copied().unwrap_or(0) + 1;
        let head_before = commits.and_then(head_or_warn);
        let (log_path, result) = dispatch(paths, executor, &task, commits.is_some())?;
        dispatched += 1;
        throttle = !options.delay.is_zero();
        on_event(&RunEvent::Dispatched {
            task_id: task.id.clone(),
            attempt,
            log_path,
        });

        let snapshot = store.snapshot()?;
        match find(&snapshot, &task.id) {
            None => {
                info!(task_id = %task.id, "task vanished during dispatch");
                run.failures.remove(&task.id);
                on_event(&RunEvent::Vanished { task_id: task.id });
            }
            Some(current) if current.is_done() => {
                info!(task_id = %task.id, "task completed");
                run.failures.remove(&task.id);
                on_event(&RunEvent::Completed {
                    task_id: task.id.clone(),
                });
                let linked = match commits {
                    Some(commits) if current.closed_commit.is_none() => {
                        link_completion(store, commits, current, head_before.as_deref())
                    }
                    _ => None,
                };
                if let Some(commit) = linked {
                    on_event(&RunEvent::Linked {
                        task_id: task.id.clone(),
                        commit,
                    });
                }
                completed.push(task.id);
            }
            Some(_) => {
                let failures = run.failures.entry(task.id.clone()).or_insert(0);
                *failures += 1;
                let failures = *failures;
                let reason = failure_reason(&result);
                warn!(task_id = %task.id, failures, reason = %reason, "agent did not complete task");
                if failures >= options.max_failures {
                    store.append_note(&task.id, &skip_note(failures))?;
                    run.skipped.insert(task.id.clone());
                    on_event(&RunEvent::Skipped {
                        task_id: task.id.clone(),
                        failures,
                    });
                    skipped.push(task.id);
                } else {
                    on_event(&RunEvent::Failed {
                        task_id: task.id,
                        failures,
                        reason,
                    });
                }
            }
        }

        if options.once {
            break RunStop::Once;
        }
    };

    Ok(RunOutcome {
        dispatched,
        completed,
        skipped,
        stop,
    })
}

/// Render the prompt, write the log header, and run the executor.
///
/// The returned `Err` is the dispatch failure itself, reported but not fatal.
fn dispatch<E: Executor + ?Sized>(
    paths: &VtaskPaths,
    executor: &E,
    task: &Task,
    commit: bool,
) -> Result<(PathBuf, anyhow::Result<ExecReport>)> {
    let started_at = Utc::now();
    let mut request = ExecRequest {
        task_id: task.id.clone(),
        workdir: paths.root.clone(),
        prompt: render_dispatch_prompt(task, commit)?,
        log_path: task_log_path(&paths.logs_dir, &task.id, started_at),
    };
    let result = match create_task_log(&request.log_path) {
        Ok((path, file)) => {
            request.log_path = path;
            write_log_header(file, &request, executor.program(), started_at)
                .and_then(|()| executor.exec(&request))
        }
        Err(err) => Err(err),
    };
    Ok((request.log_path, result))
}

/// Bind a task the agent completed without linking.
///
/// A commit the agent made during the dispatch closes the task; otherwise what
/// it left in the worktree is committed. Any failure leaves the task unlinked.
fn link_completion<S: SnapshotStore>(
    store: &TaskStore<S>,
    commits: &dyn CommitCreator,
    task: &Task,
    head_before: Option<&str>,
) -> Option<String> {
    let mut linker = CommitLinker::new();
    linker.on_done(task);
    let linked = match head_or_warn(commits) {
        Some(head) if head_before != Some(head.as_str()) => {
            linker.link(store, &head).map(|_| head)
        }
        _ => {
            let message = format!("vtask: {}", first_line(&task.content));
            linker
                .commit(store, commits, &message)
                .map(|outcome| outcome.commit)
        }
    };
    match linked {
        Ok(commit) => Some(commit),
        Err(err) => {
            warn!(task_id = %task.id, err = %err, "task left without a closing commit");
            None
        }
    }
}

fn head_or_warn(commits: &dyn CommitCreator) -> Option<String> {
    commits.head_commit().unwrap_or_else(|err| {
        warn!(err = %err, "could not read HEAD");
        None
    })
}

fn first_line(content: &str) -> &str {
    content.trim().lines().next().unwrap_or("")
}

fn failure_reason(result: &anyhow::Result<ExecReport>) -> String {
    match result {
        Ok(ExecReport {
            exit_code: Some(code),
            success: false,
        }) => format!("exit code {code}"),
        Ok(ExecReport { success: false, .. }) => "terminated by signal".to_string(),
        Ok(_) => "exited without completing the task".to_string(),
        Err(err) => format!("{err:#}"),
    }
}

/// Remove the stop file if present and report whether it was there.
fn take_stop_request(paths: &VtaskPaths) -> Result<bool> {
    match fs::remove_file(&paths.stop_path) {
        Ok(()) => {
            info!(path = %paths.stop_path.display(), "stop requested");
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err)
            .with_context(|| format!("remove {}", paths.stop_path.display()))
            .map_err(Into::into),
    }
}

/// Walk the queue over an in-memory projection, marking each pick done there only.
fn dry_run<S, F>(
    store: &TaskStore<S>,
    options: &RunOptions,
    commit: bool,
    mut on_event: F,
) -> Result<RunOutcome>
where
    S: SnapshotStore,
    F: FnMut(&RunEvent),
{
    let mut projection = store.snapshot()?;
    let none_skipped = HashSet::new();
    let mut dispatched = 0u32;
    let mut completed = Vec::new();

    let stop = loop {
        let task = match select_next(&projection, &none_skipped) {
            Selection::AllDone => break RunStop::AllDone,
            Selection::NoEligibleWork => break RunStop::NoEligibleWork,
            Selection::Selected(task) => task.clone(),
        };
        if options.max_tasks.is_some_and(|max| dispatched >= max) {
            break RunStop::MaxTasks;
        }

        let prompt = render_dispatch_prompt(&task, commit)?;
        dispatched += 1;
        on_event(&RunEvent::Planned {
            task_id: task.id.clone(),
            prompt,
        });
        if let Some(projected) = find_mut(&mut projection, &task.id) {
            projected.close(Utc::now());
        }
        completed.push(task.id);

        if options.once {
            break RunStop::Once;
        }
    };

    Ok(RunOutcome {
        dispatched,
        completed,
        skipped: Vec::new(),
        stop,
    })
}
