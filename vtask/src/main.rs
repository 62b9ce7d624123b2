//! `vtask`: tasks over version control.
//!
//! Tasks for the current branch live behind `refs/vtask/<branch>` (or a locked
//! file with `backend = "file"`). `vtask run` drives a headless agent through
//! the ready queue; the agent records completion with `vtask done --commit`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

use vtask::agent_loop::{RunEvent, RunOptions, RunOutcome, run_loop};
use vtask::core::checklist::render_checklist;
use vtask::core::ready::{blocker, ready};
use vtask::error::{TaskError, exit_code_for};
use vtask::io::config::Backend;
use vtask::io::executor::{CommandExecutor, ExecutorKind, ExecutorSpec};
use vtask::io::init::{InitOptions, init_vtask};
use vtask::linker::{CommitCreator, CommitLinker};
use vtask::logging;
use vtask::store::{ListFilter, TaskStore};
use vtask::task::{Status, Task, find};
use vtask::workspace::{DynStore, Workspace, project_root};

#[derive(Parser)]
#[command(name = "vtask", version, about = "Tasks over version control")]
struct Cli {
    /// Run as if vtask was started in <DIR>.
    #[arg(short = 'C', global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Print records as JSON, one object per line.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.vtask/config.toml` and `.vtask/.gitignore`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        /// Where task snapshots are stored.
        #[arg(long, value_enum, default_value_t = BackendArg::Git)]
        backend: BackendArg,
    },
    /// Add a pending task and print its id.
    Add {
        content: String,
        /// Id of the task this one waits for.
        #[arg(long, value_name = "ID")]
        after: Option<String>,
    },
    /// List tasks in creation order (pending by default).
    List {
        #[arg(long, value_enum, conflicts_with = "all")]
        status: Option<StatusArg>,
        /// Include every task regardless of status.
        #[arg(long)]
        all: bool,
    },
    /// Show pending tasks whose dependency is met.
    Ready,
    /// Show one task in full.
    Show { id: String },
    /// Mark a task done.
    Done {
        id: String,
        /// Append a closing note.
        #[arg(long)]
        note: Option<String>,
        /// Stage everything, commit with <MESSAGE>, and link the commit to the task.
        #[arg(long, value_name = "MESSAGE")]
        commit: Option<String>,
    },
    /// Append a note to a task.
    Note { id: String, text: String },
    /// Print a markdown checklist of the branch's tasks for a pull request.
    Pr,
    /// Dispatch an agent through the ready queue.
    Run(RunArgs),
    /// Rewrite a task's content (disabled in agent mode).
    Edit {
        id: String,
        #[arg(long)]
        content: String,
    },
    /// Remove a task (disabled in agent mode).
    Delete { id: String },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Use `claude -p`.
    #[arg(long, conflicts_with_all = ["codex", "runner"])]
    claude: bool,
    /// Use `codex exec`.
    #[arg(long, conflicts_with = "runner")]
    codex: bool,
    /// Raw command line; the prompt is appended as the last argument.
    #[arg(long, value_name = "CMD")]
    runner: Option<String>,
    /// Model passed to the built-in executor.
    #[arg(long)]
    model: Option<String>,
    /// Dispatch exactly one task.
    #[arg(long)]
    once: bool,
    /// Print what would be dispatched without running anything.
    #[arg(long)]
    dry_run: bool,
    /// Seconds to wait between dispatches.
    #[arg(long, value_name = "SECS")]
    delay: Option<u64>,
    /// Stop after this many dispatches.
    #[arg(long, value_name = "N")]
    max_tasks: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Git,
    File,
}

impl From<BackendArg> for Backend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Git => Backend::Git,
            BackendArg::File => Backend::File,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StatusArg {
    Pending,
    Done,
}

impl From<StatusArg> for Status {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Status::Pending,
            StatusArg::Done => Status::Done,
        }
    }
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let dir = cli.dir.clone().unwrap_or_else(|| PathBuf::from("."));
    if let Command::Init { force, backend } = cli.command {
        return cmd_init(&dir, force, backend.into());
    }

    let ws = Workspace::open(&dir, |key| std::env::var(key).ok())?;
    let store = ws.task_store()?;
    let json = cli.json;
    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Add { content, after } => {
            let task = store.add(&content, after.as_deref())?;
            println!("{}", task.id);
            Ok(())
        }
        Command::List { status, all } => {
            let filter = match (all, status) {
                (true, _) => ListFilter::All,
                (false, Some(status)) => ListFilter::Status(status.into()),
                (false, None) => ListFilter::Status(Status::Pending),
            };
            print_tasks(&store.list(filter)?, json)
        }
        Command::Ready => {
            let snapshot = store.snapshot()?;
            let ready: Vec<Task> = ready(&snapshot).into_iter().cloned().collect();
            print_tasks(&ready, json)
        }
        Command::Show { id } => cmd_show(&store, &id, json),
        Command::Done { id, note, commit } => cmd_done(&ws, &store, &id, note, commit),
        Command::Note { id, text } => {
            let task = store.append_note(&id, &text)?;
            println!("noted {}", task.id);
            Ok(())
        }
        Command::Pr => {
            let snapshot = store.snapshot()?;
            print!("{}", render_checklist(&snapshot, &ws.settings.branch));
            Ok(())
        }
        Command::Run(args) => cmd_run(&ws, &store, args),
        Command::Edit { id, content } => {
            let task = store.edit(&id, &content)?;
            println!("edited {}", task.id);
            Ok(())
        }
        Command::Delete { id } => {
            let task = store.delete(&id)?;
            println!("deleted {}", task.id);
            Ok(())
        }
    }
}

fn cmd_init(dir: &Path, force: bool, backend: Backend) -> Result<()> {
    let root = project_root(dir)?;
    let paths = init_vtask(&root, &InitOptions { force, backend })?;
    println!("initialized {}", paths.vtask_dir.display());
    Ok(())
}

fn cmd_show(store: &TaskStore<DynStore>, id: &str, json: bool) -> Result<()> {
    let snapshot = store.snapshot()?;
    let task = find(&snapshot, id)
        .cloned()
        .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
    let blocked_by = blocker(&snapshot, &task).map(|dep| dep.id.clone());
    if json {
        let mut value = serde_json::to_value(&task)?;
        if let Value::Object(map) = &mut value {
            map.insert("blocked_by".to_string(), serde_json::to_value(&blocked_by)?);
        }
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    println!("id:            {}", task.id);
    println!("status:        {}", task.status);
    println!("created_at:    {}", task.created_at.to_rfc3339());
    println!("created_by:    {}", task.created_by);
    if let Some(after) = &task.after {
        println!("after:         {after}");
    }
    if let Some(dep) = &blocked_by {
        println!("blocked_by:    {dep}");
    }
    if let Some(closed_at) = task.closed_at {
        println!("closed_at:     {}", closed_at.to_rfc3339());
    }
    if let Some(commit) = &task.closed_commit {
        println!("closed_commit: {commit}");
    }
    println!();
    println!("{}", task.content);
    if !task.notes.is_empty() {
        println!();
        for note in &task.notes {
            println!("- {}: {}", note.at.to_rfc3339(), note.text);
        }
    }
    Ok(())
}

fn cmd_done(
    ws: &Workspace,
    store: &TaskStore<DynStore>,
    id: &str,
    note: Option<String>,
    commit: Option<String>,
) -> Result<()> {
    let task = store.mark_done(id, note.as_deref())?;
    println!("done {}", task.id);
    let Some(message) = commit else {
        return Ok(());
    };

    let mut linker = CommitLinker::new();
    linker.on_done(&task);
    let outcome = linker.commit(store, ws.git()?, &message)?;
    match outcome.linked {
        Some(linked) => println!("committed {} (closes {})", short(&outcome.commit), linked.id),
        None => println!("committed {}", short(&outcome.commit)),
    }
    Ok(())
}

fn cmd_run(ws: &Workspace, store: &TaskStore<DynStore>, args: RunArgs) -> Result<()> {
    let run_cfg = &ws.config.run;
    let spec = match &args.runner {
        Some(command) => ExecutorSpec::raw(command)?,
        None => ExecutorSpec::Builtin {
            kind: if args.claude {
                ExecutorKind::Claude
            } else if args.codex {
                ExecutorKind::Codex
            } else {
                run_cfg.executor
            },
            model: args.model.clone().or_else(|| run_cfg.model.clone()),
        },
    };
    let options = RunOptions {
        once: args.once,
        dry_run: args.dry_run,
        delay: Duration::from_secs(args.delay.unwrap_or(run_cfg.delay_secs)),
        max_tasks: args.max_tasks,
        max_failures: run_cfg.max_failures,
    };
    if !options.dry_run {
        spec.ensure_resolvable()?;
    }

    let executor = CommandExecutor::new(spec);
    let commits = ws.git().ok().map(|git| git as &dyn CommitCreator);
    let max_failures = options.max_failures;
    let outcome = run_loop(&ws.paths, store, &executor, commits, &options, |event| {
        print_event(event, max_failures);
    })?;
    print_summary(&outcome);
    Ok(())
}

fn print_event(event: &RunEvent, max_failures: u32) {
    match event {
        RunEvent::Dispatched {
            task_id,
            attempt,
            log_path,
        } => println!(
            "vtask: dispatched {task_id} (attempt {attempt}, log {})",
            log_path.display()
        ),
        RunEvent::Completed { task_id } => println!("vtask: {task_id} done"),
        RunEvent::Linked { task_id, commit } => {
            println!("vtask: {task_id} closed by {}", short(commit));
        }
        RunEvent::Failed {
            task_id,
            failures,
            reason,
        } => println!("vtask: {task_id} not done ({failures}/{max_failures}): {reason}"),
        RunEvent::Skipped { task_id, failures } => {
            println!("vtask: {task_id} skipped after {failures} failures");
        }
        RunEvent::Vanished { task_id } => println!("vtask: {task_id} was deleted"),
        RunEvent::Planned { task_id, prompt } => {
            println!("vtask: would dispatch {task_id}");
            for line in prompt.lines() {
                println!("    {line}");
            }
        }
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!(
        "vtask: stopped ({}): dispatched {}, completed {}, skipped {}",
        outcome.stop.as_str(),
        outcome.dispatched,
        outcome.completed.len(),
        outcome.skipped.len()
    );
}

fn print_tasks(tasks: &[Task], json: bool) -> Result<()> {
    for task in tasks {
        if json {
            println!("{}", serde_json::to_string(task)?);
        } else {
            println!("{}  [{}]  {}", task.id, task.status, first_line(&task.content));
        }
    }
    Ok(())
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("")
}

fn short(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_add_with_dependency() {
        let cli = Cli::parse_from(["vtask", "add", "impl", "--after", "abc123"]);
        assert!(matches!(
            cli.command,
            Command::Add { content, after: Some(after) } if content == "impl" && after == "abc123"
        ));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["vtask", "list", "--json", "-C", "/tmp/x"]);
        assert!(cli.json);
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn list_status_conflicts_with_all() {
        assert!(Cli::try_parse_from(["vtask", "list", "--status", "done", "--all"]).is_err());
    }

    #[test]
    fn runner_conflicts_with_builtins() {
        assert!(Cli::try_parse_from(["vtask", "run", "--claude", "--runner", "x"]).is_err());
        assert!(Cli::try_parse_from(["vtask", "run", "--claude", "--codex"]).is_err());
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from([
            "vtask",
            "run",
            "--codex",
            "--model",
            "o4-mini",
            "--dry-run",
            "--max-tasks",
            "2",
            "--delay",
            "5",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.codex && args.dry_run);
        assert_eq!(args.model.as_deref(), Some("o4-mini"));
        assert_eq!(args.max_tasks, Some(2));
        assert_eq!(args.delay, Some(5));
    }

    #[test]
    fn init_defaults_to_git_backend() {
        let cli = Cli::parse_from(["vtask", "init"]);
        assert!(matches!(
            cli.command,
            Command::Init {
                force: false,
                backend: BackendArg::Git
            }
        ));
    }

    #[test]
    fn short_commit_is_seven_chars() {
        assert_eq!(short("0123456789abcdef"), "0123456");
        assert_eq!(short("abc"), "abc");
    }
}
