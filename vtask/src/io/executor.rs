//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the agent loop from the actual agent
//! backend (`claude -p`, `codex exec`, or a raw command). Tests use scripted
//! executors that mutate the store directly without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::TaskError;
use crate::io::process::{Terminal, run_command_streaming};

/// Environment variable that tells a nested `vtask` it runs under an agent.
pub const AGENT_MODE_ENV: &str = "VTASK_AGENT_MODE";
/// Environment variable carrying the id of the task the agent was prompted with.
pub const TASK_ID_ENV: &str = "VTASK_TASK_ID";

/// Built-in executor selectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// `claude -p <prompt>`
    Claude,
    /// `codex exec <prompt>`
    Codex,
}

impl ExecutorKind {
    pub fn program(self) -> &'static str {
        match self {
            ExecutorKind::Claude => "claude",
            ExecutorKind::Codex => "codex",
        }
    }
}

/// How the external process is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorSpec {
    Builtin {
        kind: ExecutorKind,
        model: Option<String>,
    },
    /// A raw command line; the prompt is appended and nothing else.
    Raw { argv: Vec<String> },
}

impl ExecutorSpec {
    /// Parse a `--runner` override by splitting on whitespace.
    pub fn raw(command: &str) -> Result<Self, TaskError> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(TaskError::ExecutorMissing("<empty runner command>".to_string()));
        }
        Ok(Self::Raw { argv })
    }

    pub fn program(&self) -> &str {
        match self {
            ExecutorSpec::Builtin { kind, .. } => kind.program(),
            ExecutorSpec::Raw { argv } => argv[0].as_str(),
        }
    }

    /// Full argv for `prompt`, program first. The prompt is always the last argument.
    pub fn command_line(&self, prompt: &str) -> Vec<String> {
        let mut argv = Vec::new();
        match self {
            ExecutorSpec::Builtin { kind, model } => {
                argv.push(kind.program().to_string());
                match kind {
                    ExecutorKind::Claude => argv.push("-p".to_string()),
                    ExecutorKind::Codex => argv.push("exec".to_string()),
                }
                if let Some(model) = model {
                    argv.push("--model".to_string());
                    argv.push(model.clone());
                }
            }
            ExecutorSpec::Raw { argv: raw } => argv.extend(raw.iter().cloned()),
        }
        argv.push(prompt.to_string());
        argv
    }

    /// Fail with `ExecutorMissing` unless the program resolves to an executable.
    pub fn ensure_resolvable(&self) -> Result<(), TaskError> {
        let program = self.program();
        if can_resolve_command(program) {
            Ok(())
        } else {
            Err(TaskError::ExecutorMissing(program.to_string()))
        }
    }
}

/// Parameters for one dispatch.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Task the prompt was rendered for.
    pub task_id: String,
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    /// Prompt text, passed as the process's sole input.
    pub prompt: String,
    /// Persistent per-task log for this dispatch.
    pub log_path: PathBuf,
}

/// How a dispatched process ended. The loop never inspects output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecReport {
    pub exit_code: Option<i32>,
    pub success: bool,
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Program name recorded in the per-task log header.
    fn program(&self) -> &str;

    /// Run one headless agent process to completion.
    fn exec(&self, request: &ExecRequest) -> Result<ExecReport>;
}

/// Executor that spawns a real process per dispatch.
pub struct CommandExecutor {
    spec: ExecutorSpec,
    terminal: Terminal,
}

impl CommandExecutor {
    pub fn new(spec: ExecutorSpec) -> Self {
        Self {
            spec,
            terminal: Terminal::Inherit,
        }
    }

    pub fn with_terminal(mut self, terminal: Terminal) -> Self {
        self.terminal = terminal;
        self
    }
}

impl Executor for CommandExecutor {
    fn program(&self) -> &str {
        self.spec.program()
    }

    #[instrument(skip_all, fields(task_id = %request.task_id, program = %self.spec.program()))]
    fn exec(&self, request: &ExecRequest) -> Result<ExecReport> {
        info!(workdir = %request.workdir.display(), "dispatching agent");
        let argv = self.spec.command_line(&request.prompt);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&request.workdir)
            .env(AGENT_MODE_ENV, "1")
            .env(TASK_ID_ENV, &request.task_id);

        let run = run_command_streaming(cmd, &request.log_path, self.terminal)
            .with_context(|| format!("run {}", self.spec.program()))?;

        if !run.status.success() {
            warn!(exit_code = ?run.status.code(), "agent exited unsuccessfully");
        }
        debug!(logged_bytes = run.logged_bytes, "agent finished");
        Ok(ExecReport {
            exit_code: run.status.code(),
            success: run.status.success(),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && (m.permissions().mode() & 0o111 != 0))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn find_executable_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn can_resolve_command(cmd: &str) -> bool {
    let trimmed = cmd.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.contains(std::path::MAIN_SEPARATOR) || trimmed.contains('/') {
        return is_executable(Path::new(trimmed));
    }
    find_executable_in_path(trimmed).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_gets_print_flag_and_prompt_last() {
        let spec = ExecutorSpec::Builtin {
            kind: ExecutorKind::Claude,
            model: Some("sonnet".to_string()),
        };
        assert_eq!(
            spec.command_line("do it"),
            vec!["claude", "-p", "--model", "sonnet", "do it"]
        );
    }

    #[test]
    fn codex_gets_exec_subcommand() {
        let spec = ExecutorSpec::Builtin {
            kind: ExecutorKind::Codex,
            model: None,
        };
        assert_eq!(spec.command_line("do it"), vec!["codex", "exec", "do it"]);
    }

    #[test]
    fn raw_runner_only_appends_prompt() {
        let spec = ExecutorSpec::raw("my-agent --fast").expect("spec");
        assert_eq!(spec.command_line("do it"), vec!["my-agent", "--fast", "do it"]);
    }

    #[test]
    fn empty_runner_is_missing_executor() {
        assert!(matches!(
            ExecutorSpec::raw("   "),
            Err(TaskError::ExecutorMissing(_))
        ));
    }

    #[test]
    fn unknown_program_is_missing_executor() {
        let spec = ExecutorSpec::raw("vtask-no-such-agent-binary").expect("spec");
        let err = spec.ensure_resolvable().unwrap_err();
        assert_eq!(
            err.to_string(),
            "executor not found: vtask-no-such-agent-binary"
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_executor_reports_exit_and_exports_task_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = ExecutorSpec::raw("sh -c").expect("spec");
        let executor = CommandExecutor::new(spec).with_terminal(Terminal::Quiet);
        let request = ExecRequest {
            task_id: "abc123".to_string(),
            workdir: temp.path().to_path_buf(),
            prompt: "echo \"$VTASK_TASK_ID $VTASK_AGENT_MODE\"; exit 4".to_string(),
            log_path: temp.path().join("agent.log"),
        };

        let report = executor.exec(&request).expect("exec");

        assert_eq!(report.exit_code, Some(4));
        assert!(!report.success);
        let log = std::fs::read_to_string(&request.log_path).expect("log");
        assert_eq!(log, "abc123 1\n");
    }
}
