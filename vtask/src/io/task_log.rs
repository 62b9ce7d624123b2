//! Per-task dispatch logs under `.vtask/logs/`.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::io::executor::ExecRequest;

/// Suffixed names tried before giving up on a crowded millisecond.
const MAX_LOG_SUFFIX: u32 = 100;

/// Log path for one dispatch: `.vtask/logs/<task-id>/<unix-millis>.log`.
pub fn task_log_path(logs_dir: &Path, task_id: &str, started_at: DateTime<Utc>) -> PathBuf {
    logs_dir
        .join(task_id)
        .join(format!("{}.log", started_at.timestamp_millis()))
}

/// Create a fresh log file at `path`, or at `<stem>-<n>.log` when it is taken.
///
/// Never truncates an existing log. Returns the path actually created.
pub fn create_task_log(path: &Path) -> Result<(PathBuf, File)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in 0..=MAX_LOG_SUFFIX {
        let candidate = match suffix {
            0 => path.to_path_buf(),
            n => path.with_file_name(format!("{stem}-{n}.log")),
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create log {}", candidate.display()));
            }
        }
    }
    Err(anyhow!("no free log name next to {}", path.display()))
}

/// Write the audit header; the executor appends the streamed output after it.
pub fn write_log_header(
    mut file: File,
    request: &ExecRequest,
    program: &str,
    started_at: DateTime<Utc>,
) -> Result<()> {
    let mut buf = String::new();
    buf.push_str(&format!("# task: {}\n", request.task_id));
    buf.push_str(&format!(
        "# started: {}\n",
        started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    buf.push_str(&format!("# program: {program}\n"));
    buf.push_str("# prompt:\n");
    for line in request.prompt.lines() {
        buf.push_str(&format!("#   {line}\n"));
    }
    buf.push_str("# output:\n");
    file.write_all(buf.as_bytes())
        .with_context(|| format!("write log {}", request.log_path.display()))
}
