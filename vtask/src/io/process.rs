//! Helpers for running a child process while streaming its output.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};

type SharedLog = Arc<Mutex<BufWriter<File>>>;

/// Which terminal stream a child pipe is echoed to.
#[derive(Debug, Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
    Silent,
}

/// Exit information for a streamed child.
#[derive(Debug)]
pub struct StreamedRun {
    pub status: ExitStatus,
    /// Bytes of child output copied into the log.
    pub logged_bytes: u64,
}

/// Where streamed output should be echoed besides the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Echo child stdout/stderr to our stdout/stderr.
    Inherit,
    /// Log only.
    Quiet,
}

/// Run `cmd` to completion, teeing each output line to the terminal and to `log_path`.
///
/// There is no timeout: this blocks until the child exits. stdin is null, so the
/// child must be headless. The log file is appended to, which lets callers write
/// a header before spawning.
#[instrument(skip_all, fields(log_path = %log_path.display()))]
pub fn run_command_streaming(
    mut cmd: Command,
    log_path: &Path,
    terminal: Terminal,
) -> Result<StreamedRun> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log {}", log_path.display()))?;
    let log: SharedLog = Arc::new(Mutex::new(BufWriter::new(file)));

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (out_echo, err_echo) = match terminal {
        Terminal::Inherit => (Echo::Stdout, Echo::Stderr),
        Terminal::Quiet => (Echo::Silent, Echo::Silent),
    };
    let stdout_log = log.clone();
    let stderr_log = log.clone();
    let stdout_handle = thread::spawn(move || tee_lines(stdout, out_echo, stdout_log));
    let stderr_handle = thread::spawn(move || tee_lines(stderr, err_echo, stderr_log));

    let status = child.wait().context("wait for command")?;

    let logged_out = join_reader(stdout_handle).context("join stdout")?;
    let logged_err = join_reader(stderr_handle).context("join stderr")?;

    if let Ok(mut writer) = log.lock() {
        writer.flush().context("flush log")?;
    }

    debug!(exit_code = ?status.code(), "command finished");
    Ok(StreamedRun {
        status,
        logged_bytes: logged_out + logged_err,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<u64>>) -> Result<u64> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Copy `reader` line by line to the echo target and the shared log.
fn tee_lines<R: Read>(reader: R, echo: Echo, log: SharedLog) -> Result<u64> {
    let mut buf_reader = BufReader::new(reader);
    let mut copied = 0u64;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        let echoed = match echo {
            Echo::Stdout => write_flush(&mut io::stdout().lock(), &line),
            Echo::Stderr => write_flush(&mut io::stderr().lock(), &line),
            Echo::Silent => Ok(()),
        };
        if let Err(e) = echoed {
            warn!(err = %e, "failed to echo child output");
        }

        if let Ok(mut writer) = log.lock() {
            // Flush per line so the log can be tailed while the agent runs.
            if let Err(e) = write_flush(&mut *writer, &line) {
                warn!(err = %e, "failed to write to log file");
            }
        }
        copied += n as u64;
    }

    Ok(copied)
}

fn write_flush<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes)?;
    writer.flush()
}
