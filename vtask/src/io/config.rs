//! vtask configuration stored under `.vtask/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::executor::ExecutorKind;

/// vtask configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VtaskConfig {
    /// Where the snapshot pointer lives.
    pub backend: Backend,

    /// Compare-and-swap attempts per write before surfacing a conflict.
    pub max_write_attempts: u32,

    /// Linear backoff step between conflicting attempts, in milliseconds.
    pub retry_backoff_ms: u64,

    /// Salts to try before giving up on a unique id.
    pub max_id_attempts: u32,

    pub run: RunConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `refs/vtask/<branch>` in the enclosing repository.
    Git,
    /// `.vtask/tasks/<branch>.jsonl` guarded by a lock file.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Built-in executor used when `vtask run` gets no selector flag.
    pub executor: ExecutorKind,

    /// Model passed to the built-in executor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Pause between dispatches, in seconds.
    pub delay_secs: u64,

    /// Consecutive failures on one task before it is skipped for the run.
    pub max_failures: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::Claude,
            model: None,
            delay_secs: 0,
            max_failures: 3,
        }
    }
}

impl Default for VtaskConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Git,
            max_write_attempts: 5,
            retry_backoff_ms: 20,
            max_id_attempts: 8,
            run: RunConfig::default(),
        }
    }
}

impl VtaskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_write_attempts == 0 {
            return Err(anyhow!("max_write_attempts must be > 0"));
        }
        if self.max_id_attempts == 0 {
            return Err(anyhow!("max_id_attempts must be > 0"));
        }
        if self.run.max_failures == 0 {
            return Err(anyhow!("run.max_failures must be > 0"));
        }
        if self
            .run
            .model
            .as_deref()
            .is_some_and(|model| model.trim().is_empty())
        {
            return Err(anyhow!("run.model must not be empty when set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `VtaskConfig::default()`.
pub fn load_config(path: &Path) -> Result<VtaskConfig> {
    if !path.exists() {
        let cfg = VtaskConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: VtaskConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &VtaskConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
