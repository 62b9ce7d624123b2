//! Initialization helpers for `.vtask/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{Backend, VtaskConfig, write_config};

/// All canonical paths within `.vtask/` for a project root.
#[derive(Debug, Clone)]
pub struct VtaskPaths {
    pub root: PathBuf,
    pub vtask_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub logs_dir: PathBuf,
    /// Snapshot directory for the file backend.
    pub tasks_dir: PathBuf,
    /// Presence asks a running loop to stop after the current dispatch.
    pub stop_path: PathBuf,
}

impl VtaskPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let vtask_dir = root.join(".vtask");
        Self {
            root: root.clone(),
            vtask_dir: vtask_dir.clone(),
            config_path: vtask_dir.join("config.toml"),
            gitignore_path: vtask_dir.join(".gitignore"),
            logs_dir: vtask_dir.join("logs"),
            tasks_dir: vtask_dir.join("tasks"),
            stop_path: vtask_dir.join("STOP"),
        }
    }
}

/// Options for `init_vtask`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
    pub backend: Backend,
}

/// Create `.vtask/` scaffolding in `root`.
///
/// Fails if the config already exists unless `options.force` is set. Existing
/// snapshots and logs are never touched.
pub fn init_vtask(root: &Path, options: &InitOptions) -> Result<VtaskPaths> {
    let paths = VtaskPaths::new(root);
    if paths.vtask_dir.exists() && !paths.vtask_dir.is_dir() {
        return Err(anyhow!("vtask init: .vtask exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "vtask init: .vtask/config.toml already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.vtask_dir)?;
    create_dir(&paths.logs_dir)?;
    if options.backend == Backend::File {
        create_dir(&paths.tasks_dir)?;
    }

    let config = VtaskConfig {
        backend: options.backend,
        ..VtaskConfig::default()
    };
    write_config(&paths.config_path, &config)?;
    fs::write(&paths.gitignore_path, VTASK_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;

    Ok(paths)
}

/// Write `.vtask/.gitignore` unless one exists, so logs and the stop file stay untracked.
pub fn ensure_gitignore(paths: &VtaskPaths) -> Result<()> {
    if paths.gitignore_path.exists() {
        return Ok(());
    }
    create_dir(&paths.vtask_dir)?;
    fs::write(&paths.gitignore_path, VTASK_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const VTASK_GITIGNORE: &str = "logs/\nSTOP\n";
