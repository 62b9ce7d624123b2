//! Resolving the project, branch, and backend for one CLI invocation.
//!
//! This is the only place that reads the environment; everything below it
//! receives explicit [`Settings`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::io::config::{Backend, VtaskConfig, load_config};
use crate::io::git::Git;
use crate::io::git_store::GitRefStore;
use crate::io::init::VtaskPaths;
use crate::io::pointer::{FileStore, SnapshotStore};
use crate::settings::{ACTOR_ENV, Settings, agent_mode_from_env, resolve_actor};
use crate::store::{StoreOptions, TaskStore};

/// Environment variable overriding the branch tasks are scoped to.
pub const BRANCH_ENV: &str = "VTASK_BRANCH";

/// Branch used by the file backend outside a git repository.
const DEFAULT_BRANCH: &str = "main";

/// A type-erased store, as selected by config.
pub type DynStore = Box<dyn SnapshotStore>;

#[derive(Debug, Clone)]
pub struct Workspace {
    pub paths: VtaskPaths,
    pub config: VtaskConfig,
    pub settings: Settings,
    /// `None` outside a git repository.
    git: Option<Git>,
}

/// Project root for `dir`: the enclosing repository's top level, else `dir`.
pub fn project_root(dir: &Path) -> Result<PathBuf> {
    Ok(Git::new(dir).toplevel()?.unwrap_or_else(|| dir.to_path_buf()))
}

impl Workspace {
    /// Resolve the workspace containing `dir`, reading the environment through `env`.
    pub fn open(dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let git = Git::new(dir);
        let toplevel = git.toplevel()?;
        let root = toplevel.clone().unwrap_or_else(|| dir.to_path_buf());
        let git = toplevel.map(Git::new);

        let paths = VtaskPaths::new(&root);
        let config = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;

        let branch = match (env(BRANCH_ENV).filter(|b| !b.trim().is_empty()), &git) {
            (Some(branch), _) => branch,
            (None, Some(git)) => git.current_branch()?,
            (None, None) if config.backend == Backend::File => DEFAULT_BRANCH.to_string(),
            (None, None) => {
                return Err(anyhow!(
                    "not a git repository (set backend = \"file\" in .vtask/config.toml)"
                ));
            }
        };
        let git_user = match &git {
            Some(git) => git.config_value("user.name")?,
            None => None,
        };
        let actor = resolve_actor(env(ACTOR_ENV), git_user);
        let agent_mode = agent_mode_from_env(&env);
        debug!(root = %root.display(), %branch, %actor, agent_mode, "resolved workspace");

        Ok(Self {
            paths,
            config,
            settings: Settings::new(agent_mode, actor, branch),
            git,
        })
    }

    /// The repository, for operations that need one (commits).
    pub fn git(&self) -> Result<&Git> {
        self.git
            .as_ref()
            .ok_or_else(|| anyhow!("not a git repository: {}", self.paths.root.display()))
    }

    /// Build the configured snapshot backend for the current branch.
    pub fn snapshot_store(&self) -> Result<DynStore> {
        let branch = &self.settings.branch;
        let store: DynStore = match self.config.backend {
            Backend::Git => Box::new(GitRefStore::new(self.git()?.clone(), branch)),
            Backend::File => Box::new(FileStore::new(&self.paths.tasks_dir, branch)),
        };
        Ok(store)
    }

    pub fn task_store(&self) -> Result<TaskStore<DynStore>> {
        Ok(TaskStore::new(
            self.snapshot_store()?,
            self.settings.clone(),
            StoreOptions::from_config(&self.config),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::write_config;
    use crate::test_support::init_git_repo;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn git_repo_supplies_branch_and_actor() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let nested = temp.path().join("src");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let ws = Workspace::open(&nested, env(&[])).expect("open");

        assert_eq!(ws.settings.branch, "main");
        assert_eq!(ws.settings.actor, "vtask tests");
        assert!(!ws.settings.agent_mode);
        assert_eq!(
            ws.paths.root.canonicalize().expect("canon"),
            temp.path().canonicalize().expect("canon")
        );
    }

    #[test]
    fn env_overrides_actor_and_enables_agent_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());

        let ws = Workspace::open(
            temp.path(),
            env(&[("VTASK_ACTOR", "ci"), ("VTASK_AGENT_MODE", "1")]),
        )
        .expect("open");

        assert_eq!(ws.settings.attribution(), "agent:ci");
    }

    #[test]
    fn file_backend_works_outside_git() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = VtaskPaths::new(temp.path());
        write_config(
            &paths.config_path,
            &VtaskConfig {
                backend: Backend::File,
                ..VtaskConfig::default()
            },
        )
        .expect("write config");

        let ws = Workspace::open(temp.path(), env(&[])).expect("open");
        let store = ws.task_store().expect("store");
        let task = store.add("write tests", None).expect("add");

        assert_eq!(ws.settings.branch, "main");
        assert_eq!(ws.settings.actor, "unknown");
        assert_eq!(store.get(&task.id).expect("get"), task);
    }

    #[test]
    fn git_backend_requires_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Workspace::open(temp.path(), env(&[])).unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }
}
