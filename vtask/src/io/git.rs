//! Git adapter for task storage and commit linking.
//!
//! Snapshots live as blobs named by a ref, and commits are created through the
//! porcelain, so we keep a small, explicit wrapper around `git` subprocess calls.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::linker::CommitCreator;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the repository top-level directory, or `None` outside a repository.
    pub fn toplevel(&self) -> Result<Option<PathBuf>> {
        let output = self.run(&["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(PathBuf::from(path)))
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        // `symbolic-ref` also works on an unborn branch, unlike `rev-parse --abbrev-ref`.
        let output = self.run(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.status.success() {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (tasks are scoped to a branch)"));
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Return the full HEAD commit id.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Read a config value; `None` when unset.
    pub fn config_value(&self, key: &str) -> Result<Option<String>> {
        let output = self.run(&["config", "--get", key])?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(value).filter(|v| !v.is_empty()))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Write `contents` into the object database as a blob and return its id.
    #[instrument(skip_all, fields(bytes = contents.len()))]
    pub fn hash_object(&self, contents: &[u8]) -> Result<String> {
        let mut child = Command::new("git")
            .args(["hash-object", "-w", "--stdin"])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawn git hash-object")?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            stdin.write_all(contents).context("write blob to git")?;
        }
        let output = child.wait_with_output().context("wait for git hash-object")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git hash-object failed: {}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Read a blob's contents.
    pub fn cat_blob(&self, oid: &str) -> Result<Vec<u8>> {
        Ok(self.run_checked(&["cat-file", "blob", oid])?.stdout)
    }

    /// Resolve a ref to an object id; `None` when the ref does not exist.
    pub fn resolve_ref(&self, name: &str) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", name])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Atomically move `name` to `new` if it currently points at `old`.
    ///
    /// `old = None` requires the ref to be absent; git reads an empty old value
    /// that way whatever the object format. Returns Ok(false) when git refused
    /// the update, leaving the caller to decide whether the ref moved.
    #[instrument(skip_all, fields(name))]
    pub fn update_ref(&self, name: &str, new: &str, old: Option<&str>) -> Result<bool> {
        let old = old.unwrap_or("");
        let output = self.run(&["update-ref", name, new, old])?;
        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "update-ref refused"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl CommitCreator for Git {
    /// Stage everything and commit; fails when there is nothing to commit.
    fn create_commit(&self, message: &str) -> Result<String> {
        self.add_all()?;
        if !self.commit_staged(message)? {
            return Err(anyhow!("nothing to commit"));
        }
        self.head_sha()
    }

    fn head_commit(&self) -> Result<Option<String>> {
        self.resolve_ref("HEAD")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_git_repo;

    #[test]
    fn toplevel_is_none_outside_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        assert_eq!(git.toplevel().expect("toplevel"), None);
    }

    #[test]
    fn blob_round_trips_through_object_database() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let git = Git::new(temp.path());

        let oid = git.hash_object(b"hello\n").expect("hash");
        assert_eq!(git.cat_blob(&oid).expect("cat"), b"hello\n");
    }

    #[test]
    fn update_ref_refuses_wrong_old_value() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let git = Git::new(temp.path());
        let first = git.hash_object(b"one\n").expect("hash");
        let second = git.hash_object(b"two\n").expect("hash");

        assert!(git.update_ref("refs/vtask/test", &first, None).expect("create"));
        assert!(!git.update_ref("refs/vtask/test", &second, None).expect("recreate"));
        assert!(
            git.update_ref("refs/vtask/test", &second, Some(first.as_str()))
                .expect("advance")
        );
        assert_eq!(
            git.resolve_ref("refs/vtask/test").expect("resolve"),
            Some(second)
        );
    }

    #[test]
    fn create_commit_returns_head() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let git = Git::new(temp.path());

        std::fs::write(temp.path().join("new.txt"), "x\n").expect("write");
        let commit = git.create_commit("feat: add file").expect("commit");
        assert_eq!(commit, git.head_sha().expect("head"));

        let err = git.create_commit("empty").unwrap_err();
        assert!(err.to_string().contains("nothing to commit"));
    }

    #[test]
    fn head_commit_is_none_on_unborn_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let status = Command::new("git")
            .args(["init", "--quiet", "--initial-branch=main"])
            .current_dir(temp.path())
            .status()
            .expect("git init");
        assert!(status.success());
        let git = Git::new(temp.path());
        assert_eq!(git.head_commit().expect("head"), None);

        let born = tempfile::tempdir().expect("tempdir");
        init_git_repo(born.path());
        let git = Git::new(born.path());
        assert_eq!(
            git.head_commit().expect("head"),
            Some(git.head_sha().expect("sha"))
        );
    }

    #[test]
    fn update_ref_creates_in_sha256_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = Command::new("git")
            .args(["init", "--quiet", "--object-format=sha256"])
            .current_dir(temp.path())
            .status()
            .expect("git init");
        if !init.success() {
            // git built without sha256 support
            return;
        }
        let git = Git::new(temp.path());
        let blob = git.hash_object(b"one\n").expect("hash");
        assert_eq!(blob.len(), 64);

        assert!(git.update_ref("refs/vtask/main", &blob, None).expect("create"));
        assert!(!git.update_ref("refs/vtask/main", &blob, None).expect("recreate"));
    }
}
