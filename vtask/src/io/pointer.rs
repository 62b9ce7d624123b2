//! Versioned pointer abstraction over a branch's snapshot.
//!
//! The [`SnapshotStore`] trait decouples `TaskStore` from the durable medium.
//! `GitRefStore` keeps the pointer in a git ref; [`FileStore`] keeps it in a
//! plain file guarded by a lock file. Tests use an in-memory store.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::io::snapshot::{decode_snapshot, encode_snapshot};
use crate::task::Task;

/// Opaque version of a snapshot as named by the pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub tasks: Vec<Task>,
    /// `None` when the pointer does not exist yet.
    pub version: Option<Version>,
}

impl Observed {
    pub fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            version: None,
        }
    }
}

/// Result of a compare-and-swap attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped(Version),
    /// The pointer moved since it was observed. Nothing was written.
    Conflict,
}

/// Atomic read / compare-and-swap of a named pointer.
pub trait SnapshotStore {
    fn read(&self) -> Result<Observed>;

    /// Point at `next` only if the pointer is still at `expected`.
    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
    fn read(&self) -> Result<Observed> {
        (**self).read()
    }

    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        (**self).compare_and_swap(expected, next)
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Arc<S> {
    fn read(&self) -> Result<Observed> {
        (**self).read()
    }

    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        (**self).compare_and_swap(expected, next)
    }
}

/// Lock files older than this are considered abandoned by a crashed writer.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

/// Snapshot kept at `<dir>/<branch>.jsonl`, versioned by content hash.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn new(dir: &Path, branch: &str) -> Self {
        let path = dir.join(format!("{}.jsonl", branch.replace('/', "__")));
        let lock_path = path.with_extension("jsonl.lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", self.path.display())),
        }
    }

    fn try_lock(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(_) => Ok(Some(LockGuard {
                path: self.lock_path.clone(),
            })),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if lock_is_stale(&self.lock_path) {
                    self.reclaim_stale_lock();
                }
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("lock {}", self.lock_path.display())),
        }
    }

    /// Move a stale lock aside, then delete it.
    ///
    /// Only one of several writers can rename the same file. If the file it
    /// moved is fresh, another writer re-created the lock after the staleness
    /// check, so it is linked back into place.
    fn reclaim_stale_lock(&self) {
        let aside = self
            .lock_path
            .with_extension(format!("jsonl.lock.stale-{:016x}", rand::random::<u64>()));
        match fs::rename(&self.lock_path, &aside) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                warn!(err = %err, path = %self.lock_path.display(), "failed to move stale lock aside");
                return;
            }
        }
        if lock_is_stale(&aside) {
            warn!(path = %self.lock_path.display(), "removed stale lock");
        } else if let Err(err) = fs::hard_link(&aside, &self.lock_path) {
            warn!(err = %err, path = %self.lock_path.display(), "failed to restore live lock");
        }
        if let Err(err) = fs::remove_file(&aside) {
            warn!(err = %err, path = %aside.display(), "failed to remove stale lock");
        }
    }
}

impl SnapshotStore for FileStore {
    fn read(&self) -> Result<Observed> {
        let Some(contents) = self.read_raw()? else {
            debug!(path = %self.path.display(), "no snapshot yet");
            return Ok(Observed::empty());
        };
        let tasks = decode_snapshot(&contents)
            .with_context(|| format!("decode {}", self.path.display()))?;
        Ok(Observed {
            tasks,
            version: Some(content_version(&contents)),
        })
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        let Some(_guard) = self.try_lock()? else {
            debug!("lock held by another writer");
            return Ok(SwapOutcome::Conflict);
        };
        let current = self.read_raw()?.map(|contents| content_version(&contents));
        if current.as_ref() != expected {
            debug!(?current, ?expected, "pointer moved");
            return Ok(SwapOutcome::Conflict);
        }
        let encoded = encode_snapshot(next)?;
        let tmp_path = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp_path, &encoded)
            .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        Ok(SwapOutcome::Swapped(content_version(&encoded)))
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(err = %err, path = %self.path.display(), "failed to release lock");
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AFTER)
}

fn content_version(contents: &str) -> Version {
    Version(hex::encode(Sha256::digest(contents.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn missing_file_reads_as_empty_unversioned() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path(), "main");
        assert_eq!(store.read().expect("read"), Observed::empty());
    }

    #[test]
    fn swap_from_observed_version_succeeds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path(), "feature/x");
        let outcome = store
            .compare_and_swap(None, &[task("aaaaaa", "a")])
            .expect("swap");
        let SwapOutcome::Swapped(version) = outcome else {
            panic!("expected swap, got {outcome:?}");
        };

        let observed = store.read().expect("read");
        assert_eq!(observed.version, Some(version));
        assert_eq!(observed.tasks.len(), 1);
        assert!(store.path().ends_with("feature__x.jsonl"));
    }

    #[test]
    fn swap_from_stale_version_conflicts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path(), "main");
        store
            .compare_and_swap(None, &[task("aaaaaa", "a")])
            .expect("first swap");

        let outcome = store
            .compare_and_swap(None, &[task("bbbbbb", "b")])
            .expect("second swap");
        assert_eq!(outcome, SwapOutcome::Conflict);
        assert_eq!(store.read().expect("read").tasks[0].id, "aaaaaa");
    }

    #[test]
    fn held_lock_reports_conflict() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path(), "main");
        fs::write(&store.lock_path, "").expect("hold lock");

        let outcome = store
            .compare_and_swap(None, &[task("aaaaaa", "a")])
            .expect("swap");
        assert_eq!(outcome, SwapOutcome::Conflict);
        assert!(!store.path().exists());
    }

    fn age_lock(store: &FileStore) {
        fs::write(&store.lock_path, "").expect("hold lock");
        fs::File::options()
            .write(true)
            .open(&store.lock_path)
            .expect("open lock")
            .set_modified(SystemTime::now() - Duration::from_secs(120))
            .expect("age lock");
    }

    fn leftover_stale_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".stale-"))
            .count()
    }

    #[test]
    fn stale_lock_is_reclaimed_then_swap_succeeds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path(), "main");
        age_lock(&store);

        let first = store
            .compare_and_swap(None, &[task("aaaaaa", "a")])
            .expect("swap");
        assert_eq!(first, SwapOutcome::Conflict);
        assert!(!store.lock_path.exists());
        assert_eq!(leftover_stale_files(temp.path()), 0);

        let second = store
            .compare_and_swap(None, &[task("aaaaaa", "a")])
            .expect("swap");
        assert!(matches!(second, SwapOutcome::Swapped(_)));
    }

    #[test]
    fn reclaim_puts_back_a_lock_recreated_after_the_check() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path(), "main");
        fs::write(&store.lock_path, "").expect("fresh lock");

        store.reclaim_stale_lock();

        assert!(store.lock_path.exists());
        assert_eq!(leftover_stale_files(temp.path()), 0);
        let outcome = store
            .compare_and_swap(None, &[task("aaaaaa", "a")])
            .expect("swap");
        assert_eq!(outcome, SwapOutcome::Conflict);
    }
}
