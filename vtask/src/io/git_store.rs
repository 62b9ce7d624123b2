//! Snapshot pointer kept in a git ref (`refs/vtask/<branch>`).
//!
//! Each write stores the encoded snapshot as a blob and swaps the ref with
//! `git update-ref <ref> <new> <old>`, which git performs atomically under its
//! own ref lock. Sharing the tasks is `git push origin 'refs/vtask/*'`.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::git::Git;
use crate::io::pointer::{Observed, SnapshotStore, SwapOutcome, Version};
use crate::io::snapshot::{decode_snapshot, encode_snapshot};
use crate::task::Task;

pub const REF_PREFIX: &str = "refs/vtask/";

#[derive(Debug, Clone)]
pub struct GitRefStore {
    git: Git,
    ref_name: String,
}

impl GitRefStore {
    pub fn new(git: Git, branch: &str) -> Self {
        Self {
            git,
            ref_name: format!("{REF_PREFIX}{branch}"),
        }
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }
}

impl SnapshotStore for GitRefStore {
    fn read(&self) -> Result<Observed> {
        let Some(oid) = self.git.resolve_ref(&self.ref_name)? else {
            debug!(ref_name = %self.ref_name, "no snapshot yet");
            return Ok(Observed::empty());
        };
        let bytes = self.git.cat_blob(&oid)?;
        let contents = String::from_utf8(bytes)
            .with_context(|| format!("snapshot {oid} is not utf-8"))?;
        let tasks =
            decode_snapshot(&contents).with_context(|| format!("decode {}", self.ref_name))?;
        Ok(Observed {
            tasks,
            version: Some(Version::new(oid)),
        })
    }

    #[instrument(skip_all, fields(ref_name = %self.ref_name))]
    fn compare_and_swap(&self, expected: Option<&Version>, next: &[Task]) -> Result<SwapOutcome> {
        let encoded = encode_snapshot(next)?;
        let new_oid = self.git.hash_object(encoded.as_bytes())?;
        let old = expected.map(Version::as_str);
        if self.git.update_ref(&self.ref_name, &new_oid, old)? {
            return Ok(SwapOutcome::Swapped(Version::new(new_oid)));
        }

        let current = self.git.resolve_ref(&self.ref_name)?;
        if current.as_deref() != old {
            debug!(?current, ?old, "pointer moved");
            return Ok(SwapOutcome::Conflict);
        }
        Err(anyhow!(
            "git update-ref {} failed with the pointer unchanged",
            self.ref_name
        ))
    }
}
