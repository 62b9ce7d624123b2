//! Short task id minting.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::task::{Task, find};

/// Number of hex characters in a task id.
pub const ID_LEN: usize = 6;

/// Derive an id from content, creation time, and a salt.
pub fn mint_id(content: &str, at: &DateTime<Utc>, salt: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update([0u8]);
    hasher.update(salt.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..ID_LEN].to_string()
}

/// Mint an id unused in `existing`, drawing a fresh salt per attempt.
///
/// Returns `None` once `max_attempts` salts all collided (or `salts` ran dry).
pub fn mint_unique_id<I>(
    existing: &[Task],
    content: &str,
    at: &DateTime<Utc>,
    salts: I,
    max_attempts: u32,
) -> Option<String>
where
    I: IntoIterator<Item = u64>,
{
    salts
        .into_iter()
        .take(max_attempts as usize)
        .map(|salt| mint_id(content, at, salt))
        .find(|id| find(existing, id).is_none())
}
