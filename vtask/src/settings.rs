//! Explicit per-process settings for task operations.
//!
//! Built once at the CLI edge; the store, linker, and loop never read the
//! environment themselves.

use crate::io::executor::AGENT_MODE_ENV;

/// Environment variable overriding the attributed author.
pub const ACTOR_ENV: &str = "VTASK_ACTOR";

/// Markers exported by the agents we dispatch; either one implies agent mode.
const AGENT_MARKERS: &[&str] = &["CLAUDECODE", "CODEX_SANDBOX"];

const AGENT_PREFIX: &str = "agent:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Disables `edit`/`delete` and marks attribution as an agent's.
    pub agent_mode: bool,
    /// Recorded as `created_by` on new tasks.
    pub actor: String,
    /// Branch whose task collection is addressed.
    pub branch: String,
}

impl Settings {
    pub fn new(agent_mode: bool, actor: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            agent_mode,
            actor: actor.into(),
            branch: branch.into(),
        }
    }

    /// Settings for a human operator.
    pub fn human(actor: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::new(false, actor, branch)
    }

    /// Settings for a process running under an agent.
    pub fn agent(actor: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::new(true, actor, branch)
    }

    /// Value written to `created_by`.
    pub fn attribution(&self) -> String {
        if self.agent_mode && !self.actor.starts_with(AGENT_PREFIX) {
            format!("{AGENT_PREFIX}{}", self.actor)
        } else {
            self.actor.clone()
        }
    }
}

/// Decide agent mode from an environment lookup.
pub fn agent_mode_from_env(lookup: impl Fn(&str) -> Option<String>) -> bool {
    let explicit = lookup(AGENT_MODE_ENV)
        .map(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0"
        })
        .unwrap_or(false);
    explicit || AGENT_MARKERS.iter().any(|name| lookup(name).is_some())
}

/// Pick the actor name: explicit env override, then git identity, then `unknown`.
pub fn resolve_actor(env_actor: Option<String>, git_user: Option<String>) -> String {
    [env_actor, git_user]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
