//! I/O helpers: snapshot storage, git, processes, and on-disk artifacts.

pub mod config;
pub mod executor;
pub mod git;
pub mod git_store;
pub mod init;
pub mod pointer;
pub mod process;
pub mod prompt;
pub mod snapshot;
pub mod task_log;
