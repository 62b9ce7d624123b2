//! Tasks over version control.
//!
//! Task records live in a branch-scoped snapshot named by a versioned pointer
//! (a git ref by default). Every write is an optimistic compare-and-swap so
//! several processes, including agents dispatched by `vtask run`, can share one
//! queue. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (readiness, ids, invariants,
//!   immutability, checklist rendering). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (pointer stores, git, process
//!   execution, config, logs). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`store`], [`linker`], [`agent_loop`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod agent_loop;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod linker;
pub mod logging;
pub mod settings;
pub mod store;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
