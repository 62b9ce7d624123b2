//! Deterministic, pure logic shared by the task store and agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! snapshots and return deterministic outputs suitable for tests.

pub mod checklist;
pub mod ids;
pub mod immutability;
pub mod invariants;
pub mod ready;
