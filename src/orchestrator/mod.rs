//! Session orchestration modules.
//!
//! Covers the single live gateway session, the process-wide slot that keeps
//! it unique, and teardown of the gateway process tree.

pub mod reaper;
pub mod session;
pub mod slot;
