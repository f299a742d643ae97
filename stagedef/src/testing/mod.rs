//! Testing utilities for stage definitions.
//!
//! This module provides:
//! - An in-memory [`crate::fs::FileSystem`]
//! - Definition and document fixtures
//! - Log capture for asserting on emitted warnings

mod fixtures;
mod logs;
mod mocks;

pub use fixtures::{make_entry_definition, make_foreach_definition, TestDocument};
pub use logs::{capture_logs, CapturedLogs};
pub use mocks::MemoryFileSystem;
