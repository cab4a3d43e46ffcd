//! Shared test utilities for nca integration tests.
//!
//! This module provides:
//! - `TestHarness` for queueing and draining pipelines in a temp directory
//! - `IssueBuilder` for issues in a given workflow state

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
