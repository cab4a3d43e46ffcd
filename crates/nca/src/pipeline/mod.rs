//! Queues ordered job chains.
//!
//! A pipeline is written in a single transaction: the pipeline row, every
//! job, and any state change on the issue or batch it targets. Only the
//! first job is runnable; each later job is released by its predecessor's
//! success.

mod composer;
pub mod recipes;

pub use composer::{queue_for_batch, queue_for_issue, queue_simple};
