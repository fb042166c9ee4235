//! Stage-graph execution.
//!
//! This module provides:
//! - The invoice stage graph and its branch decisions
//! - The durable executor that steps, suspends and resumes runs
//! - Retry policies for routed operations

mod executor;
pub mod graph;
pub mod retry;

#[cfg(test)]
mod integration_tests;

pub use executor::{Executor, ResumeOutcome};
pub use graph::{decide, next_stage, status_after};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryError, RetryState};
