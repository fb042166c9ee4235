//! Test helpers for invoiceflow runs.
//!
//! This module provides:
//! - Scenario documents (an exactly matching invoice and a mismatching one)
//! - Stage doubles that count or fail executions
//! - Assertions over run records and transition events

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_no_review_created, assert_revisions_increasing, assert_run_status};
pub use fixtures::{
    scenario_a_invoice, scenario_b_invoice, scenario_po, simulated_erp, SCENARIO_PO_NUMBER,
};
pub use mocks::{CountingStage, FailingStage};
