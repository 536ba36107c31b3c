//! Integration test suite for warden.
//!
//! These tests drive the orchestrator end to end against an in-memory
//! session host, with the registry and ledgers on a temporary workspace.
//!
//! # Test Categories
//!
//! - `admission`: limit and hierarchy enforcement
//! - `lifecycle`: kill, reconciliation, failed session starts
//! - `ledger`: progress/finding reports and the views built from them
//! - `concurrency`: parallel deploys and reports against one task

mod fixtures;

mod admission;
mod concurrency;
mod ledger;
mod lifecycle;
