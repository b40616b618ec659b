//! Durable store layer for the task scheduling engine.
//!
//! Owns the Postgres schema (tasks, execution logs, cluster mutex), the
//! connection pool, and every query the engine and the operator API run
//! against it. No scheduling policy lives here -- this crate only knows how
//! to read and write rows.

pub mod config;
pub mod errors;
pub mod models;
pub mod pool;
pub mod queries;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
