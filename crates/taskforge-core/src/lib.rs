//! Scheduling and execution engine for the task scheduler.
//!
//! Owns the poller, the per-task executor pipeline, the handler registry,
//! the stale-lock reaper, and alert emission. Holds no HTTP surface of its
//! own -- `taskforge-cli` wires this crate's `EngineConfig` and `run_replica`
//! entry point to a CLI subcommand and, separately, serves the operator API
//! directly against `taskforge-db`.

pub mod alert;
pub mod backoff;
pub mod config;
pub mod executor;
pub mod handler;
pub mod instance;
pub mod poller;
pub mod reaper;
