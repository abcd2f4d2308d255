//! Insight orchestrator
//!
//! Client-side core of a natural-language analytics tool: ingest a tabular
//! file straight into object storage and register it as a dataset, then ask
//! questions against it and receive a fast chart-ready result followed by a
//! narrative. Long-running backend work is followed with a generic job poller.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
