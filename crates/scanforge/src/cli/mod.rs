//! Command-line interface for the scan orchestrator.

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod jobs;
pub mod output;
pub mod scan;
pub mod worker;
