//! Scan orchestrator - CLI library crate.
//!
//! Houses the command surface and the process-wide wiring (database pool,
//! scan executor construction) that `main` assembles once and hands down
//! to whichever subcommand runs.

pub mod cli;
pub mod telemetry;
