//! Retention-policy driven unlisting of stale package versions.
//!
//! The cleaner reads every version an owner has published to a NuGet V3
//! feed, groups them by package and version, and unlists the versions that
//! fall outside the retention policy of the package group they belong to.
//!
//! - [`config`]: TOML configuration
//! - [`snapshot`]: configuration resolved for one run
//! - [`registry`]: registry access (NuGet V3 and in-memory)
//! - [`cleanup`]: aggregation and retention decisions, free of I/O
//! - [`jobs`]: the run orchestrator and the scheduled worker

pub mod cleanup;
pub mod config;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod registry;
pub mod snapshot;

#[cfg(test)]
mod tests;
