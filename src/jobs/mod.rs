//! Background job infrastructure for the package cleaner.
//!
//! - **Package Cleanup**: Periodically unlists package versions that fall
//!   outside their package group's retention policy.
//!
//! Jobs follow a consistent pattern:
//! 1. Configuration in `config/worker.rs`
//! 2. Worker function that runs in a loop with configurable interval
//! 3. Run function that performs a single pass
//! 4. Structured result type for tracking state
//! 5. Metrics for monitoring operations
//!
//! # Example
//!
//! ```toml
//! [worker]
//! interval_secs = 86400
//! dry_run = true
//! max_unlists_per_run = 100
//! ```

mod package_cleanup;

pub use package_cleanup::{CleanupRunResult, run_package_cleanup, start_package_cleanup_worker};
