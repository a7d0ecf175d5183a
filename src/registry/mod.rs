//! # Registry accessors
//!
//! The cleanup run talks to package registries only through
//! [`RegistryAccessor`]: stream every version record of an owner's packages,
//! and unlist one version. [`nuget`] implements it against the NuGet V3
//! protocol; [`memory`] is an in-process registry used by tests and dry
//! experiments.
//!
//! Accessor streams may yield records in any order and may repeat records.

mod error;
pub mod memory;
pub mod nuget;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
pub use error::RegistryError;
use futures::stream::BoxStream;
pub use memory::{MemoryRegistry, MemoryRegistryFactory};
pub use nuget::{NuGetRegistry, NuGetRegistryFactory};
use tokio_util::sync::CancellationToken;

use crate::models::PackageVersionRecord;

/// Decides which package ids of an owner are fetched.
pub type PackageIdFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Read and unlist access to one registry with one API key.
#[async_trait]
pub trait RegistryAccessor: Send + Sync {
    /// Stream every version record of the owner's packages accepted by
    /// `filter`.
    ///
    /// The stream ends with [`RegistryError::Cancelled`] once `cancel` fires.
    fn owner_records<'a>(
        &'a self,
        owner: &'a str,
        filter: PackageIdFilter,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<PackageVersionRecord, RegistryError>>;

    /// Unlist one published version.
    ///
    /// A request already sent is allowed to complete even if `cancel` fires.
    async fn unlist(
        &self,
        package_id: &str,
        original_version: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError>;
}

/// Creates accessors for configured sources.
pub trait RegistryAccessorFactory: Send + Sync {
    fn accessor(&self, source_url: &str, api_key: &str) -> Arc<dyn RegistryAccessor>;
}
