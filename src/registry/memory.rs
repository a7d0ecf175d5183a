//! In-memory registry.
//!
//! Holds published records in process and applies unlists to them. Used by
//! the test suite and for rehearsing a configuration against known data.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{PackageIdFilter, RegistryAccessor, RegistryAccessorFactory, RegistryError};
use crate::models::PackageVersionRecord;

/// A registry whose packages live in memory.
///
/// Clones share state, so a test can keep a handle and inspect the registry
/// after a run.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<MemoryState>>,
    api_key: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    records: Vec<PackageVersionRecord>,
    unlists: Vec<(String, String)>,
    failing_owners: HashSet<String>,
    failing_unlists: HashSet<(String, String)>,
}

impl MemoryRegistry {
    pub fn new(records: impl IntoIterator<Item = PackageVersionRecord>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                records: records.into_iter().collect(),
                ..MemoryState::default()
            })),
            api_key: None,
        }
    }

    /// Reject unlists that do not carry `key`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Whether every record of the version is listed. `None` if the version
    /// is unknown.
    pub async fn is_listed(&self, package_id: &str, original_version: &str) -> Option<bool> {
        let state = self.state.lock().await;
        let mut matching = state
            .records
            .iter()
            .filter(|r| is_version(r, package_id, original_version))
            .peekable();
        matching.peek()?;
        Some(matching.all(|r| r.is_listed))
    }

    /// Successful unlist calls as `(package id, version)`, in call order.
    pub async fn unlists(&self) -> Vec<(String, String)> {
        self.state.lock().await.unlists.clone()
    }

    /// Make every fetch for `owner` fail.
    pub async fn fail_fetches_for(&self, owner: impl Into<String>) {
        self.state.lock().await.failing_owners.insert(owner.into());
    }

    /// Make unlisting one version fail.
    pub async fn fail_unlist_of(&self, package_id: impl Into<String>, version: impl Into<String>) {
        self.state
            .lock()
            .await
            .failing_unlists
            .insert((package_id.into(), version.into()));
    }
}

fn is_version(record: &PackageVersionRecord, package_id: &str, original_version: &str) -> bool {
    record.package_id.eq_ignore_ascii_case(package_id)
        && record.original_version.as_deref() == Some(original_version)
}

fn is_owned_by(record: &PackageVersionRecord, owner: &str) -> bool {
    record
        .owners
        .split(',')
        .any(|o| o.trim().eq_ignore_ascii_case(owner))
}

#[async_trait]
impl RegistryAccessor for MemoryRegistry {
    fn owner_records<'a>(
        &'a self,
        owner: &'a str,
        filter: PackageIdFilter,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<PackageVersionRecord, RegistryError>> {
        let fetch = async move {
            if cancel.is_cancelled() {
                return vec![Err(RegistryError::Cancelled)];
            }

            let state = self.state.lock().await;
            if state.failing_owners.contains(owner) {
                return vec![Err(RegistryError::Status {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    url: format!("memory://owners/{owner}"),
                })];
            }

            state
                .records
                .iter()
                .filter(|r| is_owned_by(r, owner) && filter(&r.package_id))
                .cloned()
                .map(Ok)
                .collect()
        };

        stream::once(fetch).flat_map(stream::iter).boxed()
    }

    async fn unlist(
        &self,
        package_id: &str,
        original_version: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let mut state = self.state.lock().await;
        if state
            .failing_unlists
            .contains(&(package_id.to_string(), original_version.to_string()))
        {
            return Err(RegistryError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                url: format!("memory://packages/{package_id}/{original_version}"),
            });
        }

        let mut found = false;
        for record in state
            .records
            .iter_mut()
            .filter(|r| is_version(r, package_id, original_version))
        {
            record.is_listed = false;
            found = true;
        }
        if !found {
            return Err(RegistryError::NotFound {
                package_id: package_id.to_string(),
                version: original_version.to_string(),
            });
        }

        state
            .unlists
            .push((package_id.to_string(), original_version.to_string()));
        Ok(())
    }
}

/// Routes source URLs to [`MemoryRegistry`] instances.
#[derive(Clone, Default)]
pub struct MemoryRegistryFactory {
    sources: HashMap<String, MemoryRegistry>,
}

impl MemoryRegistryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, url: impl Into<String>, registry: MemoryRegistry) -> Self {
        self.sources.insert(url.into(), registry);
        self
    }
}

impl RegistryAccessorFactory for MemoryRegistryFactory {
    fn accessor(&self, source_url: &str, api_key: &str) -> Arc<dyn RegistryAccessor> {
        let registry = self.sources.get(source_url).cloned().unwrap_or_default();
        Arc::new(KeyedAccessor {
            registry,
            api_key: api_key.to_string(),
        })
    }
}

/// A [`MemoryRegistry`] seen through one API key.
struct KeyedAccessor {
    registry: MemoryRegistry,
    api_key: String,
}

#[async_trait]
impl RegistryAccessor for KeyedAccessor {
    fn owner_records<'a>(
        &'a self,
        owner: &'a str,
        filter: PackageIdFilter,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<PackageVersionRecord, RegistryError>> {
        self.registry.owner_records(owner, filter, cancel)
    }

    async fn unlist(
        &self,
        package_id: &str,
        original_version: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        if let Some(expected) = &self.registry.api_key
            && *expected != self.api_key
        {
            return Err(RegistryError::Unauthorized {
                package_id: package_id.to_string(),
            });
        }
        self.registry
            .unlist(package_id, original_version, cancel)
            .await
    }
}
