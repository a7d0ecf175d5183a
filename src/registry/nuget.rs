//! NuGet V3 protocol client.
//!
//! Resources are discovered from the service index once per accessor:
//! - `SearchQueryService` to list an owner's packages
//! - `RegistrationsBaseUrl` to read every version of a package
//! - `PackagePublish` to unlist a version
//!
//! Search results are paged until an empty page comes back. Registration
//! pages that are not inlined in the index are fetched separately.

use std::{
    collections::{HashSet, VecDeque},
    future::Future,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{
    PackageIdFilter, RegistryAccessor, RegistryAccessorFactory, RegistryError, retry::with_retry,
};
use crate::{config::RegistryConfig, models::PackageVersionRecord};

const API_KEY_HEADER: &str = "X-NuGet-ApiKey";

const SEARCH_TYPES: &[&str] = &[
    "SearchQueryService/3.5.0",
    "SearchQueryService/3.0.0-rc",
    "SearchQueryService",
];
// The 3.6.0 hive includes SemVer 2.0.0 packages.
const REGISTRATION_TYPES: &[&str] = &[
    "RegistrationsBaseUrl/3.6.0",
    "RegistrationsBaseUrl/3.4.0",
    "RegistrationsBaseUrl",
];
const PUBLISH_TYPES: &[&str] = &["PackagePublish/2.0.0"];

/// Builds [`NuGetRegistry`] accessors sharing one HTTP client.
pub struct NuGetRegistryFactory {
    client: Client,
    config: RegistryConfig,
}

impl NuGetRegistryFactory {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

impl RegistryAccessorFactory for NuGetRegistryFactory {
    fn accessor(&self, source_url: &str, api_key: &str) -> Arc<dyn RegistryAccessor> {
        Arc::new(NuGetRegistry::new(
            self.client.clone(),
            self.config.clone(),
            source_url,
            api_key,
        ))
    }
}

/// Accessor for one NuGet V3 feed with one API key.
pub struct NuGetRegistry {
    client: Client,
    config: RegistryConfig,
    index_url: String,
    api_key: String,
    resources: OnceCell<ServiceResources>,
}

#[derive(Debug, Clone)]
struct ServiceResources {
    search: String,
    registrations: String,
    publish: String,
}

impl NuGetRegistry {
    pub fn new(
        client: Client,
        config: RegistryConfig,
        index_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            index_url: index_url.into(),
            api_key: api_key.into(),
            resources: OnceCell::new(),
        }
    }

    async fn resources(&self) -> Result<&ServiceResources, RegistryError> {
        self.resources
            .get_or_try_init(|| self.load_service_index())
            .await
    }

    async fn load_service_index(&self) -> Result<ServiceResources, RegistryError> {
        let index: ServiceIndex = self.get_json(&self.index_url, "service_index").await?;
        let find = |types: &[&str], resource: &'static str| {
            types
                .iter()
                .find_map(|t| {
                    index
                        .resources
                        .iter()
                        .find(|r| r.resource_type == *t)
                        .map(|r| r.id.clone())
                })
                .ok_or_else(|| RegistryError::ServiceIndex {
                    url: self.index_url.clone(),
                    resource,
                })
        };

        let resources = ServiceResources {
            search: find(SEARCH_TYPES, "SearchQueryService")?,
            registrations: find(REGISTRATION_TYPES, "RegistrationsBaseUrl")?,
            publish: find(PUBLISH_TYPES, "PackagePublish")?,
        };
        tracing::debug!(
            index = %self.index_url,
            search = %resources.search,
            registrations = %resources.registrations,
            publish = %resources.publish,
            "Resolved NuGet service index"
        );
        Ok(resources)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &str,
    ) -> Result<T, RegistryError> {
        let response =
            with_retry(&self.config.retry, operation, || self.client.get(url).send()).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                status,
                url: url.to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(format!("{url}: {e}")))
    }

    async fn search_page(
        &self,
        owner: &str,
        skip: usize,
    ) -> Result<Vec<SearchResult>, RegistryError> {
        let resources = self.resources().await?;
        let mut url = Url::parse(&resources.search).map_err(|e| {
            RegistryError::InvalidResponse(format!("invalid search URL {}: {e}", resources.search))
        })?;
        url.query_pairs_mut()
            .append_pair("q", &format!("owner:{owner}"))
            .append_pair("skip", &skip.to_string())
            .append_pair("take", &self.config.page_size.to_string())
            .append_pair("prerelease", "true")
            .append_pair("semVerLevel", "2.0.0");

        let response: SearchResponse = self.get_json(url.as_str(), "search").await?;
        Ok(response.data)
    }

    async fn package_records(
        &self,
        package_id: &str,
        owners: &str,
    ) -> Result<Vec<PackageVersionRecord>, RegistryError> {
        let resources = self.resources().await?;
        let base = resources.registrations.trim_end_matches('/');
        let url = format!("{base}/{}/index.json", package_id.to_lowercase());

        let index: RegistrationIndex = match self.get_json(&url, "registration").await {
            Ok(index) => index,
            // Packages without any version have no registration.
            Err(RegistryError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for page in index.items {
            let leaves = match page.items {
                Some(leaves) => leaves,
                None => {
                    let page: RegistrationPage =
                        self.get_json(&page.id, "registration_page").await?;
                    page.items.unwrap_or_default()
                }
            };
            records.extend(
                leaves
                    .into_iter()
                    .map(|leaf| leaf.catalog_entry.into_record(package_id, owners)),
            );
        }

        tracing::debug!(
            package_id = package_id,
            versions = records.len(),
            "Fetched package registration"
        );
        Ok(records)
    }

    /// Records of the next package the scan reaches, or `None` once the
    /// search is exhausted.
    async fn next_batch(
        &self,
        scan: &mut OwnerScan,
        owner: &str,
        filter: &(dyn Fn(&str) -> bool + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<PackageVersionRecord>>, RegistryError> {
        loop {
            if let Some((package_id, owners)) = scan.pending.pop_front() {
                let records =
                    cancellable(cancel, self.package_records(&package_id, &owners)).await?;
                return Ok(Some(records));
            }
            if scan.exhausted {
                return Ok(None);
            }

            let page = cancellable(cancel, self.search_page(owner, scan.skip)).await?;
            if page.is_empty() {
                scan.exhausted = true;
                continue;
            }
            scan.skip += page.len();

            for result in page {
                if !filter(&result.id) {
                    tracing::debug!(
                        owner = owner,
                        package_id = %result.id,
                        "Package not covered by any package group"
                    );
                    continue;
                }
                if scan.seen.insert(result.id.clone()) {
                    scan.pending.push_back((result.id, result.owners.joined()));
                }
            }
        }
    }
}

#[async_trait]
impl RegistryAccessor for NuGetRegistry {
    fn owner_records<'a>(
        &'a self,
        owner: &'a str,
        filter: PackageIdFilter,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<PackageVersionRecord, RegistryError>> {
        stream::try_unfold(OwnerScan::default(), move |mut scan| {
            let filter = Arc::clone(&filter);
            async move {
                let batch = self
                    .next_batch(&mut scan, owner, filter.as_ref(), cancel)
                    .await;
                batch.map(|records| records.map(|records| (records, scan)))
            }
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, RegistryError>)))
        .try_flatten()
        .boxed()
    }

    async fn unlist(
        &self,
        package_id: &str,
        original_version: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        let resources = cancellable(cancel, self.resources()).await?;
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let base = resources.publish.trim_end_matches('/');
        let url = format!("{base}/{package_id}/{original_version}");

        let response = with_retry(&self.config.retry, "unlist", || {
            self.client
                .delete(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .send()
        })
        .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound {
                package_id: package_id.to_string(),
                version: original_version.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized {
                package_id: package_id.to_string(),
            }),
            status => Err(RegistryError::Status { status, url }),
        }
    }
}

#[derive(Default)]
struct OwnerScan {
    skip: usize,
    exhausted: bool,
    seen: HashSet<String>,
    /// `(package id, owners)` waiting for their registration fetch.
    pending: VecDeque<(String, String)>,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T, RegistryError>>,
) -> Result<T, RegistryError> {
    cancel
        .run_until_cancelled(operation)
        .await
        .unwrap_or(Err(RegistryError::Cancelled))
}

#[derive(Debug, Deserialize)]
struct ServiceIndex {
    #[serde(default)]
    resources: Vec<ServiceResource>,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    resource_type: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
    #[serde(default)]
    owners: Owners,
}

/// Feeds report owners either as a single string or as a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Owners {
    One(String),
    Many(Vec<String>),
}

impl Default for Owners {
    fn default() -> Self {
        Owners::Many(Vec::new())
    }
}

impl Owners {
    fn joined(&self) -> String {
        match self {
            Owners::One(owner) => owner.clone(),
            Owners::Many(owners) => owners.join(", "),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationIndex {
    #[serde(default)]
    items: Vec<RegistrationPage>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPage {
    #[serde(rename = "@id")]
    id: String,
    items: Option<Vec<RegistrationLeaf>>,
}

#[derive(Debug, Deserialize)]
struct RegistrationLeaf {
    #[serde(rename = "catalogEntry")]
    catalog_entry: CatalogEntry,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    version: String,
    #[serde(default = "default_listed")]
    listed: bool,
    published: Option<String>,
    deprecation: Option<Deprecation>,
}

#[derive(Debug, Deserialize)]
struct Deprecation {
    #[serde(default)]
    reasons: Vec<String>,
}

fn default_listed() -> bool {
    true
}

impl CatalogEntry {
    fn into_record(self, package_id: &str, owners: &str) -> PackageVersionRecord {
        let published = self
            .published
            .as_deref()
            .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
            .map(|p| p.with_timezone(&Utc));
        let deprecated = self
            .deprecation
            .is_some_and(|d| !d.reasons.is_empty());

        PackageVersionRecord::from_token(
            package_id,
            owners,
            self.version,
            published,
            self.listed,
            deprecated,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    use super::*;
    use crate::{config::RetryConfig, models::PackageVersion};

    fn test_config(page_size: u32) -> RegistryConfig {
        RegistryConfig {
            page_size,
            retry: RetryConfig {
                enabled: false,
                ..RetryConfig::default()
            },
            ..RegistryConfig::default()
        }
    }

    fn registry(server: &MockServer, page_size: u32) -> NuGetRegistry {
        NuGetRegistry::new(
            Client::new(),
            test_config(page_size),
            format!("{}/v3/index.json", server.uri()),
            "secret",
        )
    }

    async fn mount_service_index(server: &MockServer) {
        let uri = server.uri();
        Mock::given(method("GET"))
            .and(path("/v3/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": "3.0.0",
                "resources": [
                    { "@id": format!("{uri}/query"), "@type": "SearchQueryService" },
                    { "@id": format!("{uri}/reg-old/"), "@type": "RegistrationsBaseUrl" },
                    { "@id": format!("{uri}/reg/"), "@type": "RegistrationsBaseUrl/3.6.0" },
                    { "@id": format!("{uri}/publish"), "@type": "PackagePublish/2.0.0" },
                ]
            })))
            .mount(server)
            .await;
    }

    async fn mount_search_page(server: &MockServer, skip: &str, data: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("q", "owner:me"))
            .and(query_param("skip", skip))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
            .mount(server)
            .await;
    }

    fn allow_all() -> PackageIdFilter {
        Arc::new(|_: &str| true)
    }

    #[tokio::test]
    async fn test_owner_records_pages_search_and_registrations() {
        let server = MockServer::start().await;
        mount_service_index(&server).await;
        mount_search_page(
            &server,
            "0",
            json!([
                { "id": "My.A", "version": "1.1.0", "owners": ["me", "you"] },
                { "id": "Other", "version": "1.0.0", "owners": "me" },
            ]),
        )
        .await;
        mount_search_page(
            &server,
            "2",
            json!([{ "id": "My.B", "version": "2.0.0", "owners": "me" }]),
        )
        .await;
        mount_search_page(&server, "3", json!([])).await;

        Mock::given(method("GET"))
            .and(path("/reg/my.a/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "@id": "inline",
                    "items": [
                        { "catalogEntry": {
                            "version": "1.0.0",
                            "listed": false,
                            "published": "1900-01-01T00:00:00+00:00"
                        } },
                        { "catalogEntry": {
                            "version": "1.1.0-pre1",
                            "published": "2000-01-10T12:00:00+00:00",
                            "deprecation": { "reasons": ["Legacy"] }
                        } }
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let paged = format!("{}/reg/my.b/page/0.json", server.uri());
        Mock::given(method("GET"))
            .and(path("/reg/my.b/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "@id": paged }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reg/my.b/page/0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "@id": "page",
                "items": [{ "catalogEntry": { "version": "2.0.0" } }]
            })))
            .mount(&server)
            .await;

        let registry = registry(&server, 2);
        let cancel = CancellationToken::new();
        let filter: PackageIdFilter = Arc::new(|id: &str| id.starts_with("My."));
        let records: Vec<_> = registry
            .owner_records("me", filter, &cancel)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.package_id, "My.A");
        assert_eq!(first.owners, "me, you");
        assert!(!first.is_listed);

        let preview = &records[1];
        assert_eq!(preview.original_version.as_deref(), Some("1.1.0-pre1"));
        assert!(preview.is_prerelease);
        assert!(preview.is_deprecated);
        assert_eq!(
            preview.publish_date,
            Some(Utc.with_ymd_and_hms(2000, 1, 10, 12, 0, 0).unwrap())
        );

        let paged = &records[2];
        assert_eq!(paged.package_id, "My.B");
        assert_eq!(paged.version, Some(PackageVersion::new(2, 0, 0, 0)));
        assert!(paged.is_listed);
        assert_eq!(paged.publish_date, None);
    }

    #[tokio::test]
    async fn test_missing_registration_yields_no_records() {
        let server = MockServer::start().await;
        mount_service_index(&server).await;
        mount_search_page(&server, "0", json!([{ "id": "Ghost", "owners": "me" }])).await;
        mount_search_page(&server, "1", json!([])).await;
        Mock::given(method("GET"))
            .and(path("/reg/ghost/index.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let registry = registry(&server, 1);
        let cancel = CancellationToken::new();
        let records: Vec<_> = registry
            .owner_records("me", allow_all(), &cancel)
            .try_collect()
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_search_failure_surfaces_status() {
        let server = MockServer::start().await;
        mount_service_index(&server).await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = registry(&server, 20);
        let cancel = CancellationToken::new();
        let result: Result<Vec<_>, _> = registry
            .owner_records("me", allow_all(), &cancel)
            .try_collect()
            .await;

        assert!(matches!(
            result,
            Err(RegistryError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_service_index_without_publish_resource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [
                    { "@id": "https://example/query", "@type": "SearchQueryService" },
                    { "@id": "https://example/reg/", "@type": "RegistrationsBaseUrl" },
                ]
            })))
            .mount(&server)
            .await;

        let registry = registry(&server, 20);
        let cancel = CancellationToken::new();
        let err = registry.unlist("Pkg", "1.0.0", &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ServiceIndex {
                resource: "PackagePublish",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unlist_sends_delete_with_api_key() {
        let server = MockServer::start().await;
        mount_service_index(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/publish/My.A/1.1.0-pre1"))
            .and(header(API_KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry(&server, 20);
        let cancel = CancellationToken::new();
        registry.unlist("My.A", "1.1.0-pre1", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlist_maps_error_statuses() {
        let server = MockServer::start().await;
        mount_service_index(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/publish/Gone/1.0.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/publish/Locked/1.0.0"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let registry = registry(&server, 20);
        let cancel = CancellationToken::new();
        assert!(matches!(
            registry.unlist("Gone", "1.0.0", &cancel).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            registry.unlist("Locked", "1.0.0", &cancel).await,
            Err(RegistryError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_any_request() {
        let server = MockServer::start().await;
        mount_service_index(&server).await;

        let registry = registry(&server, 20);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<Vec<_>, _> = registry
            .owner_records("me", allow_all(), &cancel)
            .try_collect()
            .await;
        assert!(matches!(result, Err(RegistryError::Cancelled)));

        let unlisted = registry.unlist("Pkg", "1.0.0", &cancel).await;
        assert!(matches!(unlisted, Err(RegistryError::Cancelled)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
