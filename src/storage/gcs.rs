//! Cloud Storage backend over the JSON API.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | list   | `GET  /storage/v1/b/{bucket}/o?pageToken=…` |
//! | copy   | `POST /storage/v1/b/{src}/o/{key}/rewriteTo/b/{dst}/o/{key}` |
//! | delete | `DELETE /storage/v1/b/{bucket}/o/{key}` |
//! | probe  | `GET  /storage/v1/b/{bucket}/iam/testPermissions` |
//!
//! `rewriteTo` is used rather than `copyTo` because it works for objects of
//! any size: large rewrites return `done: false` plus a `rewriteToken`, and
//! the call is repeated until the service reports completion. A completed
//! rewrite is a committed object.
//!
//! HTTP status mapping: 404 → `NotFound`, 401/403 → `PermissionDenied`,
//! everything else (429, 5xx, other 4xx, network errors) → `Transient`.

use super::{Access, ObjectLocator, ObjectStore, ObjectStream};
use crate::error::{MigrateError, StorageError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Production endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// OAuth2 bearer token, e.g. from `gcloud auth print-access-token`.
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Endpoint override honoured by the Cloud Storage client libraries.
pub const EMULATOR_ENV: &str = "STORAGE_EMULATOR_HOST";

/// Connection settings for [`GcsStore`].
#[derive(Clone)]
pub struct GcsConfig {
    /// Base URL. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,
    /// Bearer token. None sends unauthenticated requests (emulators).
    pub access_token: Option<String>,
    /// Per-request timeout. Default: 60 s.
    pub request_timeout: Duration,
    /// Objects per listing page (1–1000). Default: 1000.
    pub page_size: u32,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(60),
            page_size: 1000,
        }
    }
}

impl fmt::Debug for GcsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsConfig")
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl GcsConfig {
    /// Read [`TOKEN_ENV`] and [`EMULATOR_ENV`] over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(EMULATOR_ENV) {
            if !host.trim().is_empty() {
                config.endpoint = host.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.access_token = Some(token.trim().to_string());
            }
        }
        config
    }
}

/// Parse an endpoint, assuming `http://` for bare `host:port` emulator values.
fn parse_endpoint(endpoint: &str) -> Result<Url, MigrateError> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| {
        MigrateError::InvalidConfig(format!("invalid storage endpoint '{endpoint}': {e}"))
    })?;
    if url.cannot_be_a_base() {
        return Err(MigrateError::InvalidConfig(format!(
            "invalid storage endpoint '{endpoint}'"
        )));
    }
    Ok(url)
}

/// Map a non-success HTTP status onto the storage error taxonomy.
pub(crate) fn classify_status(status: StatusCode, context: &str, body: &str) -> StorageError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("{context}: HTTP {} {}", status.as_u16(), snippet.trim());
    match status.as_u16() {
        404 => StorageError::NotFound(detail),
        401 | 403 => StorageError::PermissionDenied(detail),
        _ => StorageError::Transient(detail),
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<T, StorageError> {
    serde_json::from_slice(body)
        .map_err(|e| StorageError::Transient(format!("{context}: malformed response: {e}")))
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    #[serde(default)]
    done: bool,
    rewrite_token: Option<String>,
    total_bytes_rewritten: Option<String>,
    object_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermissionsResponse {
    #[serde(default)]
    permissions: Vec<String>,
}

// ── Store ────────────────────────────────────────────────────────────────

/// Cloud Storage client. Cheap to clone.
#[derive(Clone)]
pub struct GcsStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    page_size: u32,
}

impl fmt::Debug for GcsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsStore")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GcsStore {
    pub fn new(config: GcsConfig) -> Result<Self, MigrateError> {
        let base = parse_endpoint(&config.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MigrateError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            token: config.access_token,
            page_size: config.page_size.clamp(1, 1000),
        })
    }

    /// Build from [`GcsConfig::from_env`].
    pub fn from_env() -> Result<Self, MigrateError> {
        Self::new(GcsConfig::from_env())
    }

    /// `{base}/storage/v1/{segments…}`, each segment percent-encoded
    /// (including `/` inside object names).
    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Transient(format!("endpoint {} has no path", self.base)))?
            .pop_if_empty()
            .extend(["storage", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, req: RequestBuilder, context: &str) -> Result<Vec<u8>, StorageError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req
            .send()
            .await
            .map_err(|e| StorageError::Transient(format!("{context}: {e}")))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Transient(format!("{context}: {e}")))?;
        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(classify_status(status, context, &String::from_utf8_lossy(&body)))
        }
    }

    async fn fetch_page(
        &self,
        bucket: &str,
        token: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let mut url = self.url(&["b", bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &self.page_size.to_string());
            query.append_pair("fields", "items(name),nextPageToken");
            if let Some(t) = token {
                query.append_pair("pageToken", t);
            }
        }
        let context = format!("list gs://{bucket}");
        let body = self.execute(self.client.get(url), &context).await?;
        parse_json(&body, &context)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn name(&self) -> &'static str {
        "gcs"
    }

    async fn probe(&self, container: &str, access: Access) -> Result<(), StorageError> {
        let permission = match access {
            Access::Read => "storage.objects.list",
            Access::Write => "storage.objects.create",
        };
        let mut url = self.url(&["b", container, "iam", "testPermissions"])?;
        url.query_pairs_mut().append_pair("permissions", permission);

        let context = format!("probe gs://{container}");
        let body = self.execute(self.client.get(url), &context).await?;
        let granted: PermissionsResponse = parse_json(&body, &context)?;
        if granted.permissions.iter().any(|p| p == permission) {
            Ok(())
        } else {
            Err(StorageError::PermissionDenied(format!(
                "{context}: missing {permission}"
            )))
        }
    }

    fn list(&self, container: &str) -> ObjectStream {
        let store = self.clone();
        let bucket = container.to_string();

        // State: None = exhausted, Some(token) = fetch the page after `token`.
        let pages = stream::unfold(Some(None::<String>), move |state| {
            let store = store.clone();
            let bucket = bucket.clone();
            async move {
                let token = state?;
                match store.fetch_page(&bucket, token.as_deref()).await {
                    Ok(page) => {
                        let next = page
                            .next_page_token
                            .filter(|t| !t.is_empty())
                            .map(Some);
                        let items: Vec<Result<ObjectLocator, StorageError>> = page
                            .items
                            .into_iter()
                            .map(|o| Ok(ObjectLocator::new(bucket.clone(), o.name)))
                            .collect();
                        debug!("gs://{}: listed page of {} objects", bucket, items.len());
                        Some((items, next))
                    }
                    Err(e) => Some((vec![Err(e)], None)),
                }
            }
        });

        Box::pin(pages.flat_map(stream::iter))
    }

    async fn copy(
        &self,
        source: &ObjectLocator,
        destination: &str,
    ) -> Result<ObjectLocator, StorageError> {
        let context = format!("rewrite gs://{source} -> gs://{destination}");
        let mut rewrite_token: Option<String> = None;

        loop {
            let mut url = self.url(&[
                "b",
                source.container(),
                "o",
                source.key(),
                "rewriteTo",
                "b",
                destination,
                "o",
                source.key(),
            ])?;
            if let Some(t) = &rewrite_token {
                url.query_pairs_mut().append_pair("rewriteToken", t);
            }

            let req = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_LENGTH, "0");
            let body = self.execute(req, &context).await?;
            let resp: RewriteResponse = parse_json(&body, &context)?;

            if resp.done {
                return Ok(source.in_container(destination));
            }

            debug!(
                "{}: {} of {} bytes",
                context,
                resp.total_bytes_rewritten.as_deref().unwrap_or("?"),
                resp.object_size.as_deref().unwrap_or("?")
            );
            rewrite_token = match resp.rewrite_token {
                Some(t) if !t.is_empty() => Some(t),
                _ => {
                    return Err(StorageError::Transient(format!(
                        "{context}: rewrite incomplete without a continuation token"
                    )))
                }
            };
        }
    }

    async fn delete(&self, locator: &ObjectLocator) -> Result<(), StorageError> {
        let url = self.url(&["b", locator.container(), "o", locator.key()])?;
        let context = format!("delete gs://{locator}");
        self.execute(self.client.delete(url), &context).await?;
        Ok(())
    }
}
