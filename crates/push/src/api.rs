//! Remote binary cache protocol.

use crate::error::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::LARGE_NAR_THRESHOLD;
use ferry_core::config::{PushCache, validate_cache_name};
use ferry_core::narinfo::NarInfoCreate;
use ferry_core::store_path::StorePathHash;
use futures::Stream;
use reqwest::{StatusCode, Url};
use std::pin::Pin;

/// Streaming request body for a compressed NAR.
pub type NarBody = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Answer to a narinfo existence probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NarInfoStatus {
    Found,
    NotFound,
}

/// The cache operations a push needs. All calls authenticate with the
/// cache's bearer token.
#[async_trait]
pub trait CacheApi: Send + Sync {
    /// Probe a single narinfo. A rejected credential is
    /// `Err(ApiError::Unauthorized)`.
    async fn narinfo_head(
        &self,
        cache: &PushCache,
        hash: &StorePathHash,
    ) -> Result<NarInfoStatus, ApiError>;

    /// Probe many narinfos at once; returns the hashes the cache lacks.
    async fn narinfo_bulk(
        &self,
        cache: &PushCache,
        hashes: &[StorePathHash],
    ) -> Result<Vec<String>, ApiError>;

    /// Stream a compressed NAR. `nar_size` is the uncompressed size, used for
    /// routing only.
    async fn upload_nar(
        &self,
        cache: &PushCache,
        hash: &StorePathHash,
        nar_size: u64,
        body: NarBody,
    ) -> Result<(), ApiError>;

    async fn create_narinfo(
        &self,
        cache: &PushCache,
        hash: &StorePathHash,
        narinfo: &NarInfoCreate,
    ) -> Result<(), ApiError>;
}

/// [`CacheApi`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpCacheClient {
    http: reqwest::Client,
    host: Url,
    subdomain_routing: bool,
}

impl HttpCacheClient {
    pub fn new(host: &str, subdomain_routing: bool) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ferry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(http, host, subdomain_routing)
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(
        http: reqwest::Client,
        host: &str,
        subdomain_routing: bool,
    ) -> Result<Self, ApiError> {
        let host = Url::parse(host.trim_end_matches('/'))
            .map_err(|e| ApiError::Url(format!("invalid server URL {host}: {e}")))?;
        if !matches!(host.scheme(), "http" | "https") {
            return Err(ApiError::Url(format!(
                "server URL must be http or https: {host}"
            )));
        }
        Ok(Self {
            http,
            host,
            subdomain_routing,
        })
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    /// URL a NAR of `nar_size` uncompressed bytes is posted to.
    ///
    /// Uploads go to `<cache>.<host>` unless subdomain routing is off, the
    /// host is an IP address, or the NAR exceeds [`LARGE_NAR_THRESHOLD`].
    /// Large NARs are sent to the base host in one request; there is no
    /// multipart upload yet.
    pub fn upload_url(
        &self,
        cache: &str,
        hash: &StorePathHash,
        nar_size: u64,
    ) -> Result<Url, ApiError> {
        let prefix = cache_prefix(cache)?;
        let mut base = self.host.clone();
        if self.subdomain_routing
            && nar_size <= LARGE_NAR_THRESHOLD
            && let Some(domain) = self.host.domain()
        {
            let subdomain = format!("{cache}.{domain}");
            base.set_host(Some(&subdomain))
                .map_err(|e| ApiError::Url(format!("invalid cache host {subdomain}: {e}")))?;
        }
        endpoint(&base, &format!("{prefix}/nar/{hash}"))
    }

    fn narinfo_url(&self, cache: &str, hash: &StorePathHash) -> Result<Url, ApiError> {
        endpoint(&self.host, &format!("{}/{hash}.narinfo", cache_prefix(cache)?))
    }
}

/// `api/v1/cache/<cache>`, rejecting names that would escape the path segment.
fn cache_prefix(cache: &str) -> Result<String, ApiError> {
    validate_cache_name(cache).map_err(|e| ApiError::Url(e.to_string()))?;
    Ok(format!("api/v1/cache/{cache}"))
}

fn endpoint(base: &Url, tail: &str) -> Result<Url, ApiError> {
    let raw = format!("{}/{tail}", base.as_str().trim_end_matches('/'));
    Url::parse(&raw).map_err(|e| ApiError::Url(format!("{raw}: {e}")))
}

/// Map non-success statuses to errors, consuming the body for the message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CacheApi for HttpCacheClient {
    async fn narinfo_head(
        &self,
        cache: &PushCache,
        hash: &StorePathHash,
    ) -> Result<NarInfoStatus, ApiError> {
        let url = self.narinfo_url(&cache.name, hash)?;
        let response = self
            .http
            .head(url)
            .bearer_auth(cache.secret.token())
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(NarInfoStatus::NotFound),
            _ => {
                check_status(response).await?;
                Ok(NarInfoStatus::Found)
            }
        }
    }

    async fn narinfo_bulk(
        &self,
        cache: &PushCache,
        hashes: &[StorePathHash],
    ) -> Result<Vec<String>, ApiError> {
        let url = endpoint(&self.host, &format!("{}/narinfo", cache_prefix(&cache.name)?))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(cache.secret.token())
            .json(hashes)
            .send()
            .await?;
        let missing = check_status(response).await?.json().await?;
        Ok(missing)
    }

    async fn upload_nar(
        &self,
        cache: &PushCache,
        hash: &StorePathHash,
        nar_size: u64,
        body: NarBody,
    ) -> Result<(), ApiError> {
        let url = self.upload_url(&cache.name, hash, nar_size)?;
        tracing::debug!(%url, nar_size, "Uploading NAR");
        let response = self
            .http
            .post(url)
            .bearer_auth(cache.secret.token())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn create_narinfo(
        &self,
        cache: &PushCache,
        hash: &StorePathHash,
        narinfo: &NarInfoCreate,
    ) -> Result<(), ApiError> {
        let url = self.narinfo_url(&cache.name, hash)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(cache.secret.token())
            .json(narinfo)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
