//! HTTP adapter for an slskd-compatible search/transfer API.
//!
//! | operation | request |
//! |-----------|---------|
//! | search | `POST /api/v0/searches` `{searchText}` |
//! | search results | `GET /api/v0/searches/{id}/responses` |
//! | enqueue | `POST /api/v0/transfers/downloads/{username}` `[{filename, size}]` |
//! | queue | `GET /api/v0/transfers/downloads` |
//! | cancel | `DELETE /api/v0/transfers/downloads/{username}/{id}?remove=true` |
//!
//! Transfer status and cancellation are resolved through the queue listing,
//! since the service addresses single transfers by peer as well as id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::error::UpstreamError;
use super::service::{Result, TransferService};
use super::types::{EnqueueFile, RawSearchHit, TransferStatus};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SearchCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PeerResponse {
    username: String,
    #[serde(default)]
    files: Vec<RawSearchHit>,
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    #[serde(default)]
    enqueued: Vec<EnqueuedTransfer>,
}

#[derive(Debug, Deserialize)]
struct EnqueuedTransfer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserTransfers {
    username: String,
    #[serde(default)]
    directories: Vec<DirectoryTransfers>,
}

#[derive(Debug, Deserialize)]
struct DirectoryTransfers {
    #[serde(default)]
    files: Vec<TransferStatus>,
}

/// [`TransferService`] over HTTP.
#[derive(Debug, Clone)]
pub struct SlskdService {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl SlskdService {
    /// Creates an adapter for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidUrl`] if `base_url` does not parse, or
    /// [`UpstreamError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| UpstreamError::invalid_url(base_url, e))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .user_agent(format!("trackhound/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::network("client", e))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::invalid_url(format!("{}{path}", self.base_url), e))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, endpoint: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(endpoint, e))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(UpstreamError::http_status(endpoint, status.as_u16()))
        }
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response, endpoint: &str) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(endpoint, e))?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::decode(endpoint, e))
    }
}

#[async_trait]
impl TransferService for SlskdService {
    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<String> {
        let endpoint = "api/v0/searches";
        let url = self.endpoint(endpoint)?;
        let body = serde_json::json!({ "searchText": query });
        let response = self
            .send(self.request(Method::POST, url).json(&body), endpoint)
            .await?;
        let created: SearchCreated = Self::json(response, endpoint).await?;
        debug!(search_id = %created.id, "search started");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn search_results(&self, search_id: &str) -> Result<Vec<RawSearchHit>> {
        let endpoint = format!("api/v0/searches/{}/responses", urlencoding::encode(search_id));
        let url = self.endpoint(&endpoint)?;
        let response = self.send(self.request(Method::GET, url), &endpoint).await?;
        let peers: Vec<PeerResponse> = Self::json(response, &endpoint).await?;

        let hits: Vec<RawSearchHit> = peers
            .into_iter()
            .flat_map(|peer| {
                let username = peer.username;
                peer.files.into_iter().map(move |file| RawSearchHit {
                    username: username.clone(),
                    ..file
                })
            })
            .collect();
        debug!(count = hits.len(), "search responses collected");
        Ok(hits)
    }

    #[instrument(skip(self, files), fields(count = files.len()))]
    async fn enqueue_download(
        &self,
        username: &str,
        files: &[EnqueueFile],
    ) -> Result<Option<String>> {
        let endpoint = format!("api/v0/transfers/downloads/{}", urlencoding::encode(username));
        let url = self.endpoint(&endpoint)?;
        let response = self
            .send(self.request(Method::POST, url).json(files), &endpoint)
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(endpoint.as_str(), e))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let enqueued: EnqueueResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::decode(endpoint.as_str(), e))?;
        Ok(enqueued.enqueued.into_iter().next().map(|t| t.id))
    }

    #[instrument(skip(self))]
    async fn download_status(&self, transfer_id: &str) -> Result<Option<TransferStatus>> {
        Ok(self
            .list_queue()
            .await?
            .into_iter()
            .find(|transfer| transfer.id == transfer_id))
    }

    #[instrument(skip(self))]
    async fn cancel_download(&self, transfer_id: &str) -> Result<()> {
        let Some(transfer) = self.download_status(transfer_id).await? else {
            debug!("transfer already gone");
            return Ok(());
        };

        let endpoint = format!(
            "api/v0/transfers/downloads/{}/{}",
            urlencoding::encode(&transfer.username),
            urlencoding::encode(transfer_id)
        );
        let mut url = self.endpoint(&endpoint)?;
        url.query_pairs_mut().append_pair("remove", "true");

        match self.send(self.request(Method::DELETE, url), &endpoint).await {
            Err(UpstreamError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    #[instrument(skip(self))]
    async fn list_queue(&self) -> Result<Vec<TransferStatus>> {
        let endpoint = "api/v0/transfers/downloads";
        let url = self.endpoint(endpoint)?;
        let response = self.send(self.request(Method::GET, url), endpoint).await?;
        let users: Vec<UserTransfers> = Self::json(response, endpoint).await?;

        Ok(users
            .into_iter()
            .flat_map(|user| {
                let username = user.username;
                user.directories
                    .into_iter()
                    .flat_map(|directory| directory.files)
                    .map(move |transfer| TransferStatus {
                        username: if transfer.username.is_empty() {
                            username.clone()
                        } else {
                            transfer.username
                        },
                        ..transfer
                    })
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gains_trailing_slash() {
        let service = SlskdService::new("http://localhost:5030/slskd", None).unwrap();
        assert_eq!(
            service.endpoint("api/v0/searches").unwrap().as_str(),
            "http://localhost:5030/slskd/api/v0/searches"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = SlskdService::new("not a url", None).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidUrl { .. }));
    }

    #[test]
    fn test_blank_api_key_is_dropped() {
        let service = SlskdService::new("http://localhost:5030", Some("  ".to_string())).unwrap();
        assert!(service.api_key.is_none());
    }
}
