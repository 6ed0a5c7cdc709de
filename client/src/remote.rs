//! Transport to the sync server.

use crate::error::{Result, SyncError};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tillsync_engine::{PullQuery, PullResponse, PushRequest, PushResponse};

/// The remote system of record.
///
/// Implementations only move bytes; every decision about the answers is
/// made by the engine.
pub trait Remote: Send + Sync + 'static {
    fn push(
        &self,
        tenant_id: &str,
        request: &PushRequest,
    ) -> impl Future<Output = Result<PushResponse>> + Send;

    fn pull(
        &self,
        tenant_id: &str,
        query: &PullQuery,
    ) -> impl Future<Output = Result<PullResponse>> + Send;

    /// Whether the server answers at all.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;
}

/// HTTP client for the `/sync/push` and `/sync/pull` endpoints.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: reqwest::RequestBuilder, tenant_id: &str) -> reqwest::RequestBuilder {
        let builder = builder.header("X-Tenant-Id", tenant_id);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(response.json().await?)
    }
}

/// Map a failed response to an error. Server trouble and throttling are
/// retried; anything else the server refused needs a fix on this side.
fn status_error(status: StatusCode, body: String) -> SyncError {
    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable {
        SyncError::TransientNetwork(format!("server returned status {}: {}", status, body))
    } else {
        SyncError::Refused {
            status: status.as_u16(),
            message: body,
        }
    }
}

impl Remote for HttpRemote {
    async fn push(&self, tenant_id: &str, request: &PushRequest) -> Result<PushResponse> {
        let response = self
            .request(
                self.client.post(format!("{}/sync/push", self.base_url)),
                tenant_id,
            )
            .json(request)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn pull(&self, tenant_id: &str, query: &PullQuery) -> Result<PullResponse> {
        let mut params = vec![
            ("table", query.table.clone()),
            ("cursor", query.cursor.to_string()),
        ];
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }

        let response = self
            .request(
                self.client.get(format!("{}/sync/pull", self.base_url)),
                tenant_id,
            )
            .query(&params)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn is_reachable(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
