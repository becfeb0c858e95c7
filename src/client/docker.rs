use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::trace;

use crate::cluster::model::{
    AgentInfo, ContainerInspect, ContainerStats, EngineVersion, SwarmNode, SwarmService,
    SwarmTask,
};
use crate::cluster::version::ApiVersion;

/// Event types the relay subscribes to
pub const EVENT_TYPES: &[&str] = &["task", "service", "node"];

/// Longest slice of an error body kept in a [`ClientError::Status`]
const ERROR_BODY_LIMIT: usize = 180;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} -> {status} {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Malformed payload from {url}: {message}")]
    Parse { url: String, message: String },
}

/// Raw byte stream of an upstream event subscription
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

// ============================================================================
// SBIO: Traits for abstraction (allows mocking in tests)
// ============================================================================

/// The swarm manager's control-plane API
#[async_trait]
pub trait ManagerApi: Send + Sync {
    async fn version(&self) -> Result<EngineVersion, ClientError>;
    async fn nodes(&self) -> Result<Vec<SwarmNode>, ClientError>;
    async fn services(&self) -> Result<Vec<SwarmService>, ClientError>;
    async fn tasks(&self) -> Result<Vec<SwarmTask>, ClientError>;

    /// Open a live subscription to the manager's event feed
    async fn events(&self, types: &[&str]) -> Result<ByteStream, ClientError>;
}

/// A node-local agent, addressed by its base URL
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn agent_version(&self, base: &str) -> Result<EngineVersion, ClientError>;
    async fn agent_info(&self, base: &str) -> Result<AgentInfo, ClientError>;
    async fn container_stats(
        &self,
        base: &str,
        container_id: &str,
    ) -> Result<ContainerStats, ClientError>;
    async fn container_inspect(
        &self,
        base: &str,
        container_id: &str,
    ) -> Result<ContainerInspect, ClientError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

/// HTTP client for the manager and node agents.
///
/// Versioned paths use the negotiated API version, which can be swapped at
/// runtime with [`DockerClient::set_api_version`].
pub struct DockerClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    manager_url: String,
    api_version: RwLock<ApiVersion>,
}

impl DockerClient {
    pub fn new(
        manager_url: impl Into<String>,
        api_version: ApiVersion,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        // Event subscriptions are unbounded; only the connect phase times out
        let stream_http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            manager_url: manager_url.into().trim_end_matches('/').to_string(),
            api_version: RwLock::new(api_version),
        })
    }

    pub fn manager_url(&self) -> &str {
        &self.manager_url
    }

    pub fn api_version(&self) -> ApiVersion {
        match self.api_version.read() {
            Ok(v) => *v,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_api_version(&self, version: ApiVersion) {
        match self.api_version.write() {
            Ok(mut v) => *v = version,
            Err(poisoned) => *poisoned.into_inner() = version,
        }
    }

    fn versioned(&self, base: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            self.api_version().prefix(),
            path
        )
    }

    fn unversioned(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ClientError> {
        trace!(url = %url, "GET");
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Parse {
            url,
            message: e.to_string(),
        })
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

/// `filters` query value selecting the given event types
pub fn event_filters(types: &[&str]) -> String {
    serde_json::json!({ "type": types }).to_string()
}

#[async_trait]
impl ManagerApi for DockerClient {
    async fn version(&self) -> Result<EngineVersion, ClientError> {
        self.get_json(Self::unversioned(&self.manager_url, "version"))
            .await
    }

    async fn nodes(&self) -> Result<Vec<SwarmNode>, ClientError> {
        self.get_json(self.versioned(&self.manager_url, "nodes"))
            .await
    }

    async fn services(&self) -> Result<Vec<SwarmService>, ClientError> {
        self.get_json(self.versioned(&self.manager_url, "services"))
            .await
    }

    async fn tasks(&self) -> Result<Vec<SwarmTask>, ClientError> {
        self.get_json(self.versioned(&self.manager_url, "tasks"))
            .await
    }

    async fn events(&self, types: &[&str]) -> Result<ByteStream, ClientError> {
        let url = self.versioned(&self.manager_url, "events");
        let response = self
            .stream_http
            .get(&url)
            .query(&[("filters", event_filters(types))])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed())
    }
}

#[async_trait]
impl AgentApi for DockerClient {
    async fn agent_version(&self, base: &str) -> Result<EngineVersion, ClientError> {
        self.get_json(Self::unversioned(base, "version")).await
    }

    async fn agent_info(&self, base: &str) -> Result<AgentInfo, ClientError> {
        self.get_json(Self::unversioned(base, "info")).await
    }

    async fn container_stats(
        &self,
        base: &str,
        container_id: &str,
    ) -> Result<ContainerStats, ClientError> {
        let path = format!("containers/{}/stats?stream=false", container_id);
        self.get_json(self.versioned(base, &path)).await
    }

    async fn container_inspect(
        &self,
        base: &str,
        container_id: &str,
    ) -> Result<ContainerInspect, ClientError> {
        let path = format!("containers/{}/json", container_id);
        self.get_json(self.versioned(base, &path)).await
    }
}
