use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::client::ManagerApi;
use crate::cluster::{
    build_state_view, CacheError, ClusterCache, NodeAddressMap, RetentionTracker, SampleTable,
    StateView,
};

/// SSE connection parameters
#[derive(Debug, Clone, Copy)]
pub struct SseSettings {
    pub heartbeat: Duration,
    pub retry: Duration,
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            retry: Duration::from_millis(10_000),
        }
    }
}

/// Shared application state.
///
/// Owns a handle to every shared structure; each has a single writer (cache:
/// refresh, samples: sampler, addresses: discovery, retention: the state
/// handler) and any number of readers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<dyn ManagerApi>,
    pub cache: Arc<ClusterCache>,
    pub retention: Arc<RetentionTracker>,
    pub samples: Arc<SampleTable>,
    pub addresses: Arc<NodeAddressMap>,
    pub sse: SseSettings,
    /// Ends long-lived responses when the process shuts down
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl AppState {
    pub fn new(
        manager: Arc<dyn ManagerApi>,
        cache: Arc<ClusterCache>,
        retention: Arc<RetentionTracker>,
        samples: Arc<SampleTable>,
        addresses: Arc<NodeAddressMap>,
    ) -> Self {
        Self {
            manager,
            cache,
            retention,
            samples,
            addresses,
            sse: SseSettings::default(),
            shutdown: None,
        }
    }

    pub fn with_sse(mut self, sse: SseSettings) -> Self {
        self.sse = sse;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Compose the dashboard document, refreshing the cache if it is stale
    pub async fn state_view(&self) -> Result<StateView, CacheError> {
        let snapshot = self.cache.refresh_if_stale().await?;
        let now = Utc::now().timestamp_millis();
        let visible = self.retention.select(&snapshot.tasks, now);
        let samples = self.samples.snapshot();
        Ok(build_state_view(&snapshot, &visible, &samples, now))
    }
}

/// Resolve once shutdown is signalled; never without a receiver
pub async fn wait_for_shutdown(shutdown: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = shutdown {
        let signalled = rx.wait_for(|stop| *stop).await.is_ok();
        if signalled {
            return;
        }
    }
    std::future::pending::<()>().await
}
