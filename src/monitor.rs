//! Process wiring: build the shared state from a configuration and run the
//! background loops until shutdown.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{AgentApi, ClientError, DockerClient, ManagerApi};
use crate::cluster::{
    negotiate, spawn_discovery, spawn_sampler, ClusterCache, DiscoveryService, FailurePolicy,
    NodeAddressMap, RetentionTracker, SampleTable, StatsSampler, DEFAULT_API_VERSION,
};
use crate::config::MonitorConfig;
use crate::server::{create_router, AppState, SseSettings};

pub struct Monitor {
    state: AppState,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Negotiate the API version, run the first discovery pass and start the
    /// discovery and sampling loops.
    pub async fn start(config: &MonitorConfig) -> Result<Self, ClientError> {
        let fallback = config.api_version.unwrap_or(DEFAULT_API_VERSION);
        let client = Arc::new(DockerClient::new(
            config.manager_url.clone(),
            fallback,
            config.request_timeout,
        )?);
        let version = negotiate(client.as_ref(), config.api_version, fallback).await;
        client.set_api_version(version);

        let manager: Arc<dyn ManagerApi> = client.clone();
        let agent: Arc<dyn AgentApi> = client;

        let policy = if config.keep_stale_on_error {
            FailurePolicy::KeepStale
        } else {
            FailurePolicy::Reset
        };
        let cache = Arc::new(ClusterCache::new(manager.clone()).with_policy(policy));

        let addresses = Arc::new(NodeAddressMap::new());
        let discovery = Arc::new(DiscoveryService::new(
            agent.clone(),
            addresses.clone(),
            config.agent_dns.clone(),
            config.agent_port,
        ));
        let outcome = discovery.refresh().await;
        if outcome.discovered == 0 {
            warn!(
                dns = %config.agent_dns,
                "No node agent found at startup, stats will be empty until discovery succeeds"
            );
        } else {
            info!(nodes = outcome.discovered, "Initial discovery complete");
        }

        let samples = Arc::new(SampleTable::new());
        let sampler = Arc::new(
            StatsSampler::new(cache.clone(), discovery.clone(), agent, samples.clone())
                .with_concurrency(config.sample_concurrency),
        );

        let (shutdown, rx) = watch::channel(false);
        let tasks = vec![
            spawn_discovery(discovery, config.discovery_interval, rx.clone()),
            spawn_sampler(sampler, config.stats_interval, rx.clone()),
        ];

        let state = AppState::new(
            manager,
            cache,
            Arc::new(RetentionTracker::new(config.retention_ttl)),
            samples,
            addresses,
        )
        .with_sse(SseSettings {
            heartbeat: config.heartbeat_interval,
            retry: config.retry,
        })
        .with_shutdown(rx);

        Ok(Self {
            state,
            shutdown,
            tasks,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Handle for signalling shutdown from outside, e.g. a signal handler
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Stop the background loops and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
        info!("Background loops stopped");
    }
}
