//! Node agent discovery
//!
//! A DNS name (typically `tasks.<agent service>`) resolves to one address per
//! node agent replica. Each address is probed for `/version` and `/info`; the
//! info document tells us which swarm node the agent runs on. The resulting
//! node ID -> base URL map is what the stats sampler uses to reach a node.

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{AgentApi, ClientError};

/// Node ID -> agent base URL.
///
/// Replaced wholesale by discovery, and only with a non-empty map: a stale
/// entry is more useful than no entry.
#[derive(Debug, Default)]
pub struct NodeAddressMap {
    inner: RwLock<Arc<HashMap<String, String>>>,
}

impl NodeAddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        match self.inner.read() {
            Ok(map) => Arc::clone(&map),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<String> {
        self.snapshot().get(node_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Swap in `map` unless it is empty. Returns whether the swap happened.
    pub fn replace_if_nonempty(&self, map: HashMap<String, String>) -> bool {
        if map.is_empty() {
            return false;
        }
        let map = Arc::new(map);
        match self.inner.write() {
            Ok(mut current) => *current = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
        true
    }
}

/// Result of one discovery pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Addresses probed
    pub probed: usize,
    /// Probes that identified a node
    pub discovered: usize,
    /// Whether the shared map was replaced
    pub replaced: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("agent at {0} reported neither a node ID nor a name")]
    Anonymous(String),
}

pub struct DiscoveryService {
    agent: Arc<dyn AgentApi>,
    addresses: Arc<NodeAddressMap>,
    dns_name: String,
    port: u16,
}

impl DiscoveryService {
    pub fn new(
        agent: Arc<dyn AgentApi>,
        addresses: Arc<NodeAddressMap>,
        dns_name: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            agent,
            addresses,
            dns_name: dns_name.into(),
            port,
        }
    }

    pub fn addresses(&self) -> &Arc<NodeAddressMap> {
        &self.addresses
    }

    pub fn base_url(&self, ip: Ipv4Addr) -> String {
        format!("http://{}:{}", ip, self.port)
    }

    /// Resolve the agent DNS name to its distinct IPv4 addresses
    pub async fn resolve(&self) -> std::io::Result<Vec<Ipv4Addr>> {
        let resolved = tokio::net::lookup_host((self.dns_name.as_str(), self.port)).await?;
        let unique: BTreeSet<Ipv4Addr> = resolved
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .collect();
        Ok(unique.into_iter().collect())
    }

    /// Resolve and probe; a DNS failure leaves the map untouched
    pub async fn refresh(&self) -> DiscoveryOutcome {
        match self.resolve().await {
            Ok(ips) => self.refresh_from(&ips).await,
            Err(e) => {
                warn!(dns = %self.dns_name, error = %e, "Agent DNS resolution failed");
                DiscoveryOutcome {
                    probed: 0,
                    discovered: 0,
                    replaced: false,
                }
            }
        }
    }

    /// Probe the given addresses and merge the successful results
    pub async fn refresh_from(&self, ips: &[Ipv4Addr]) -> DiscoveryOutcome {
        let probes = ips.iter().map(|ip| {
            let base = self.base_url(*ip);
            async move {
                let result = self.probe(&base).await;
                (base, result)
            }
        });

        // join_all never short-circuits: every probe runs to completion
        let results = futures::future::join_all(probes).await;

        let mut map = HashMap::new();
        for (base, result) in results {
            match result {
                Ok(node_id) => {
                    debug!(agent = %base, node = %node_id, "Agent identified");
                    map.insert(node_id, base);
                }
                Err(e) => warn!(agent = %base, error = %e, "Agent probe failed"),
            }
        }

        let discovered = map.len();
        let replaced = self.addresses.replace_if_nonempty(map);
        if replaced {
            info!(nodes = discovered, "Node agent map refreshed");
        } else if !ips.is_empty() {
            warn!(
                probed = ips.len(),
                "No agent probe succeeded, keeping previous node map"
            );
        }

        DiscoveryOutcome {
            probed: ips.len(),
            discovered,
            replaced,
        }
    }

    async fn probe(&self, base: &str) -> Result<String, ProbeError> {
        self.agent.agent_version(base).await?;
        let info = self.agent.agent_info(base).await?;
        info.node_key()
            .ok_or_else(|| ProbeError::Anonymous(base.to_string()))
    }
}

/// Re-run discovery every `period` until shutdown.
///
/// The first pass is expected to have been awaited at startup, so the loop
/// waits one full period before probing.
pub fn spawn_discovery(
    service: Arc<DiscoveryService>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Discovery loop started, refreshing every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    service.refresh().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Discovery loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}
