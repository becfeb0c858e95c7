//! Container stats sampling
//!
//! Every interval the sampler asks each node agent for one-shot stats and the
//! health status of the containers backing live tasks on that node. CPU usage
//! is derived from the cumulative counters, so each sample keeps the raw
//! counters needed for the next delta.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::cache::ClusterCache;
use super::discovery::DiscoveryService;
use super::model::{CpuStats, SwarmTask};
use super::retention::StateClass;
use crate::client::AgentApi;

/// Default number of stats requests in flight per node agent
pub const DEFAULT_SAMPLE_CONCURRENCY: usize = 6;

/// Latest observation of one container
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSample {
    pub cpu: f64,
    #[serde(rename = "memBytes")]
    pub mem_bytes: u64,
    pub health: Option<String>,
    /// Sample time, ms since the epoch
    pub t: i64,
    /// Counters of this sample, the baseline for the next CPU delta
    #[serde(skip)]
    pub raw: CpuStats,
}

/// CPU usage in percent of one core, summed over cores.
///
/// Zero when either delta is not positive (first sample, counter reset).
pub fn cpu_percent(current: &CpuStats, previous: &CpuStats) -> f64 {
    let cpu_delta =
        current.cpu_usage.total_usage as i128 - previous.cpu_usage.total_usage as i128;
    let system_delta = current.system_cpu_usage.unwrap_or(0) as i128
        - previous.system_cpu_usage.unwrap_or(0) as i128;

    if cpu_delta <= 0 || system_delta <= 0 {
        return 0.0;
    }

    let online = current
        .online_cpus
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .or_else(|| {
            current
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(Vec::len)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1);

    (cpu_delta as f64 / system_delta as f64) * online as f64 * 100.0
}

/// Container ID -> latest sample. Written only by the sampler.
#[derive(Debug, Default)]
pub struct SampleTable {
    inner: DashMap<String, ContainerSample>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, container_id: &str) -> Option<ContainerSample> {
        self.inner.get(container_id).map(|s| s.clone())
    }

    pub fn record(&self, container_id: &str, sample: ContainerSample) {
        self.inner.insert(container_id.to_string(), sample);
    }

    pub fn snapshot(&self) -> HashMap<String, ContainerSample> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop samples for containers not in `keep`
    pub fn retain(&self, keep: &HashSet<&str>) {
        self.inner.retain(|cid, _| keep.contains(cid.as_str()));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Container IDs of live tasks, grouped by node ID
pub fn containers_by_node(tasks: &[SwarmTask]) -> BTreeMap<String, Vec<String>> {
    let mut by_node: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for task in tasks {
        if !StateClass::of(task.state()).is_live() {
            continue;
        }
        if let Some(cid) = task.container_id() {
            by_node
                .entry(task.node_id.clone())
                .or_default()
                .push(cid.to_string());
        }
    }
    by_node
}

/// Counters for one sampling cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sampled: usize,
    pub failed: usize,
    /// Nodes with live containers but no known agent address
    pub unreachable_nodes: usize,
}

pub struct StatsSampler {
    cache: Arc<ClusterCache>,
    discovery: Arc<DiscoveryService>,
    agent: Arc<dyn AgentApi>,
    samples: Arc<SampleTable>,
    concurrency: usize,
}

impl StatsSampler {
    pub fn new(
        cache: Arc<ClusterCache>,
        discovery: Arc<DiscoveryService>,
        agent: Arc<dyn AgentApi>,
        samples: Arc<SampleTable>,
    ) -> Self {
        Self {
            cache,
            discovery,
            agent,
            samples,
            concurrency: DEFAULT_SAMPLE_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn samples(&self) -> &Arc<SampleTable> {
        &self.samples
    }

    /// Run one sampling pass over every live container
    pub async fn run_cycle(&self) -> CycleReport {
        let mut snapshot = self.cache.snapshot();
        if snapshot.tasks.is_empty() {
            snapshot = self.cache.refresh().await;
        }

        let addresses = self.discovery.addresses();
        if addresses.is_empty() {
            self.discovery.refresh().await;
        }
        let addresses = addresses.snapshot();

        let mut report = CycleReport::default();
        let mut node_jobs = Vec::new();
        for (node_id, containers) in containers_by_node(&snapshot.tasks) {
            match addresses.get(&node_id) {
                Some(base) => node_jobs.push(self.sample_node(base.clone(), containers)),
                None => {
                    trace!(node = %node_id, "No agent address for node, skipping");
                    report.unreachable_nodes += 1;
                }
            }
        }

        for (sampled, failed) in futures::future::join_all(node_jobs).await {
            report.sampled += sampled;
            report.failed += failed;
        }

        if !snapshot.tasks.is_empty() {
            let known: HashSet<&str> = snapshot
                .tasks
                .iter()
                .filter_map(SwarmTask::container_id)
                .collect();
            self.samples.retain(&known);
        }

        debug!(
            sampled = report.sampled,
            failed = report.failed,
            unreachable_nodes = report.unreachable_nodes,
            "Sampling cycle complete"
        );
        report
    }

    /// Sample one node's containers, at most `concurrency` at a time
    async fn sample_node(&self, base: String, containers: Vec<String>) -> (usize, usize) {
        let mut sampled = 0;
        let mut failed = 0;

        for batch in containers.chunks(self.concurrency) {
            let results =
                futures::future::join_all(batch.iter().map(|cid| self.sample_container(&base, cid)))
                    .await;
            for ok in results {
                if ok {
                    sampled += 1;
                } else {
                    failed += 1;
                }
            }
        }

        (sampled, failed)
    }

    async fn sample_container(&self, base: &str, container_id: &str) -> bool {
        let now = Utc::now().timestamp_millis();

        let stats = match self.agent.container_stats(base, container_id).await {
            Ok(stats) => stats,
            Err(e) => {
                debug!(agent = %base, container = %container_id, error = %e, "Stats request failed");
                return false;
            }
        };

        let previous = self.samples.get(container_id);
        let baseline = previous
            .as_ref()
            .map(|p| &p.raw)
            .unwrap_or(&stats.cpu_stats);
        let cpu = cpu_percent(&stats.cpu_stats, baseline);

        let health = match self.agent.container_inspect(base, container_id).await {
            Ok(inspect) => inspect.health_status(),
            Err(e) => {
                trace!(container = %container_id, error = %e, "Inspect failed, keeping last health");
                previous.as_ref().and_then(|p| p.health.clone())
            }
        };

        self.samples.record(
            container_id,
            ContainerSample {
                cpu,
                mem_bytes: stats.memory_stats.usage.unwrap_or(0),
                health,
                t: now,
                raw: stats.cpu_stats,
            },
        );
        true
    }
}

/// Run the sampler every `period` until shutdown
pub fn spawn_sampler(
    sampler: Arc<StatsSampler>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Stats sampler started, sampling every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = sampler.run_cycle().await;
                    if report.failed > 0 && report.sampled == 0 {
                        warn!(failed = report.failed, "No container could be sampled this cycle");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Stats sampler shutting down");
                        break;
                    }
                }
            }
        }
    })
}
