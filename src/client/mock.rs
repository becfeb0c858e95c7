//! In-memory manager and agent doubles for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::StreamExt;

use super::docker::{AgentApi, ByteStream, ClientError, ManagerApi};
use crate::cluster::model::{
    AgentInfo, ContainerInspect, ContainerStats, CpuStats, CpuUsage, EngineVersion, MemoryStats,
    SwarmNode, SwarmService, SwarmTask,
};

fn unavailable(what: &str) -> ClientError {
    ClientError::Status {
        url: format!("mock://{}", what),
        status: 503,
        message: "unavailable".to_string(),
    }
}

/// One chunk of a mocked event feed: bytes, or a read error
pub type EventChunk = Result<Vec<u8>, String>;

/// Raises its flag when the event stream holding it is dropped
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Manager double. A resource set to `None` fails when fetched.
pub struct MockManager {
    api_version: Mutex<Option<String>>,
    version_fails: bool,
    nodes: Mutex<Option<Vec<SwarmNode>>>,
    services: Mutex<Option<Vec<SwarmService>>>,
    tasks: Mutex<Option<Vec<SwarmTask>>>,
    events: Mutex<Option<Vec<EventChunk>>>,
    idle_events: bool,
    events_released: Arc<AtomicBool>,
    fetch_delay: Option<Duration>,
    task_fetches: Arc<AtomicUsize>,
}

impl Default for MockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MockManager {
    pub fn new() -> Self {
        Self {
            api_version: Mutex::new(Some("1.45".to_string())),
            version_fails: false,
            nodes: Mutex::new(Some(vec![])),
            services: Mutex::new(Some(vec![])),
            tasks: Mutex::new(Some(vec![])),
            events: Mutex::new(Some(vec![])),
            idle_events: false,
            events_released: Arc::new(AtomicBool::new(false)),
            fetch_delay: None,
            task_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_api_version(self, version: &str) -> Self {
        *self.api_version.lock().unwrap() = Some(version.to_string());
        self
    }

    pub fn failing_version(mut self) -> Self {
        self.version_fails = true;
        self
    }

    pub fn with_nodes(self, nodes: Option<Vec<SwarmNode>>) -> Self {
        self.set_nodes(nodes);
        self
    }

    pub fn with_services(self, services: Option<Vec<SwarmService>>) -> Self {
        self.set_services(services);
        self
    }

    pub fn with_tasks(self, tasks: Option<Vec<SwarmTask>>) -> Self {
        self.set_tasks(tasks);
        self
    }

    pub fn with_events(self, chunks: Option<Vec<EventChunk>>) -> Self {
        *self.events.lock().unwrap() = chunks;
        self
    }

    /// Event feed that stays open without ever sending a chunk
    pub fn with_idle_events(mut self) -> Self {
        self.idle_events = true;
        self
    }

    /// Whether an idle event feed has been dropped by its subscriber
    pub fn events_released(&self) -> bool {
        self.events_released.load(Ordering::SeqCst)
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn set_nodes(&self, nodes: Option<Vec<SwarmNode>>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub fn set_services(&self, services: Option<Vec<SwarmService>>) {
        *self.services.lock().unwrap() = services;
    }

    pub fn set_tasks(&self, tasks: Option<Vec<SwarmTask>>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    /// Number of times the task list has been fetched
    pub fn task_fetches(&self) -> usize {
        self.task_fetches.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ManagerApi for MockManager {
    async fn version(&self) -> Result<EngineVersion, ClientError> {
        if self.version_fails {
            return Err(unavailable("version"));
        }
        Ok(EngineVersion {
            api_version: self.api_version.lock().unwrap().clone(),
            version: Some("27.0.0".to_string()),
        })
    }

    async fn nodes(&self) -> Result<Vec<SwarmNode>, ClientError> {
        self.delay().await;
        let nodes = self.nodes.lock().unwrap().clone();
        nodes.ok_or_else(|| unavailable("nodes"))
    }

    async fn services(&self) -> Result<Vec<SwarmService>, ClientError> {
        self.delay().await;
        let services = self.services.lock().unwrap().clone();
        services.ok_or_else(|| unavailable("services"))
    }

    async fn tasks(&self) -> Result<Vec<SwarmTask>, ClientError> {
        self.task_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let tasks = self.tasks.lock().unwrap().clone();
        tasks.ok_or_else(|| unavailable("tasks"))
    }

    async fn events(&self, _types: &[&str]) -> Result<ByteStream, ClientError> {
        if self.idle_events {
            let flag = ReleaseFlag(self.events_released.clone());
            let idle = futures::stream::pending::<Result<Bytes, ClientError>>().map(move |item| {
                let _held = &flag;
                item
            });
            return Ok(idle.boxed());
        }

        let chunks = self
            .events
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("events"))?;

        let items: Vec<Result<Bytes, ClientError>> = chunks
            .into_iter()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(Bytes::from(bytes)),
                Err(message) => Err(ClientError::Parse {
                    url: "mock://events".to_string(),
                    message,
                }),
            })
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Agent double keyed by base URL
#[derive(Default)]
pub struct MockAgent {
    infos: Mutex<HashMap<String, AgentInfo>>,
    stats: Mutex<HashMap<String, ContainerStats>>,
    health: Mutex<HashMap<String, Option<String>>>,
    failing_stats: Mutex<Vec<String>>,
    stats_delay: Option<Duration>,
    stats_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stats_delay(mut self, delay: Duration) -> Self {
        self.stats_delay = Some(delay);
        self
    }

    /// Register an agent at `base` reporting swarm node `node_id`
    pub fn with_node(self, base: &str, node_id: &str) -> Self {
        self.infos.lock().unwrap().insert(
            base.to_string(),
            serde_json::from_value(serde_json::json!({
                "Name": format!("host-{}", node_id),
                "Swarm": {"NodeID": node_id}
            }))
            .unwrap(),
        );
        self
    }

    pub fn set_stats(&self, container_id: &str, total: u64, system: u64, cpus: u32, mem: u64) {
        self.stats.lock().unwrap().insert(
            container_id.to_string(),
            ContainerStats {
                cpu_stats: CpuStats {
                    cpu_usage: CpuUsage {
                        total_usage: total,
                        percpu_usage: None,
                    },
                    system_cpu_usage: Some(system),
                    online_cpus: Some(cpus),
                },
                memory_stats: MemoryStats { usage: Some(mem) },
            },
        );
    }

    /// `None` makes the inspect call fail for that container
    pub fn set_health(&self, container_id: &str, health: Option<&str>) {
        self.health
            .lock()
            .unwrap()
            .insert(container_id.to_string(), health.map(str::to_string));
    }

    pub fn fail_stats(&self, container_id: &str) {
        self.failing_stats
            .lock()
            .unwrap()
            .push(container_id.to_string());
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent stats requests observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentApi for MockAgent {
    async fn agent_version(&self, base: &str) -> Result<EngineVersion, ClientError> {
        if self.infos.lock().unwrap().contains_key(base) {
            Ok(EngineVersion {
                api_version: Some("1.45".to_string()),
                version: None,
            })
        } else {
            Err(unavailable(base))
        }
    }

    async fn agent_info(&self, base: &str) -> Result<AgentInfo, ClientError> {
        let info = self.infos.lock().unwrap().get(base).cloned();
        info.ok_or_else(|| unavailable(base))
    }

    async fn container_stats(
        &self,
        _base: &str,
        container_id: &str,
    ) -> Result<ContainerStats, ClientError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.stats_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self
            .failing_stats
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == container_id)
        {
            return Err(unavailable(container_id));
        }
        let stats = self.stats.lock().unwrap().get(container_id).cloned();
        Ok(stats.unwrap_or_default())
    }

    async fn container_inspect(
        &self,
        _base: &str,
        container_id: &str,
    ) -> Result<ContainerInspect, ClientError> {
        let health = self.health.lock().unwrap().get(container_id).cloned();
        match health {
            Some(Some(status)) => Ok(serde_json::from_value(serde_json::json!({
                "State": {"Health": {"Status": status}}
            }))
            .unwrap()),
            Some(None) => Err(unavailable(container_id)),
            None => Ok(ContainerInspect::default()),
        }
    }
}
