//! Swarm resources as returned by the manager and node agents
//!
//! Only the fields the dashboard consumes are modelled. Every field is
//! optional or defaulted so that a partially populated payload still decodes;
//! a payload that is not the expected shape at all is a fetch failure.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Label used by `docker stack deploy` to tag a service with its stack
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

/// Older stack label still found on some services
pub const STACK_NAME_LABEL: &str = "com.docker.stack.name";

/// Decode an explicit `null` as the type's default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Engine version document (`GET /version`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineVersion {
    #[serde(rename = "ApiVersion", default)]
    pub api_version: Option<String>,

    #[serde(rename = "Version", default)]
    pub version: Option<String>,
}

/// Engine info document (`GET /info`) served by a node agent
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentInfo {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    #[serde(rename = "Swarm", default)]
    pub swarm: Option<AgentSwarmInfo>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentSwarmInfo {
    #[serde(rename = "NodeID", default)]
    pub node_id: Option<String>,
}

impl AgentInfo {
    /// Swarm node ID of the agent, falling back to the engine name
    pub fn node_key(&self) -> Option<String> {
        self.swarm
            .as_ref()
            .and_then(|s| s.node_id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| self.name.clone().filter(|n| !n.is_empty()))
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwarmNode {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Description", default)]
    pub description: Option<NodeDescription>,

    #[serde(rename = "Spec", default)]
    pub spec: Option<NodeSpec>,

    #[serde(rename = "Status", default)]
    pub status: Option<NodeState>,

    #[serde(rename = "ManagerStatus", default)]
    pub manager_status: Option<ManagerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeDescription {
    #[serde(rename = "Hostname", default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeSpec {
    #[serde(rename = "Role", default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeState {
    #[serde(rename = "Addr", default)]
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ManagerStatus {
    #[serde(rename = "Leader", default)]
    pub leader: bool,

    #[serde(rename = "Addr", default)]
    pub addr: Option<String>,
}

impl SwarmNode {
    /// Hostname, else the node ID, else a generic name
    pub fn display_name(&self) -> String {
        self.description
            .as_ref()
            .and_then(|d| d.hostname.clone())
            .filter(|h| !h.is_empty())
            .or_else(|| Some(self.id.clone()).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| "node".to_string())
    }

    pub fn role(&self) -> String {
        self.spec
            .as_ref()
            .and_then(|s| s.role.as_deref())
            .unwrap_or_default()
            .to_lowercase()
    }

    pub fn is_leader(&self) -> bool {
        self.manager_status.as_ref().is_some_and(|m| m.leader)
    }

    /// Reachable address of the node.
    ///
    /// Workers report it in `Status.Addr`. Managers may report `0.0.0.0`
    /// there, in which case the host part of the raft address is used.
    pub fn ip(&self) -> String {
        let addr = self
            .status
            .as_ref()
            .and_then(|s| s.addr.as_deref())
            .unwrap_or_default();
        if !addr.is_empty() && addr != "0.0.0.0" {
            return addr.to_string();
        }

        self.manager_status
            .as_ref()
            .and_then(|m| m.addr.as_deref())
            .and_then(|a| a.split(':').next())
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwarmService {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Spec", default)]
    pub spec: Option<ServiceSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceSpec {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,

    #[serde(rename = "Mode", default)]
    pub mode: Option<ServiceMode>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceMode {
    #[serde(rename = "Replicated", default)]
    pub replicated: Option<serde_json::Value>,

    #[serde(rename = "Global", default)]
    pub global: Option<serde_json::Value>,
}

/// Scheduling mode of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    Replicated,
    Global,
}

impl SwarmService {
    /// `Spec.Name`, else the ID, else a generic name
    pub fn full_name(&self) -> String {
        self.spec
            .as_ref()
            .and_then(|s| s.name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.id.clone()).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| "service".to_string())
    }

    pub fn stack(&self) -> String {
        let Some(spec) = &self.spec else {
            return String::new();
        };
        spec.labels
            .get(STACK_NAMESPACE_LABEL)
            .or_else(|| spec.labels.get(STACK_NAME_LABEL))
            .cloned()
            .unwrap_or_default()
    }

    /// Service name with the `<stack>_` prefix removed
    pub fn short_name(&self) -> String {
        let stack = self.stack();
        let name = self.full_name();
        if !stack.is_empty() {
            if let Some(rest) = name.strip_prefix(&format!("{}_", stack)) {
                return rest.to_string();
            }
        }
        name
    }

    pub fn mode(&self) -> SchedulingMode {
        let global = self
            .spec
            .as_ref()
            .and_then(|s| s.mode.as_ref())
            .is_some_and(|m| m.global.is_some());
        if global {
            SchedulingMode::Global
        } else {
            SchedulingMode::Replicated
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwarmTask {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "NodeID", default)]
    pub node_id: String,

    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    #[serde(rename = "Slot", default)]
    pub slot: Option<u64>,

    #[serde(rename = "DesiredState", default)]
    pub desired_state: Option<String>,

    #[serde(rename = "UpdatedAt", default)]
    pub updated_at: Option<String>,

    #[serde(rename = "Status", default)]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskStatus {
    #[serde(rename = "State", default)]
    pub state: Option<String>,

    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<String>,

    #[serde(rename = "StartedAt", default)]
    pub started_at: Option<String>,

    #[serde(rename = "ContainerStatus", default)]
    pub container_status: Option<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerStatus {
    #[serde(rename = "ContainerID", default)]
    pub container_id: Option<String>,
}

impl SwarmTask {
    /// Raw state string as reported by the manager
    pub fn state(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .unwrap_or_default()
    }

    pub fn desired_state(&self) -> &str {
        self.desired_state.as_deref().unwrap_or_default()
    }

    /// Most recent timestamp known for the task
    pub fn timestamp(&self) -> Option<&str> {
        let status = self.status.as_ref();
        status
            .and_then(|s| s.timestamp.as_deref())
            .or(self.updated_at.as_deref())
            .or_else(|| status.and_then(|s| s.started_at.as_deref()))
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn container_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.container_status.as_ref())
            .and_then(|c| c.container_id.as_deref())
            .filter(|cid| !cid.is_empty())
    }

    /// `<short service name>.<slot>` or `<short service name>.<task id prefix>`
    pub fn label(&self, service: Option<&SwarmService>) -> String {
        let base = service
            .map(SwarmService::short_name)
            .unwrap_or_else(|| "service".to_string());
        self.label_with(&base)
    }

    /// Same as [`SwarmTask::label`] with the stack-qualified service name
    pub fn label_full(&self, service: Option<&SwarmService>) -> String {
        let base = service
            .map(SwarmService::full_name)
            .unwrap_or_else(|| "service".to_string());
        self.label_with(&base)
    }

    fn label_with(&self, base: &str) -> String {
        match self.slot.filter(|s| *s > 0) {
            Some(slot) => format!("{}.{}", base, slot),
            None => {
                let short: String = self.id.chars().take(12).collect();
                format!("{}.{}", base, short)
            }
        }
    }
}

// ============================================================================
// Container stats and inspect
// ============================================================================

/// One-shot container stats (`GET /containers/{id}/stats?stream=false`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerStats {
    #[serde(default)]
    pub cpu_stats: CpuStats,

    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,

    #[serde(default)]
    pub system_cpu_usage: Option<u64>,

    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,

    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
}

/// Subset of the container inspect document (`GET /containers/{id}/json`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerInspect {
    #[serde(rename = "State", default)]
    pub state: Option<ContainerState>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerState {
    #[serde(rename = "Health", default)]
    pub health: Option<ContainerHealth>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerHealth {
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

impl ContainerInspect {
    pub fn health_status(&self) -> Option<String> {
        self.state
            .as_ref()
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status.clone())
    }
}
