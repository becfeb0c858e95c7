//! Dashboard state view
//!
//! Pure composition of a cache snapshot, the visible task set and the latest
//! container samples into the document served at `/api/state`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::cache::ClusterSnapshot;
use super::model::{SchedulingMode, SwarmService, SwarmTask};
use super::retention::StateClass;
use super::sampler::ContainerSample;

#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub time: i64,
    pub nodes: Vec<NodeView>,
    pub services: Vec<ServiceView>,
    pub tasks: Vec<TaskView>,
    pub stats: BTreeMap<String, ContainerSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub role: String,
    pub ip: String,
    pub leader: bool,
    pub cpu: f64,
    #[serde(rename = "memBytes")]
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "nameNoStack")]
    pub name_no_stack: String,
    pub stack: String,
    pub mode: SchedulingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskView {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub state: String,
    pub desired_state: String,
    pub timestamp: Option<String>,
    pub label: String,
    pub label_full: String,
    #[serde(rename = "ContainerID")]
    pub container_id: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    cpu: f64,
    mem_bytes: u64,
}

/// CPU and memory per node, summed over running tasks that have a sample
fn usage_by_node(
    tasks: &[SwarmTask],
    samples: &HashMap<String, ContainerSample>,
) -> HashMap<String, Usage> {
    let mut usage: HashMap<String, Usage> = HashMap::new();
    for task in tasks {
        if StateClass::of(task.state()) != StateClass::Running {
            continue;
        }
        let Some(sample) = task.container_id().and_then(|cid| samples.get(cid)) else {
            continue;
        };
        let entry = usage.entry(task.node_id.clone()).or_default();
        entry.cpu += sample.cpu;
        entry.mem_bytes += sample.mem_bytes;
    }
    usage
}

pub fn build_state_view(
    snapshot: &ClusterSnapshot,
    visible: &[&SwarmTask],
    samples: &HashMap<String, ContainerSample>,
    now_ms: i64,
) -> StateView {
    let usage = usage_by_node(&snapshot.tasks, samples);
    let services_by_id: HashMap<&str, &SwarmService> = snapshot
        .services
        .iter()
        .map(|s| (s.id.as_str(), s))
        .collect();

    let nodes = snapshot
        .nodes
        .iter()
        .map(|n| {
            let used = usage.get(&n.id).copied().unwrap_or_default();
            NodeView {
                id: n.id.clone(),
                name: n.display_name(),
                role: n.role(),
                ip: n.ip(),
                leader: n.is_leader(),
                cpu: used.cpu,
                mem_bytes: used.mem_bytes,
            }
        })
        .collect();

    let services = snapshot
        .services
        .iter()
        .map(|s| ServiceView {
            id: s.id.clone(),
            name: s.full_name(),
            name_no_stack: s.short_name(),
            stack: s.stack(),
            mode: s.mode(),
        })
        .collect();

    let tasks = visible
        .iter()
        .map(|t| {
            let service = services_by_id.get(t.service_id.as_str()).copied();
            TaskView {
                id: t.id.clone(),
                node_id: t.node_id.clone(),
                service_id: t.service_id.clone(),
                state: t.state().to_string(),
                desired_state: t.desired_state().to_string(),
                timestamp: t.timestamp().map(str::to_string),
                label: t.label(service),
                label_full: t.label_full(service),
                container_id: t.container_id().map(str::to_string),
            }
        })
        .collect();

    StateView {
        time: now_ms,
        nodes,
        services,
        tasks,
        stats: samples
            .iter()
            .map(|(cid, s)| (cid.clone(), s.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::model::CpuStats;

    fn snapshot() -> ClusterSnapshot {
        let nodes = serde_json::from_value(serde_json::json!([
            {"ID": "n1", "Description": {"Hostname": "worker-1"}, "Spec": {"Role": "worker"},
             "Status": {"Addr": "10.0.0.1"}},
            {"ID": "n2", "Spec": {"Role": "manager"}, "Status": {"Addr": "0.0.0.0"},
             "ManagerStatus": {"Leader": true, "Addr": "10.0.0.2:2377"}}
        ]))
        .unwrap();
        let services = serde_json::from_value(serde_json::json!([
            {"ID": "s1", "Spec": {"Name": "shop_api",
             "Labels": {"com.docker.stack.namespace": "shop"}, "Mode": {"Replicated": {}}}}
        ]))
        .unwrap();
        let tasks = serde_json::from_value(serde_json::json!([
            {"ID": "t1", "NodeID": "n1", "ServiceID": "s1", "Slot": 1, "DesiredState": "running",
             "Status": {"State": "running", "Timestamp": "2024-05-01T10:00:00Z",
                        "ContainerStatus": {"ContainerID": "c1"}}},
            {"ID": "t2", "NodeID": "n1", "ServiceID": "s1", "Slot": 2, "DesiredState": "running",
             "Status": {"State": "running", "ContainerStatus": {"ContainerID": "c2"}}},
            {"ID": "t3xxxxxxxxxxxxxx", "NodeID": "n2", "ServiceID": "gone",
             "Status": {"State": "starting", "ContainerStatus": {"ContainerID": "c3"}}}
        ]))
        .unwrap();

        ClusterSnapshot {
            time: 1,
            nodes,
            services,
            tasks,
        }
    }

    fn sample(cpu: f64, mem: u64) -> ContainerSample {
        ContainerSample {
            cpu,
            mem_bytes: mem,
            health: None,
            t: 42,
            raw: CpuStats::default(),
        }
    }

    #[test]
    fn test_node_usage_sums_running_samples() {
        let snap = snapshot();
        let mut samples = HashMap::new();
        samples.insert("c1".to_string(), sample(12.5, 100));
        samples.insert("c2".to_string(), sample(7.5, 50));
        samples.insert("c3".to_string(), sample(99.0, 999));

        // Usage is computed from the full list even when nothing is visible
        let view = build_state_view(&snap, &[], &samples, 1000);

        assert_eq!(view.nodes[0].cpu, 20.0);
        assert_eq!(view.nodes[0].mem_bytes, 150);
        // c3 belongs to a starting task
        assert_eq!(view.nodes[1].cpu, 0.0);
        assert_eq!(view.nodes[1].mem_bytes, 0);
        assert_eq!(view.stats.len(), 3);
        assert!(view.tasks.is_empty());
    }

    #[test]
    fn test_task_view_labels_and_missing_service() {
        let snap = snapshot();
        let visible: Vec<&SwarmTask> = snap.tasks.iter().collect();

        let view = build_state_view(&snap, &visible, &HashMap::new(), 1000);

        assert_eq!(view.tasks[0].label, "api.1");
        assert_eq!(view.tasks[0].label_full, "shop_api.1");
        assert_eq!(view.tasks[2].label, "service.t3xxxxxxxxxx");
        assert_eq!(view.tasks[2].desired_state, "");
        assert_eq!(view.tasks[2].timestamp, None);
    }

    #[test]
    fn test_state_json_shape() {
        let snap = snapshot();
        let visible: Vec<&SwarmTask> = snap.tasks.iter().take(1).collect();
        let mut samples = HashMap::new();
        samples.insert("c1".to_string(), sample(1.0, 2));

        let json = serde_json::to_value(build_state_view(&snap, &visible, &samples, 1000)).unwrap();

        assert_eq!(json["time"], 1000);
        assert_eq!(
            json["nodes"][1],
            serde_json::json!({"ID": "n2", "name": "n2", "role": "manager", "ip": "10.0.0.2",
                               "leader": true, "cpu": 0.0, "memBytes": 0})
        );
        assert_eq!(
            json["services"][0],
            serde_json::json!({"ID": "s1", "name": "shop_api", "nameNoStack": "api",
                               "stack": "shop", "mode": "replicated"})
        );
        assert_eq!(
            json["tasks"][0],
            serde_json::json!({"ID": "t1", "NodeID": "n1", "ServiceID": "s1", "State": "running",
                               "DesiredState": "running", "Timestamp": "2024-05-01T10:00:00Z",
                               "Label": "api.1", "LabelFull": "shop_api.1", "ContainerID": "c1"})
        );
        assert_eq!(
            json["stats"]["c1"],
            serde_json::json!({"cpu": 1.0, "memBytes": 2, "health": null, "t": 42})
        );
    }
}
