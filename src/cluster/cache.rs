//! Cluster state cache
//!
//! Holds the latest nodes/services/tasks snapshot fetched from the manager.
//! The three fetches run concurrently and fail independently: one broken
//! resource never prevents the others from populating.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, warn};

use super::model::{SwarmNode, SwarmService, SwarmTask};
use crate::client::{ClientError, ManagerApi};

/// Snapshots younger than this are served without refetching
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("State refresh did not complete: {0}")]
    RefreshAborted(String),
}

/// What a refresh does with a resource whose fetch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The resource is empty until the next successful fetch
    #[default]
    Reset,
    /// The last successfully fetched value is kept
    KeepStale,
}

/// One refresh worth of cluster state
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Refresh time in milliseconds since the epoch; 0 before the first refresh
    pub time: i64,
    pub nodes: Vec<SwarmNode>,
    pub services: Vec<SwarmService>,
    pub tasks: Vec<SwarmTask>,
}

impl ClusterSnapshot {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.time
    }
}

type RefreshResult = Result<Arc<ClusterSnapshot>, CacheError>;

/// Handle on the refresh in flight, awaited by every stale caller
type InFlight = Shared<BoxFuture<'static, RefreshResult>>;

pub struct ClusterCache {
    manager: Arc<dyn ManagerApi>,
    current: RwLock<Arc<ClusterSnapshot>>,
    in_flight: Mutex<Option<InFlight>>,
    stale_after: Duration,
    policy: FailurePolicy,
}

impl ClusterCache {
    pub fn new(manager: Arc<dyn ManagerApi>) -> Self {
        Self {
            manager,
            current: RwLock::new(Arc::new(ClusterSnapshot::default())),
            in_flight: Mutex::new(None),
            stale_after: DEFAULT_STALE_AFTER,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Latest snapshot, without fetching
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        match self.current.read() {
            Ok(s) => Arc::clone(&s),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn store(&self, snapshot: Arc<ClusterSnapshot>) {
        match self.current.write() {
            Ok(mut s) => *s = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn is_stale(&self, now_ms: i64) -> bool {
        self.snapshot().age_ms(now_ms) > self.stale_after.as_millis() as i64
    }

    /// Fetch nodes, services and tasks concurrently and publish the result
    pub async fn refresh(&self) -> Arc<ClusterSnapshot> {
        let (nodes, services, tasks) = tokio::join!(
            self.manager.nodes(),
            self.manager.services(),
            self.manager.tasks()
        );

        let previous = self.snapshot();
        let snapshot = Arc::new(ClusterSnapshot {
            time: previous.time.max(Utc::now().timestamp_millis()),
            nodes: self.settle("nodes", nodes, &previous.nodes),
            services: self.settle("services", services, &previous.services),
            tasks: self.settle("tasks", tasks, &previous.tasks),
        });

        debug!(
            nodes = snapshot.nodes.len(),
            services = snapshot.services.len(),
            tasks = snapshot.tasks.len(),
            "Cluster state refreshed"
        );

        self.store(Arc::clone(&snapshot));
        snapshot
    }

    fn settle<T: Clone>(
        &self,
        resource: &str,
        result: Result<Vec<T>, ClientError>,
        previous: &[T],
    ) -> Vec<T> {
        match result {
            Ok(items) => items,
            Err(e) => {
                warn!(resource, error = %e, "Manager fetch failed");
                match self.policy {
                    FailurePolicy::Reset => Vec::new(),
                    FailurePolicy::KeepStale => previous.to_vec(),
                }
            }
        }
    }

    /// Refresh only if the snapshot is older than the staleness bound.
    ///
    /// Callers arriving while a refresh is in flight await the same shared
    /// handle and reuse its result. No lock is held while the fetch runs. The
    /// fetch runs on its own task so a caller going away does not cancel it
    /// for the others.
    pub async fn refresh_if_stale(self: &Arc<Self>) -> RefreshResult {
        if !self.is_stale(Utc::now().timestamp_millis()) {
            return Ok(self.snapshot());
        }
        self.join_refresh().await
    }

    fn join_refresh(self: &Arc<Self>) -> InFlight {
        let mut slot = match self.in_flight.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pending) = slot.as_ref() {
            return pending.clone();
        }

        let cache = Arc::clone(self);
        let task = tokio::spawn(async move {
            let snapshot = cache.refresh().await;
            cache.clear_in_flight();
            snapshot
        });

        let cache = Arc::clone(self);
        let pending = async move {
            task.await.map_err(|e| {
                cache.clear_in_flight();
                CacheError::RefreshAborted(e.to_string())
            })
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        pending
    }

    fn clear_in_flight(&self) {
        match self.in_flight.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// True while a refresh started by `refresh_if_stale` is running
    pub fn is_refreshing(&self) -> bool {
        match self.in_flight.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}
