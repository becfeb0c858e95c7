//! # Swarm state aggregation
//!
//! Everything between the manager / node agent HTTP APIs and the dashboard
//! endpoints:
//!
//! - **version**: pick the engine API version used in URL prefixes
//! - **discovery**: map swarm node IDs to the node agent that can sample them
//! - **cache**: latest nodes/services/tasks snapshot, refreshed on demand
//! - **retention**: which tasks are shown, with a window for terminal ones
//! - **sampler**: periodic per-container CPU, memory and health samples
//! - **relay**: manager event feed framed for SSE clients
//! - **aggregate**: the `/api/state` document
//!
//! ```text
//!                 ┌──────────────┐   nodes/services/tasks/events
//!   /api/state ──▶│ ClusterCache │──────────────────────────────▶ manager
//!                 └──────────────┘
//!                 ┌──────────────┐   stats / inspect
//!   sampler ─────▶│ SampleTable  │◀─────────────────────────────── node agents
//!                 └──────────────┘          ▲
//!   discovery ──▶ NodeAddressMap ───────────┘ (DNS: tasks.<agent>)
//! ```

pub mod aggregate;
pub mod cache;
pub mod discovery;
pub mod model;
pub mod relay;
pub mod retention;
pub mod sampler;
pub mod version;

pub use aggregate::{build_state_view, NodeView, ServiceView, StateView, TaskView};
pub use cache::{CacheError, ClusterCache, ClusterSnapshot, FailurePolicy, DEFAULT_STALE_AFTER};
pub use discovery::{spawn_discovery, DiscoveryOutcome, DiscoveryService, NodeAddressMap};
pub use relay::{relay_frames, subscribe, LineAssembler, RelayFrame};
pub use retention::{select_visible, RetentionTracker, StateClass};
pub use sampler::{
    cpu_percent, spawn_sampler, ContainerSample, CycleReport, SampleTable, StatsSampler,
    DEFAULT_SAMPLE_CONCURRENCY,
};
pub use version::{negotiate, select_version, ApiVersion, DEFAULT_API_VERSION};
