//! Live Docker Swarm state aggregation and event relay.
//!
//! Cluster state comes from a swarm manager; container usage and health come
//! from node-local agents. Dashboards read both over HTTP and follow cluster
//! events over Server-Sent Events.

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod monitor;
pub mod server;
