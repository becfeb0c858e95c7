pub mod docker;

#[cfg(test)]
pub mod mock;

pub use docker::{
    event_filters, AgentApi, ByteStream, ClientError, DockerClient, ManagerApi, EVENT_TYPES,
};
