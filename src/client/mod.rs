//! The engine facade the rest of the product talks to.
//!
//! One trait, two variants chosen once at construction: `WorldClient` answers
//! from the in-process synthetic world, `DockerEngineClient` from a real
//! engine.

pub mod docker;
pub mod stats;
pub mod world;

pub use docker::DockerEngineClient;
pub use stats::{StatsPool, StatsSample};
pub use world::WorldClient;

use crate::config::{EngineMode, StackmockConfig};
use crate::engine_api::StreamKind;
use crate::error::Result;
use crate::types::{
    ContainerInfo, ContainerStats, EngineEvent, ImageInfo, LogOptions, NetworkInfo, ProcessList,
    PruneReport, VolumeInfo,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// One demultiplexed piece of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: StreamKind,
    pub data: Bytes,
}

pub type LogStream = BoxStream<'static, Result<LogChunk>>;
pub type EventStream = BoxStream<'static, Result<EngineEvent>>;

/// Container actions worth surfacing from an engine's event feed.
pub const CONTAINER_ACTIONS: &[&str] = &[
    "create", "start", "restart", "stop", "die", "kill", "destroy", "pause", "unpause", "oom",
];
/// Network, image and volume actions worth surfacing.
pub const RESOURCE_ACTIONS: &[&str] = &[
    "create", "destroy", "remove", "connect", "disconnect", "pull", "delete", "untag", "tag",
    "mount", "unmount",
];

/// Whether an event belongs to the action set consumers care about.
pub fn is_relevant_event(event_type: &str, action: &str) -> bool {
    match event_type {
        "container" => {
            action.starts_with("health_status") || CONTAINER_ACTIONS.contains(&action)
        }
        "network" | "image" | "volume" => RESOURCE_ACTIONS.contains(&action),
        _ => false,
    }
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Containers sorted by ID. `all=false` leaves out stopped ones.
    async fn list_containers(&self, all: bool, project: Option<&str>) -> Result<Vec<ContainerInfo>>;
    /// The raw inspect document.
    async fn inspect_container(&self, id: &str) -> Result<Value>;
    async fn list_images(&self) -> Result<Vec<ImageInfo>>;
    async fn inspect_image(&self, name: &str) -> Result<Value>;
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>>;
    async fn inspect_network(&self, id: &str) -> Result<Value>;
    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>>;
    async fn inspect_volume(&self, name: &str) -> Result<Value>;
    /// One entry per running container of `project`; a container whose stats
    /// could not be read carries `usage: None`.
    async fn stats(&self, project: &str) -> Result<Vec<ContainerStats>>;
    async fn top(&self, id: &str) -> Result<ProcessList>;
    async fn logs(&self, id: &str, options: LogOptions) -> Result<LogStream>;
    async fn prune_images(&self) -> Result<PruneReport>;
    /// Lifecycle events from now on, already filtered to the relevant set.
    async fn events(&self) -> Result<EventStream>;
    async fn close(&self) -> Result<()>;
}

/// Builds the facade variant selected by `engine.mode`.
pub async fn connect(config: &StackmockConfig) -> Result<Arc<dyn EngineClient>> {
    match config.engine.mode {
        EngineMode::Mock => {
            let client = WorldClient::load(config)?;
            info!("🧪 Using synthetic engine from {}", config.stacks.dir.display());
            Ok(Arc::new(client))
        }
        EngineMode::Docker => {
            let client = DockerEngineClient::connect(config).await?;
            info!("🐳 Connected to container engine");
            Ok(Arc::new(client))
        }
    }
}
