//! Stackmock - Docker Engine API surface for compose-stack management
//!
//! This crate provides a synthetic container engine derived from compose
//! manifests and served over a Unix socket, plus a client facade that talks
//! either to that synthetic world or to a real engine.

#![recursion_limit = "512"]

pub mod client;
pub mod compose;
pub mod config;
pub mod engine_api;
pub mod error;
pub mod hash;
pub mod monitoring;
pub mod state;
pub mod types;
pub mod world;

pub use config::{EngineMode, StackmockConfig};
pub use error::{Result, StackmockError};

// Export main types at root level
pub use types::{ContainerInfo, ContainerState, EngineEvent, Health, NetworkInfo, StackStatus};

/// Re-exports for easier API usage
pub mod api {
    pub use crate::client::{DockerEngineClient, EngineClient, WorldClient, connect};
    pub use crate::compose::{Catalog, OverrideFile};
    pub use crate::engine_api::{EngineServer, ServerSettings, routes};
    pub use crate::state::RuntimeStateStore;
    pub use crate::world::WorldModel;
    pub use crate::{ContainerInfo, EngineEvent, StackStatus, WorldBuilder};
}

/// Builder for assembling a world programmatically, without a stacks
/// directory on disk.
pub struct WorldBuilder {
    overrides: compose::OverrideFile,
    stacks: Vec<(String, String)>,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self {
            overrides: compose::OverrideFile::default(),
            stacks: Vec::new(),
        }
    }

    /// Adds a stack from compose YAML.
    pub fn stack(mut self, name: impl Into<String>, yaml: impl Into<String>) -> Self {
        self.stacks.push((name.into(), yaml.into()));
        self
    }

    /// Uses override YAML in the format of the on-disk override file.
    pub fn overrides(mut self, yaml: &str) -> Result<Self> {
        self.overrides = compose::OverrideFile::from_yaml(yaml)?;
        Ok(self)
    }

    pub fn build(self) -> Result<world::WorldModel> {
        let mut catalog = compose::Catalog::new(self.overrides);
        for (name, yaml) in &self.stacks {
            catalog.add_stack_from_yaml(name, yaml)?;
        }
        catalog.apply_unmanaged();
        Ok(world::WorldModel::new(catalog))
    }
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}
