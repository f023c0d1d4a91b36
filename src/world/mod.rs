//! The live world: catalog plus runtime state, materialized into containers
//! and networks with resolved identifiers and addresses.
//!
//! The graph is copy-on-rebuild. Readers take an `Arc` to whichever graph is
//! current and never see a partial one. Effective state is never stored on
//! the graph; every read resolves it against a fresh state snapshot.

pub mod graph;
pub mod resolve;

pub use graph::{
    Endpoint, LiveContainer, LiveGraph, LiveImage, LiveMount, LiveNetwork, LiveVolume,
    normalize_reference, remote_digest,
};
pub use resolve::{effective_exit_code, effective_health, effective_state};

use crate::compose::Catalog;
use crate::error::{ApiError, ObjectKind, Result};
use crate::hash::pick_range;
use crate::state::{RuntimeStateStore, StateSnapshot};
use crate::types::{ContainerState, Health};
use std::collections::BTreeSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

/// A container together with its state as resolved at read time.
#[derive(Debug, Clone)]
pub struct ContainerView {
    pub container: Arc<LiveContainer>,
    pub state: ContainerState,
    pub health: Health,
    pub exit_code: i64,
}

impl Deref for ContainerView {
    type Target = LiveContainer;

    fn deref(&self) -> &Self::Target {
        &self.container
    }
}

impl ContainerView {
    /// The human-readable status column of `docker ps`.
    pub fn status_text(&self) -> String {
        let key = self.container.key();
        let hours = pick_range(&key, "uptime", 2, 72);
        match self.state {
            ContainerState::Running => match self.health {
                Health::None => format!("Up {} hours", hours),
                Health::Starting => format!("Up {} hours (health: starting)", hours),
                health => format!("Up {} hours ({})", hours, health),
            },
            ContainerState::Paused => format!("Up {} hours (Paused)", hours),
            ContainerState::Restarting => {
                format!("Restarting ({}) {} seconds ago", self.exit_code, hours)
            }
            ContainerState::Exited => format!("Exited ({}) {} hours ago", self.exit_code, hours),
            ContainerState::Created => "Created".to_string(),
            ContainerState::Dead => "Dead".to_string(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.state.is_up()
    }
}

/// A consistent read view: one graph and one state snapshot.
#[derive(Debug, Clone)]
pub struct WorldView {
    pub graph: Arc<LiveGraph>,
    pub state: StateSnapshot,
}

impl WorldView {
    pub fn view(&self, container: &Arc<LiveContainer>) -> ContainerView {
        let state = effective_state(container, &self.state);
        ContainerView {
            container: container.clone(),
            state,
            health: effective_health(container, state),
            exit_code: effective_exit_code(container, state),
        }
    }

    /// Containers sorted by ID; `all=false` keeps only running, paused and
    /// restarting ones.
    pub fn list_containers(&self, all: bool, project: Option<&str>) -> Vec<ContainerView> {
        self.graph
            .containers
            .values()
            .filter(|c| project.is_none_or(|p| c.stack == p))
            .map(|c| self.view(c))
            .filter(|v| all || v.is_up())
            .collect()
    }

    /// Finds a container by ID, name (with or without the leading `/`) or a
    /// unique ID prefix.
    pub fn inspect_container(&self, id_or_name: &str) -> Result<ContainerView, ApiError> {
        let not_found = || ApiError::not_found(ObjectKind::Container, id_or_name);
        let needle = id_or_name.trim_start_matches('/');
        if needle.is_empty() {
            return Err(not_found());
        }
        let id = if self.graph.containers.contains_key(needle) {
            needle.to_string()
        } else if let Some(id) = self.graph.names.get(needle) {
            id.clone()
        } else {
            unique_prefix(self.graph.containers.keys(), needle).ok_or_else(not_found)?
        };
        self.graph
            .containers
            .get(&id)
            .map(|c| self.view(c))
            .ok_or_else(not_found)
    }

    pub fn list_networks(&self) -> Vec<&LiveNetwork> {
        self.graph.networks.values().collect()
    }

    pub fn inspect_network(&self, name_or_id: &str) -> Result<&LiveNetwork, ApiError> {
        if let Some(network) = self.graph.networks.get(name_or_id) {
            return Ok(network);
        }
        let matches: Vec<&LiveNetwork> = self
            .graph
            .networks
            .values()
            .filter(|n| !name_or_id.is_empty() && n.id.starts_with(name_or_id))
            .collect();
        match matches.as_slice() {
            [network] => Ok(network),
            _ => Err(ApiError::not_found(ObjectKind::Network, name_or_id)),
        }
    }

    pub fn list_volumes(&self) -> Vec<&LiveVolume> {
        self.graph.volumes.values().collect()
    }

    pub fn inspect_volume(&self, name: &str) -> Result<&LiveVolume, ApiError> {
        self.graph
            .volumes
            .get(name)
            .ok_or_else(|| ApiError::not_found(ObjectKind::Volume, name))
    }

    pub fn list_images(&self) -> Vec<&LiveImage> {
        self.graph.images.values().collect()
    }

    /// Finds an image by reference (`nginx`, `nginx:latest`,
    /// `docker.io/library/nginx`), full ID, or unique ID prefix.
    pub fn inspect_image(&self, name: &str) -> Result<&LiveImage, ApiError> {
        let not_found = || ApiError::not_found(ObjectKind::Image, name);
        let short = name
            .strip_prefix("docker.io/library/")
            .or_else(|| name.strip_prefix("docker.io/"))
            .unwrap_or(name);
        if let Some(image) = self.graph.images.get(&normalize_reference(short)) {
            return Ok(image);
        }
        let hex = name.strip_prefix("sha256:").unwrap_or(name);
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(not_found());
        }
        let matches: Vec<&LiveImage> = self
            .graph
            .images
            .values()
            .filter(|i| i.id.trim_start_matches("sha256:").starts_with(hex))
            .collect();
        match matches.as_slice() {
            [image] => Ok(image),
            _ => Err(not_found()),
        }
    }

    /// Number of containers (any state) created from an image.
    pub fn image_users(&self, image_id: &str) -> usize {
        self.graph
            .containers
            .values()
            .filter(|c| c.image_id == image_id)
            .count()
    }

    /// Images no container was created from; what a prune would remove.
    pub fn unused_images(&self) -> Vec<&LiveImage> {
        self.list_images()
            .into_iter()
            .filter(|image| self.image_users(&image.id) == 0)
            .collect()
    }
}

fn unique_prefix<'a>(ids: impl Iterator<Item = &'a String>, prefix: &str) -> Option<String> {
    let mut found = ids.filter(|id| id.starts_with(prefix));
    let first = found.next()?;
    found.next().is_none().then(|| first.clone())
}

/// Owner of the current catalog, live graph and runtime state.
#[derive(Debug)]
pub struct WorldModel {
    catalog: RwLock<Arc<Catalog>>,
    graph: RwLock<Arc<LiveGraph>>,
    state: Arc<RuntimeStateStore>,
    source: Option<(PathBuf, String)>,
}

impl WorldModel {
    /// Builds the world from a catalog, seeding the state store from it.
    pub fn new(catalog: Catalog) -> Self {
        let state = Arc::new(RuntimeStateStore::new(catalog.seed_statuses()));
        Self::with_state(catalog, state)
    }

    pub fn with_state(catalog: Catalog, state: Arc<RuntimeStateStore>) -> Self {
        let graph = LiveGraph::build(&catalog);
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            graph: RwLock::new(Arc::new(graph)),
            state,
            source: None,
        }
    }

    /// Loads the catalog from a stacks directory and remembers it for
    /// `reload`.
    pub fn load(stacks_dir: &Path, override_file: &str) -> Result<Self> {
        let catalog = Catalog::load(stacks_dir, override_file)?;
        let mut world = Self::new(catalog);
        world.source = Some((stacks_dir.to_path_buf(), override_file.to_string()));
        Ok(world)
    }

    pub fn state(&self) -> &Arc<RuntimeStateStore> {
        &self.state
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn graph(&self) -> Arc<LiveGraph> {
        self.graph.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current graph and state, captured together.
    pub fn view(&self) -> WorldView {
        WorldView {
            graph: self.graph(),
            state: self.state.snapshot_all(),
        }
    }

    /// Re-derives the live graph from the current catalog and swaps it in.
    pub fn rebuild(&self) {
        let catalog = self.catalog();
        let graph = Arc::new(LiveGraph::build(&catalog));
        info!(
            "🌍 World rebuilt: {} containers, {} networks",
            graph.containers.len(),
            graph.networks.len()
        );
        *self.graph.write().unwrap_or_else(|e| e.into_inner()) = graph;
    }

    /// Installs a new catalog. New stacks are seeded into the state store,
    /// vanished stacks are dropped from it.
    pub fn replace_catalog(&self, catalog: Catalog) {
        let previous: BTreeSet<String> = self.catalog().stacks.keys().cloned().collect();
        let seeds = catalog.seed_statuses();
        for (stack, status) in &seeds {
            if !previous.contains(stack) {
                self.state.seed(stack, *status);
            }
        }
        for stack in previous.iter().filter(|s| !seeds.contains_key(*s)) {
            self.state.unseed(stack);
        }
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(catalog);
        self.rebuild();
    }

    pub fn add_stack_from_yaml(&self, name: &str, yaml: &str) -> Result<()> {
        let mut catalog = (*self.catalog()).clone();
        catalog.add_stack_from_yaml(name, yaml)?;
        self.replace_catalog(catalog);
        Ok(())
    }

    pub fn remove_stack(&self, name: &str) -> bool {
        let mut catalog = (*self.catalog()).clone();
        let removed = catalog.remove_stack(name);
        if removed {
            self.replace_catalog(catalog);
        }
        removed
    }

    /// Rebuilds the catalog from disk, when the world was loaded from disk.
    pub fn reload(&self) -> Result<()> {
        if let Some((dir, override_file)) = &self.source {
            let catalog = Catalog::load(dir, override_file)?;
            self.replace_catalog(catalog);
        }
        Ok(())
    }

    pub fn list_containers(&self, all: bool, project: Option<&str>) -> Vec<ContainerView> {
        self.view().list_containers(all, project)
    }

    pub fn inspect_container(&self, id_or_name: &str) -> Result<ContainerView, ApiError> {
        self.view().inspect_container(id_or_name)
    }

    pub fn effective_state(&self, container: &LiveContainer) -> ContainerState {
        effective_state(container, &self.state.snapshot_all())
    }
}
