//! Compose manifests, the override file and the catalog built from them.

pub mod catalog;
pub mod manifest;
pub mod overrides;
pub mod shorthand;

pub use catalog::{
    Catalog, ImageMeta, MountDef, NetworkMeta, ServiceDef, ServiceNetworkDef, StackDef,
    VolumeMeta, find_manifest,
};
pub use manifest::{ComposeFile, parse_manifest};
pub use overrides::OverrideFile;
pub use shorthand::{MountKind, PortSpec};

pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_CONTAINER_NUMBER: &str = "com.docker.compose.container-number";
pub const LABEL_ONEOFF: &str = "com.docker.compose.oneoff";
pub const LABEL_CONFIG_FILES: &str = "com.docker.compose.project.config_files";
pub const LABEL_WORKING_DIR: &str = "com.docker.compose.project.working_dir";
pub const LABEL_CONFIG_HASH: &str = "com.docker.compose.config-hash";
pub const LABEL_VERSION: &str = "com.docker.compose.version";
pub const LABEL_NETWORK: &str = "com.docker.compose.network";
pub const LABEL_VOLUME: &str = "com.docker.compose.volume";

/// Compose version stamped on synthetic objects.
pub const COMPOSE_VERSION: &str = "2.24.5";

/// Prefix of generated container names: `mock-{stack}-{service}-1`.
pub const CONTAINER_NAME_PREFIX: &str = "mock-";
