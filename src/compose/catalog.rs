use super::manifest::{
    ComposeFile, ComposeNetwork, ComposePort, ComposeService, ComposeVolume, ComposeVolumeSpec,
    parse_manifest, yaml_scalar,
};
use super::overrides::{OverrideFile, ServiceOverride};
use super::shorthand::{MountKind, MountSpec, PortSpec, parse_mount, parse_port};
use super::{
    COMPOSE_VERSION, CONTAINER_NAME_PREFIX, LABEL_CONFIG_FILES, LABEL_CONFIG_HASH,
    LABEL_CONTAINER_NUMBER, LABEL_NETWORK, LABEL_ONEOFF, LABEL_PROJECT, LABEL_SERVICE,
    LABEL_VERSION, LABEL_VOLUME, LABEL_WORKING_DIR,
};
use crate::error::Result;
use crate::hash::{SYNTHETIC_EPOCH, hex_id, pick, pick_range};
use crate::types::{ContainerState, Health, StackStatus};
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Conventional manifest names, tried in order; the first match wins.
pub const MANIFEST_FILENAMES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Built-in engine networks present on every host.
pub const BUILTIN_NETWORKS: [&str; 3] = ["bridge", "host", "none"];

#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
    pub reference: String,
    pub size: i64,
    pub created: i64,
    pub update_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMeta {
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub internal: bool,
    pub subnet: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
    pub project: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMeta {
    pub name: String,
    pub driver: String,
    pub project: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackDef {
    pub name: String,
    pub manifest: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub external: bool,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceNetworkDef {
    pub network: String,
    pub aliases: Vec<String>,
    pub ipv4: Option<Ipv4Addr>,
    pub mac: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountDef {
    pub kind: MountKind,
    /// Fully qualified volume name, or host path for binds.
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything the world model needs to materialize one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDef {
    /// Empty for standalone containers.
    pub stack: String,
    pub service: String,
    pub container_name: String,
    pub image: String,
    pub running_image: Option<String>,
    pub update_available: bool,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    /// Explicit process path/args, bypassing entrypoint + command.
    pub process: Option<(String, Vec<String>)>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub restart: String,
    pub networks: Vec<ServiceNetworkDef>,
    pub mounts: Vec<MountDef>,
    pub ports: Vec<PortSpec>,
    pub labels: BTreeMap<String, String>,
    pub state: ContainerState,
    pub health: Health,
    pub exit_code: i64,
    pub tty: bool,
}

impl ServiceDef {
    /// `stack/service`, or `/name` for standalone containers.
    pub fn key(&self) -> String {
        if self.stack.is_empty() {
            format!("/{}", self.container_name)
        } else {
            format!("{}/{}", self.stack, self.service)
        }
    }

    /// Image the container actually runs, which may drift from the declared one.
    pub fn effective_image(&self) -> &str {
        self.running_image.as_deref().unwrap_or(&self.image)
    }
}

/// Normalized, stateless view of every manifest plus the override file.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub images: BTreeMap<String, ImageMeta>,
    pub networks: BTreeMap<String, NetworkMeta>,
    pub volumes: BTreeMap<String, VolumeMeta>,
    pub stacks: BTreeMap<String, StackDef>,
    pub services: BTreeMap<String, ServiceDef>,
    pub standalone: BTreeMap<String, ServiceDef>,
    pub overrides: OverrideFile,
}

/// Finds the first conventional manifest in a stack directory.
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

impl Catalog {
    /// An empty catalog holding only the built-in networks.
    pub fn new(overrides: OverrideFile) -> Self {
        let mut catalog = Self {
            overrides,
            ..Default::default()
        };
        for name in BUILTIN_NETWORKS {
            let (driver, subnet, gateway) = match name {
                "bridge" => (
                    "bridge",
                    "172.17.0.0/16".parse::<Ipv4Net>().ok(),
                    Some(Ipv4Addr::new(172, 17, 0, 1)),
                ),
                other => (other, None, None),
            };
            catalog.networks.insert(
                name.to_string(),
                NetworkMeta {
                    name: name.to_string(),
                    driver: driver.to_string(),
                    scope: "local".to_string(),
                    internal: false,
                    subnet,
                    gateway,
                    project: None,
                    labels: BTreeMap::new(),
                },
            );
        }
        catalog
    }

    /// Builds the catalog from a directory of stack directories.
    ///
    /// Stacks whose manifest cannot be recovered are skipped; only an
    /// unreadable override file that exists but is invalid is reported, and
    /// even then as a warning with an empty override.
    pub fn load(stacks_dir: &Path, override_file: &str) -> Result<Self> {
        let override_path = stacks_dir.join(override_file);
        let overrides = match OverrideFile::load(&override_path) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!("Ignoring override file: {}", e);
                OverrideFile::default()
            }
        };

        let mut catalog = Self::new(overrides);

        if !stacks_dir.is_dir() {
            warn!("Stacks directory {} does not exist", stacks_dir.display());
            catalog.apply_unmanaged();
            return Ok(catalog);
        }

        let entries = WalkDir::new(stacks_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir());

        let mut skipped = 0usize;
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(manifest) = find_manifest(entry.path()) else {
                debug!("{} has no compose manifest, not a managed stack", name);
                continue;
            };
            match catalog.load_stack(&name, &manifest) {
                Ok(()) => debug!("Loaded stack {} from {}", name, manifest.display()),
                Err(e) => {
                    warn!("Skipping stack {}: {}", name, e);
                    skipped += 1;
                }
            }
        }

        catalog.apply_unmanaged();
        info!(
            "📚 Catalog built: {} stacks, {} services, {} networks, {} volumes ({} skipped)",
            catalog.stacks.len(),
            catalog.services.len(),
            catalog.networks.len(),
            catalog.volumes.len(),
            skipped
        );
        Ok(catalog)
    }

    fn load_stack(&mut self, name: &str, manifest: &Path) -> Result<()> {
        let content = std::fs::read_to_string(manifest)?;
        let file = parse_manifest(name, &content)?;
        self.add_stack(name, Some(manifest), &file);
        Ok(())
    }

    /// Adds (or replaces) an ad hoc stack from manifest text.
    pub fn add_stack_from_yaml(&mut self, name: &str, yaml: &str) -> Result<()> {
        let file = parse_manifest(name, yaml)?;
        self.remove_stack(name);
        self.add_stack(name, None, &file);
        Ok(())
    }

    /// Removes a stack with its services, networks and volumes.
    pub fn remove_stack(&mut self, name: &str) -> bool {
        let existed = self.stacks.remove(name).is_some();
        self.services.retain(|_, svc| svc.stack != name);
        self.networks
            .retain(|_, net| net.project.as_deref() != Some(name));
        self.volumes
            .retain(|_, vol| vol.project.as_deref() != Some(name));
        if existed {
            self.refresh_images();
        }
        existed
    }

    /// Initial runtime status per stack: override status, else running.
    pub fn seed_statuses(&self) -> BTreeMap<String, StackStatus> {
        self.stacks
            .values()
            .map(|stack| {
                let status = if stack.external {
                    self.overrides
                        .external
                        .get(&stack.name)
                        .and_then(|s| s.status)
                } else {
                    self.overrides.stacks.get(&stack.name).and_then(|s| s.status)
                };
                (stack.name.clone(), status.unwrap_or(StackStatus::Running))
            })
            .collect()
    }

    pub fn service(&self, stack: &str, service: &str) -> Option<&ServiceDef> {
        self.services.get(&format!("{}/{}", stack, service))
    }

    /// All container definitions: stack services, then standalone ones.
    pub fn container_defs(&self) -> impl Iterator<Item = &ServiceDef> {
        self.services.values().chain(self.standalone.values())
    }

    /// Adds one stack's declarations to the catalog.
    pub fn add_stack(&mut self, stack: &str, manifest: Option<&Path>, file: &ComposeFile) {
        let working_dir = manifest.and_then(|m| m.parent()).map(Path::to_path_buf);
        let declared_networks = file.networks.clone().unwrap_or_default();
        let declared_volumes = file.volumes.clone().unwrap_or_default();

        // top-level networks
        for (key, decl) in &declared_networks {
            let decl = decl.clone().unwrap_or_default();
            let meta = network_meta(stack, key, &decl);
            self.networks.entry(meta.name.clone()).or_insert(meta);
        }

        // top-level volumes
        for (key, decl) in &declared_volumes {
            let decl = decl.clone().unwrap_or_default();
            let meta = volume_meta(stack, key, &decl);
            self.volumes.entry(meta.name.clone()).or_insert(meta);
        }

        let mut service_names = Vec::new();
        for (name, svc) in &file.services {
            let def = self.service_def(
                stack,
                name,
                svc,
                manifest,
                working_dir.as_deref(),
                &declared_networks,
                &declared_volumes,
            );
            service_names.push(name.clone());
            self.services.insert(def.key(), def);
        }

        self.stacks.insert(
            stack.to_string(),
            StackDef {
                name: stack.to_string(),
                manifest: manifest.map(Path::to_path_buf),
                working_dir,
                external: false,
                services: service_names,
            },
        );
        self.refresh_images();
    }

    #[allow(clippy::too_many_arguments)]
    fn service_def(
        &mut self,
        stack: &str,
        name: &str,
        svc: &ComposeService,
        manifest: Option<&Path>,
        working_dir: Option<&Path>,
        declared_networks: &BTreeMap<String, Option<ComposeNetwork>>,
        declared_volumes: &BTreeMap<String, Option<ComposeVolumeSpec>>,
    ) -> ServiceDef {
        let ovr = self.overrides.service(stack, name).cloned().unwrap_or_default();
        let container_name = svc
            .container_name
            .clone()
            .unwrap_or_else(|| format!("{}{}-{}-1", CONTAINER_NAME_PREFIX, stack, name));
        let image = svc
            .image
            .clone()
            .unwrap_or_else(|| format!("{}-{}", stack, name));

        // networks
        let mut networks = Vec::new();
        match svc.network_mode.as_deref() {
            Some(mode @ ("host" | "none" | "bridge")) => networks.push(ServiceNetworkDef {
                network: mode.to_string(),
                aliases: Vec::new(),
                ipv4: None,
                mac: None,
            }),
            Some(_) => {}
            None => {
                let keys = svc.network_keys();
                let keys = if keys.is_empty() {
                    vec![("default".to_string(), Default::default())]
                } else {
                    keys
                };
                for (key, cfg) in keys {
                    let decl = declared_networks.get(&key).cloned().flatten().unwrap_or_default();
                    let meta = network_meta(stack, &key, &decl);
                    let full = meta.name.clone();
                    self.networks.entry(full.clone()).or_insert(meta);

                    let endpoint = ovr.networks.get(&key).or_else(|| ovr.networks.get(&full));
                    let ipv4 = endpoint
                        .and_then(|e| e.ipv4_address.as_deref())
                        .or(cfg.ipv4_address.as_deref())
                        .and_then(|ip| ip.parse().ok());
                    let mac = endpoint
                        .and_then(|e| e.mac_address.clone())
                        .or(cfg.mac_address.clone())
                        .or(svc.mac_address.clone());

                    let mut aliases = vec![container_name.clone(), name.to_string()];
                    aliases.extend(cfg.aliases.clone().unwrap_or_default());
                    networks.push(ServiceNetworkDef {
                        network: full,
                        aliases,
                        ipv4,
                        mac,
                    });
                }
            }
        }

        // mounts
        let mut mounts = Vec::new();
        for volume in svc.volumes.iter().flatten() {
            let spec = match volume {
                ComposeVolume::String(s) => parse_mount(s),
                ComposeVolume::Long {
                    volume_type,
                    source,
                    target,
                    read_only,
                } => {
                    let kind = match volume_type.as_str() {
                        "bind" => MountKind::Bind,
                        "tmpfs" => MountKind::Tmpfs,
                        _ => MountKind::Volume,
                    };
                    Some(MountSpec {
                        kind,
                        source: source.clone().unwrap_or_default(),
                        target: target.clone(),
                        read_only: read_only.unwrap_or(false),
                    })
                }
            };
            let Some(spec) = spec else {
                warn!("{}/{}: ignoring unparseable volume entry", stack, name);
                continue;
            };
            mounts.push(self.mount_def(stack, name, spec, working_dir, declared_volumes));
        }

        // ports
        let ports = svc
            .ports
            .iter()
            .flatten()
            .flat_map(|port| match port {
                ComposePort::Number(p) => parse_port(&p.to_string()),
                ComposePort::String(s) => parse_port(s),
                ComposePort::Long {
                    target,
                    published,
                    protocol,
                    host_ip,
                } => vec![PortSpec {
                    host_ip: host_ip.clone(),
                    host_port: published.as_ref().and_then(|p| yaml_scalar(p).parse().ok()),
                    container_port: *target,
                    protocol: protocol.clone().unwrap_or_else(|| "tcp".to_string()),
                }],
            })
            .collect();

        // labels
        let mut labels = svc
            .labels
            .as_ref()
            .map(|l| l.to_map())
            .unwrap_or_default();
        labels.extend(compose_labels(stack, name, &image, manifest, working_dir));

        let env = ovr
            .env
            .clone()
            .unwrap_or_else(|| svc.environment.as_ref().map(|e| e.to_pairs()).unwrap_or_default());

        let has_healthcheck = svc
            .healthcheck
            .as_ref()
            .is_some_and(|h| !h.disable.unwrap_or(false) && h.test.is_some());
        let health = ovr.health.unwrap_or(if has_healthcheck {
            Health::Healthy
        } else {
            Health::None
        });

        ServiceDef {
            stack: stack.to_string(),
            service: name.to_string(),
            container_name,
            running_image: ovr.running_image.clone().filter(|r| r != &image),
            image,
            update_available: ovr.update_available.unwrap_or(false),
            entrypoint: svc.entrypoint.as_ref().map(|e| e.to_vec()),
            command: svc.command.as_ref().map(|c| c.to_vec()),
            process: explicit_process(&ovr),
            env,
            working_dir: svc.working_dir.clone(),
            user: svc.user.clone(),
            hostname: svc.hostname.clone(),
            restart: ovr
                .restart
                .clone()
                .or(svc.restart.clone())
                .unwrap_or_else(|| "no".to_string()),
            networks,
            mounts,
            ports,
            labels,
            state: ovr.state.unwrap_or(ContainerState::Running),
            health,
            exit_code: ovr.exit_code.unwrap_or(0),
            tty: svc.tty.unwrap_or(false),
        }
    }

    fn mount_def(
        &mut self,
        stack: &str,
        service: &str,
        spec: MountSpec,
        working_dir: Option<&Path>,
        declared_volumes: &BTreeMap<String, Option<ComposeVolumeSpec>>,
    ) -> MountDef {
        let source = match spec.kind {
            MountKind::Bind => match (spec.source.strip_prefix("./"), working_dir) {
                (Some(relative), Some(dir)) => dir.join(relative).display().to_string(),
                _ => spec.source.clone(),
            },
            MountKind::Tmpfs => String::new(),
            MountKind::Volume if spec.source.is_empty() => {
                let name = hex_id(&format!("volume:{}/{}:{}", stack, service, spec.target));
                self.volumes.entry(name.clone()).or_insert(VolumeMeta {
                    name: name.clone(),
                    driver: "local".to_string(),
                    project: Some(stack.to_string()),
                    labels: BTreeMap::from([(
                        "com.docker.volume.anonymous".to_string(),
                        String::new(),
                    )]),
                });
                name
            }
            MountKind::Volume => {
                let decl = declared_volumes
                    .get(&spec.source)
                    .cloned()
                    .flatten()
                    .unwrap_or_default();
                let meta = volume_meta(stack, &spec.source, &decl);
                let name = meta.name.clone();
                self.volumes.entry(name.clone()).or_insert(meta);
                name
            }
        };
        MountDef {
            kind: spec.kind,
            source,
            target: spec.target,
            read_only: spec.read_only,
        }
    }

    /// Registers external stacks and standalone containers from the overrides.
    pub fn apply_unmanaged(&mut self) {
        let overrides = self.overrides.clone();

        for (stack, ext) in &overrides.external {
            if self.stacks.get(stack).is_some_and(|s| !s.external) {
                warn!("External stack {} shadows a managed stack, ignoring", stack);
                continue;
            }
            let meta = network_meta(stack, "default", &ComposeNetwork::default());
            let network = meta.name.clone();
            self.networks.entry(network.clone()).or_insert(meta);

            for (name, svc) in &ext.services {
                let container_name = format!("{}{}-{}-1", CONTAINER_NAME_PREFIX, stack, name);
                let mut labels = compose_labels(stack, name, &svc.image, None, None);
                labels.remove(LABEL_CONFIG_FILES);
                labels.remove(LABEL_WORKING_DIR);
                let def = ServiceDef {
                    stack: stack.clone(),
                    service: name.clone(),
                    networks: vec![ServiceNetworkDef {
                        network: network.clone(),
                        aliases: vec![container_name.clone(), name.clone()],
                        ipv4: None,
                        mac: None,
                    }],
                    ports: svc.ports.iter().flat_map(|p| parse_port(p)).collect(),
                    command: svc.command.as_ref().map(|c| c.to_vec()),
                    labels,
                    state: svc.state.unwrap_or(ContainerState::Running),
                    health: svc.health.unwrap_or_default(),
                    ..bare_def(&container_name, &svc.image)
                };
                self.services.insert(def.key(), def);
            }
            self.stacks.insert(
                stack.clone(),
                StackDef {
                    name: stack.clone(),
                    manifest: None,
                    working_dir: None,
                    external: true,
                    services: ext.services.keys().cloned().collect(),
                },
            );
        }

        for standalone in &overrides.standalone {
            if standalone.name.is_empty() || standalone.image.is_empty() {
                warn!("Standalone container without name or image, ignoring");
                continue;
            }
            let networks = if standalone.networks.is_empty() {
                vec!["bridge".to_string()]
            } else {
                standalone.networks.clone()
            };
            let mut mounts = Vec::new();
            for spec in standalone.volumes.iter().filter_map(|v| parse_mount(v)) {
                let source = match spec.kind {
                    MountKind::Volume if !spec.source.is_empty() => {
                        self.volumes
                            .entry(spec.source.clone())
                            .or_insert_with(|| VolumeMeta {
                                name: spec.source.clone(),
                                driver: "local".to_string(),
                                project: None,
                                labels: BTreeMap::new(),
                            });
                        spec.source.clone()
                    }
                    _ => spec.source.clone(),
                };
                mounts.push(MountDef {
                    kind: spec.kind,
                    source,
                    target: spec.target,
                    read_only: spec.read_only,
                });
            }
            for network in &networks {
                if !self.networks.contains_key(network) {
                    let meta = NetworkMeta {
                        name: network.clone(),
                        driver: "bridge".to_string(),
                        scope: "local".to_string(),
                        internal: false,
                        subnet: None,
                        gateway: None,
                        project: None,
                        labels: BTreeMap::new(),
                    };
                    self.networks.insert(network.clone(), meta);
                }
            }
            let def = ServiceDef {
                networks: networks
                    .into_iter()
                    .map(|network| ServiceNetworkDef {
                        network,
                        aliases: Vec::new(),
                        ipv4: None,
                        mac: None,
                    })
                    .collect(),
                mounts,
                ports: standalone.ports.iter().flat_map(|p| parse_port(p)).collect(),
                command: standalone.command.as_ref().map(|c| c.to_vec()),
                env: standalone.env.clone(),
                labels: standalone.labels.clone(),
                restart: standalone.restart.clone().unwrap_or_else(|| "no".to_string()),
                state: standalone.state.unwrap_or(ContainerState::Running),
                health: standalone.health.unwrap_or_default(),
                ..bare_def(&standalone.name, &standalone.image)
            };
            self.standalone.insert(standalone.name.clone(), def);
        }

        self.refresh_images();
    }

    /// Recomputes the image map from every referenced image.
    pub fn refresh_images(&mut self) {
        let mut references: BTreeSet<String> = BTreeSet::new();
        let mut outdated: BTreeSet<String> = BTreeSet::new();
        for def in self.services.values().chain(self.standalone.values()) {
            references.insert(def.image.clone());
            if let Some(running) = &def.running_image {
                references.insert(running.clone());
            }
            if def.update_available {
                outdated.insert(def.effective_image().to_string());
            }
        }
        references.extend(self.overrides.images.keys().cloned());

        self.images = references
            .into_iter()
            .map(|reference| {
                let explicit = self.overrides.images.get(&reference);
                let size = explicit.and_then(|i| i.size).unwrap_or_else(|| {
                    pick_range(&reference, "size", 5_000_000, 450_000_000) as i64
                });
                let created = explicit.and_then(|i| i.created).unwrap_or_else(|| {
                    SYNTHETIC_EPOCH - pick(&reference, "created", 180 * 86_400) as i64
                });
                let meta = ImageMeta {
                    update_available: outdated.contains(&reference),
                    reference: reference.clone(),
                    size,
                    created,
                };
                (reference, meta)
            })
            .collect();
    }
}

fn bare_def(container_name: &str, image: &str) -> ServiceDef {
    ServiceDef {
        stack: String::new(),
        service: String::new(),
        container_name: container_name.to_string(),
        image: image.to_string(),
        running_image: None,
        update_available: false,
        entrypoint: None,
        command: None,
        process: None,
        env: Vec::new(),
        working_dir: None,
        user: None,
        hostname: None,
        restart: "no".to_string(),
        networks: Vec::new(),
        mounts: Vec::new(),
        ports: Vec::new(),
        labels: BTreeMap::new(),
        state: ContainerState::Running,
        health: Health::None,
        exit_code: 0,
        tty: false,
    }
}

fn explicit_process(ovr: &ServiceOverride) -> Option<(String, Vec<String>)> {
    let command = ovr.command.as_ref()?.to_vec();
    let (path, rest) = command.split_first()?;
    let mut args = rest.to_vec();
    args.extend(ovr.args.clone().unwrap_or_default());
    Some((path.clone(), args))
}

fn network_meta(stack: &str, key: &str, decl: &ComposeNetwork) -> NetworkMeta {
    let external = decl.external.as_ref().is_some_and(|e| e.is_external());
    let name = match (&decl.name, &decl.external) {
        (Some(name), _) => name.clone(),
        (None, Some(super::manifest::External::Named { name })) => name.clone(),
        _ if external => key.to_string(),
        _ => format!("{}_{}", stack, key),
    };

    let ipam = decl
        .ipam
        .as_ref()
        .and_then(|i| i.config.as_ref())
        .and_then(|c| c.first());
    let subnet: Option<Ipv4Net> = ipam
        .and_then(|c| c.subnet.as_deref())
        .and_then(|s| s.parse().ok());
    let gateway: Option<Ipv4Addr> = ipam
        .and_then(|c| c.gateway.as_deref())
        .and_then(|g| g.parse().ok());

    let mut labels = decl.labels.as_ref().map(|l| l.to_map()).unwrap_or_default();
    if !external {
        labels.insert(LABEL_NETWORK.to_string(), key.to_string());
        labels.insert(LABEL_PROJECT.to_string(), stack.to_string());
        labels.insert(LABEL_VERSION.to_string(), COMPOSE_VERSION.to_string());
    }

    NetworkMeta {
        name,
        driver: decl.driver.clone().unwrap_or_else(|| "bridge".to_string()),
        scope: "local".to_string(),
        internal: decl.internal.unwrap_or(false),
        subnet,
        gateway,
        project: (!external).then(|| stack.to_string()),
        labels,
    }
}

fn volume_meta(stack: &str, key: &str, decl: &ComposeVolumeSpec) -> VolumeMeta {
    let external = decl.external.as_ref().is_some_and(|e| e.is_external());
    let name = match (&decl.name, &decl.external) {
        (Some(name), _) => name.clone(),
        (None, Some(super::manifest::External::Named { name })) => name.clone(),
        _ if external => key.to_string(),
        _ => format!("{}_{}", stack, key),
    };
    let mut labels = decl.labels.as_ref().map(|l| l.to_map()).unwrap_or_default();
    if !external {
        labels.insert(LABEL_PROJECT.to_string(), stack.to_string());
        labels.insert(LABEL_VOLUME.to_string(), key.to_string());
        labels.insert(LABEL_VERSION.to_string(), COMPOSE_VERSION.to_string());
    }
    VolumeMeta {
        name,
        driver: decl.driver.clone().unwrap_or_else(|| "local".to_string()),
        project: (!external).then(|| stack.to_string()),
        labels,
    }
}

fn compose_labels(
    stack: &str,
    service: &str,
    image: &str,
    manifest: Option<&Path>,
    working_dir: Option<&Path>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PROJECT.to_string(), stack.to_string());
    labels.insert(LABEL_SERVICE.to_string(), service.to_string());
    labels.insert(LABEL_CONTAINER_NUMBER.to_string(), "1".to_string());
    labels.insert(LABEL_ONEOFF.to_string(), "False".to_string());
    labels.insert(LABEL_VERSION.to_string(), COMPOSE_VERSION.to_string());
    labels.insert(
        LABEL_CONFIG_HASH.to_string(),
        hex_id(&format!("config:{}/{}:{}", stack, service, image)),
    );
    labels.insert(
        LABEL_CONFIG_FILES.to_string(),
        manifest.map(|m| m.display().to_string()).unwrap_or_default(),
    );
    labels.insert(
        LABEL_WORKING_DIR.to_string(),
        working_dir.map(|d| d.display().to_string()).unwrap_or_default(),
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TEST_APP: &str = r#"
services:
  web:
    image: nginx:latest
    ports:
      - "8080:80"
    networks:
      - frontend
  db:
    image: postgres:16
    volumes:
      - pgdata:/var/lib/postgresql/data
      - ./init:/docker-entrypoint-initdb.d:ro
    networks:
      - backend
volumes:
  pgdata:
"#;

    fn write_stack(root: &Path, name: &str, file: &str, content: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_manifest_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "services: {}").unwrap();
        fs::write(dir.path().join("compose.yml"), "services: {}").unwrap();
        assert_eq!(
            find_manifest(dir.path()).unwrap().file_name().unwrap(),
            "compose.yml"
        );
        let empty = tempfile::tempdir().unwrap();
        assert!(find_manifest(empty.path()).is_none());
    }

    #[test]
    fn test_namespaced_networks_and_volumes() {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog.add_stack_from_yaml("test-app", TEST_APP).unwrap();

        assert!(catalog.networks.contains_key("test-app_frontend"));
        assert!(catalog.networks.contains_key("test-app_backend"));
        assert!(!catalog.networks.contains_key("test-app_default"));
        assert!(catalog.volumes.contains_key("test-app_pgdata"));

        let db = catalog.service("test-app", "db").unwrap();
        assert_eq!(db.mounts[0].kind, MountKind::Volume);
        assert_eq!(db.mounts[0].source, "test-app_pgdata");
        assert_eq!(db.mounts[1].kind, MountKind::Bind);
        assert!(db.mounts[1].read_only);
        assert_eq!(db.container_name, "mock-test-app-db-1");
        assert_eq!(db.labels[LABEL_PROJECT], "test-app");
        assert!(catalog.images.contains_key("postgres:16"));
    }

    #[test]
    fn test_implicit_default_network() {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog
            .add_stack_from_yaml("my-stack", "services:\n  app:\n    image: alpine\n")
            .unwrap();
        assert!(catalog.networks.contains_key("my-stack_default"));
        let app = catalog.service("my-stack", "app").unwrap();
        assert_eq!(app.networks[0].network, "my-stack_default");
        assert_eq!(app.networks[0].aliases, vec!["mock-my-stack-app-1", "app"]);
    }

    #[test]
    fn test_undeclared_service_network_is_namespaced() {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog
            .add_stack_from_yaml(
                "my-stack",
                "services:\n  app:\n    image: alpine\n    networks: [frontend]\n",
            )
            .unwrap();
        assert!(catalog.networks.contains_key("my-stack_frontend"));
        assert!(!catalog.networks.contains_key("my-stack_default"));
    }

    #[test]
    fn test_load_skips_broken_stacks() {
        let root = tempfile::tempdir().unwrap();
        write_stack(root.path(), "test-app", "compose.yaml", TEST_APP);
        write_stack(root.path(), "broken", "docker-compose.yml", ":::: not yaml [");
        fs::create_dir_all(root.path().join("not-a-stack")).unwrap();

        let catalog = Catalog::load(root.path(), "mock.yaml").unwrap();
        assert_eq!(catalog.stacks.keys().collect::<Vec<_>>(), vec!["test-app"]);
        assert_eq!(
            catalog.seed_statuses().get("test-app"),
            Some(&StackStatus::Running)
        );
    }

    #[test]
    fn test_overrides_apply() {
        let root = tempfile::tempdir().unwrap();
        write_stack(root.path(), "test-app", "compose.yaml", TEST_APP);
        fs::write(
            root.path().join("mock.yaml"),
            r#"
stacks:
  test-app:
    status: exited
    services:
      web:
        health: unhealthy
        running_image: nginx:1.25
        update_available: true
        networks:
          frontend: { ipv4_address: 172.28.0.5 }
      db:
        state: exited
        exit_code: 1
standalone:
  - name: portainer
    image: portainer/portainer-ce:latest
    volumes: ["portainer_data:/data"]
external:
  legacy:
    services:
      api: { image: "legacy/api:2.1" }
"#,
        )
        .unwrap();

        let catalog = Catalog::load(root.path(), "mock.yaml").unwrap();
        let web = catalog.service("test-app", "web").unwrap();
        assert_eq!(web.health, Health::Unhealthy);
        assert_eq!(web.effective_image(), "nginx:1.25");
        assert_eq!(web.networks[0].ipv4, Some(Ipv4Addr::new(172, 28, 0, 5)));
        assert!(catalog.images["nginx:1.25"].update_available);
        assert!(!catalog.images["nginx:latest"].update_available);

        let db = catalog.service("test-app", "db").unwrap();
        assert_eq!(db.state, ContainerState::Exited);

        assert_eq!(
            catalog.seed_statuses().get("test-app"),
            Some(&StackStatus::Exited)
        );
        assert!(catalog.stacks["legacy"].external);
        assert!(catalog.networks.contains_key("legacy_default"));
        assert!(catalog.standalone.contains_key("portainer"));
        assert!(catalog.volumes.contains_key("portainer_data"));
    }

    #[test]
    fn test_remove_stack() {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog.add_stack_from_yaml("test-app", TEST_APP).unwrap();
        assert!(catalog.remove_stack("test-app"));
        assert!(catalog.services.is_empty());
        assert!(!catalog.networks.contains_key("test-app_frontend"));
        assert!(catalog.images.is_empty());
        assert!(catalog.networks.contains_key("bridge"));
    }
}
