use crate::compose::{Catalog, MountKind, PortSpec, ServiceDef};
use crate::hash::{SYNTHETIC_EPOCH, hex_id, pick};
use crate::types::{ContainerState, Health};
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, warn};

const VOLUME_ROOT: &str = "/var/lib/docker/volumes";

/// A container's attachment to one network.
///
/// The same record is referenced from the container and from the network so
/// both inspect views report identical addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub network: String,
    pub network_id: String,
    pub endpoint_id: String,
    pub container_id: String,
    pub container_name: String,
    pub ip: Option<Ipv4Addr>,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
    pub mac: String,
    pub aliases: Vec<String>,
}

impl Endpoint {
    pub fn ip_string(&self) -> String {
        self.ip.map(|ip| ip.to_string()).unwrap_or_default()
    }

    pub fn gateway_string(&self) -> String {
        self.gateway.map(|gw| gw.to_string()).unwrap_or_default()
    }

    /// `ip/prefix` as the network inspect view reports it.
    pub fn cidr(&self) -> String {
        match self.ip {
            Some(ip) => format!("{}/{}", ip, self.prefix_len),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMount {
    pub kind: MountKind,
    /// Volume name; empty for binds and tmpfs.
    pub name: String,
    /// Host-side path.
    pub source: String,
    pub destination: String,
    pub read_write: bool,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveContainer {
    pub id: String,
    pub name: String,
    pub stack: String,
    pub service: String,
    /// Image reference the container runs.
    pub image: String,
    pub image_id: String,
    /// Image declared in the manifest, which may differ from `image`.
    pub declared_image: String,
    pub update_available: bool,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub process: Option<(String, Vec<String>)>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub hostname: String,
    pub restart: String,
    /// Structural state from the catalog; never the effective state.
    pub placeholder: ContainerState,
    pub health: Health,
    pub exit_code: i64,
    pub tty: bool,
    pub mounts: Vec<LiveMount>,
    pub ports: Vec<PortSpec>,
    pub labels: BTreeMap<String, String>,
    pub created: i64,
    pub started: i64,
    pub networks: BTreeMap<String, Arc<Endpoint>>,
}

impl LiveContainer {
    pub fn is_standalone(&self) -> bool {
        self.stack.is_empty()
    }

    /// Stable key the synthetic figures of this container derive from.
    pub fn key(&self) -> String {
        if self.is_standalone() {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.stack, self.service)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveNetwork {
    pub name: String,
    pub id: String,
    pub driver: String,
    pub scope: String,
    pub internal: bool,
    pub subnet: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
    pub labels: BTreeMap<String, String>,
    pub project: Option<String>,
    pub created: i64,
    /// Container ID → endpoint.
    pub containers: BTreeMap<String, Arc<Endpoint>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveVolume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: BTreeMap<String, String>,
    pub project: Option<String>,
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveImage {
    /// Normalized `repo:tag` reference.
    pub reference: String,
    pub id: String,
    pub repo_digest: String,
    pub size: i64,
    pub created: i64,
    pub update_available: bool,
}

impl LiveImage {
    pub fn repository(&self) -> &str {
        split_reference(&self.reference).0
    }
}

/// The materialized world: immutable once built, replaced wholesale.
#[derive(Debug, Clone, Default)]
pub struct LiveGraph {
    pub containers: BTreeMap<String, Arc<LiveContainer>>,
    pub names: HashMap<String, String>,
    pub networks: BTreeMap<String, LiveNetwork>,
    pub volumes: BTreeMap<String, LiveVolume>,
    pub images: BTreeMap<String, LiveImage>,
}

impl LiveGraph {
    /// Derives the whole graph from a catalog. Pure: equal catalogs give
    /// equal graphs.
    pub fn build(catalog: &Catalog) -> Self {
        let mut graph = LiveGraph::default();

        // images
        for meta in catalog.images.values() {
            let reference = normalize_reference(&meta.reference);
            let (repo, _) = split_reference(&reference);
            graph.images.insert(
                reference.clone(),
                LiveImage {
                    id: image_id(&reference),
                    repo_digest: format!("{}@{}", repo, local_digest(&reference)),
                    reference,
                    size: meta.size,
                    created: meta.created,
                    update_available: meta.update_available,
                },
            );
        }

        // volumes
        for meta in catalog.volumes.values() {
            graph.volumes.insert(
                meta.name.clone(),
                LiveVolume {
                    name: meta.name.clone(),
                    driver: meta.driver.clone(),
                    mountpoint: format!("{}/{}/_data", VOLUME_ROOT, meta.name),
                    labels: meta.labels.clone(),
                    project: meta.project.clone(),
                    created: SYNTHETIC_EPOCH - pick(&meta.name, "created", 60 * 86_400) as i64,
                },
            );
        }

        // networks: explicit subnets claim their space before derived ones
        let mut taken: BTreeSet<Ipv4Net> = catalog
            .networks
            .values()
            .filter_map(|meta| meta.subnet)
            .filter(usable_subnet)
            .collect();
        for meta in catalog.networks.values() {
            let addressed = !matches!(meta.driver.as_str(), "host" | "null")
                && !matches!(meta.name.as_str(), "host" | "none");
            let explicit = meta.subnet.filter(|subnet| {
                let usable = usable_subnet(subnet);
                if !usable {
                    warn!(
                        "Ignoring subnet {} of network {}, prefix must be /{} to /{}",
                        subnet, meta.name, MIN_PREFIX, MAX_PREFIX
                    );
                }
                usable
            });
            let subnet = match explicit {
                Some(subnet) => Some(subnet),
                None if addressed => derive_subnet(&meta.name, &mut taken),
                None => None,
            };
            let gateway = explicit
                .and(meta.gateway)
                .or_else(|| subnet.and_then(|net| host_at(&net, 1)));
            graph.networks.insert(
                meta.name.clone(),
                LiveNetwork {
                    name: meta.name.clone(),
                    id: hex_id(&format!("network:{}", meta.name)),
                    driver: meta.driver.clone(),
                    scope: meta.scope.clone(),
                    internal: meta.internal,
                    subnet,
                    gateway,
                    labels: meta.labels.clone(),
                    project: meta.project.clone(),
                    created: SYNTHETIC_EPOCH - pick(&meta.name, "created", 60 * 86_400) as i64,
                    containers: BTreeMap::new(),
                },
            );
        }

        let defs: Vec<&ServiceDef> = catalog.container_defs().collect();

        // explicit addresses are reserved before any derived allocation
        let mut used: HashMap<String, BTreeSet<Ipv4Addr>> = HashMap::new();
        for network in graph.networks.values() {
            let reserved = used.entry(network.name.clone()).or_default();
            reserved.extend(network.gateway);
        }
        for def in &defs {
            for attachment in &def.networks {
                if let Some(ip) = attachment.ipv4 {
                    used.entry(attachment.network.clone()).or_default().insert(ip);
                }
            }
        }

        for def in defs {
            let container = build_container(def, &mut graph, &mut used);
            if graph.names.contains_key(&container.name) {
                warn!("Duplicate container name {}, keeping the first", container.name);
                continue;
            }
            for (network, endpoint) in &container.networks {
                if let Some(live) = graph.networks.get_mut(network) {
                    live.containers
                        .insert(container.id.clone(), endpoint.clone());
                }
            }
            graph.names.insert(container.name.clone(), container.id.clone());
            graph.containers.insert(container.id.clone(), Arc::new(container));
        }

        debug!(
            containers = graph.containers.len(),
            networks = graph.networks.len(),
            "Live graph built"
        );
        graph
    }
}

fn build_container(
    def: &ServiceDef,
    graph: &mut LiveGraph,
    used: &mut HashMap<String, BTreeSet<Ipv4Addr>>,
) -> LiveContainer {
    let key = def.key();
    let id = hex_id(&format!("container:{}", key));
    let image = normalize_reference(def.effective_image());

    let mut networks = BTreeMap::new();
    for attachment in &def.networks {
        let Some(network) = graph.networks.get(&attachment.network) else {
            warn!("{} references unknown network {}", key, attachment.network);
            continue;
        };
        let ip = match (attachment.ipv4, network.subnet) {
            (Some(ip), _) => Some(ip),
            (None, Some(subnet)) => {
                let reserved = used.entry(network.name.clone()).or_default();
                let ip = allocate_ip(&subnet, &format!("{}@{}", key, network.name), reserved);
                reserved.extend(ip);
                ip
            }
            (None, None) => None,
        };
        let mac = attachment
            .mac
            .clone()
            .or_else(|| ip.map(mac_for))
            .unwrap_or_default();
        let endpoint = Endpoint {
            network: network.name.clone(),
            network_id: network.id.clone(),
            endpoint_id: hex_id(&format!("endpoint:{}:{}", id, network.name)),
            container_id: id.clone(),
            container_name: def.container_name.clone(),
            ip,
            prefix_len: network.subnet.map(|s| s.prefix_len()).unwrap_or(0),
            gateway: network.gateway,
            mac,
            aliases: attachment.aliases.clone(),
        };
        networks.insert(network.name.clone(), Arc::new(endpoint));
    }

    let mounts = def
        .mounts
        .iter()
        .map(|mount| match mount.kind {
            MountKind::Volume => LiveMount {
                kind: MountKind::Volume,
                name: mount.source.clone(),
                source: graph
                    .volumes
                    .get(&mount.source)
                    .map(|v| v.mountpoint.clone())
                    .unwrap_or_else(|| format!("{}/{}/_data", VOLUME_ROOT, mount.source)),
                destination: mount.target.clone(),
                read_write: !mount.read_only,
                driver: "local".to_string(),
            },
            kind => LiveMount {
                kind,
                name: String::new(),
                source: mount.source.clone(),
                destination: mount.target.clone(),
                read_write: !mount.read_only,
                driver: String::new(),
            },
        })
        .collect();

    let created = SYNTHETIC_EPOCH - 3_600 - pick(&key, "created", 30 * 86_400) as i64;
    let started = created + 1 + pick(&key, "started", 120) as i64;

    LiveContainer {
        image_id: image_id(&image),
        image,
        declared_image: normalize_reference(&def.image),
        update_available: def.update_available,
        entrypoint: def.entrypoint.clone(),
        command: def.command.clone(),
        process: def.process.clone(),
        env: def.env.clone(),
        working_dir: def.working_dir.clone().unwrap_or_default(),
        user: def.user.clone().unwrap_or_default(),
        hostname: def
            .hostname
            .clone()
            .unwrap_or_else(|| id[..12].to_string()),
        restart: def.restart.clone(),
        placeholder: def.state,
        health: def.health,
        exit_code: def.exit_code,
        tty: def.tty,
        mounts,
        ports: def.ports.clone(),
        labels: def.labels.clone(),
        created,
        started,
        networks,
        name: def.container_name.clone(),
        stack: def.stack.clone(),
        service: def.service.clone(),
        id,
    }
}

/// `nginx` → `nginx:latest`; digests and explicit tags are kept.
pub fn normalize_reference(reference: &str) -> String {
    if reference.contains('@') {
        return reference.to_string();
    }
    let last = reference.rsplit('/').next().unwrap_or(reference);
    if last.contains(':') {
        reference.to_string()
    } else {
        format!("{}:latest", reference)
    }
}

/// Splits `repo:tag` (the tag may be empty for digest references).
pub fn split_reference(reference: &str) -> (&str, &str) {
    if let Some((repo, _)) = reference.split_once('@') {
        return (repo, "");
    }
    let slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[slash..].rfind(':') {
        Some(colon) => (&reference[..slash + colon], &reference[slash + colon + 1..]),
        None => (reference, ""),
    }
}

pub fn image_id(reference: &str) -> String {
    format!("sha256:{}", hex_id(&format!("image:{}", reference)))
}

/// Digest of the locally present image.
pub fn local_digest(reference: &str) -> String {
    format!("sha256:{}", hex_id(&format!("digest:{}", reference)))
}

/// Digest the registry advertises; differs from the local one when an
/// update is pending.
pub fn remote_digest(reference: &str, update_available: bool) -> String {
    if update_available {
        format!("sha256:{}", hex_id(&format!("digest:{}#next", reference)))
    } else {
        local_digest(reference)
    }
}

fn derive_subnet(name: &str, taken: &mut BTreeSet<Ipv4Net>) -> Option<Ipv4Net> {
    // 172.18.0.0/24 .. 172.31.255.0/24, clear of the default bridge
    const SLOTS: u64 = 14 * 256;
    let start = pick(name, "subnet", SLOTS);
    for offset in 0..SLOTS {
        let slot = (start + offset) % SLOTS;
        let second = 18 + (slot / 256) as u8;
        let third = (slot % 256) as u8;
        let Ok(candidate) = Ipv4Net::new(Ipv4Addr::new(172, second, third, 0), 24) else {
            continue;
        };
        if !taken.iter().any(|t| t.contains(&candidate) || candidate.contains(t)) {
            taken.insert(candidate);
            return Some(candidate);
        }
    }
    warn!("No free subnet left for network {}", name);
    None
}

/// Widest and narrowest prefixes a network may use.
const MIN_PREFIX: u8 = 8;
const MAX_PREFIX: u8 = 30;

/// Addresses tried before giving up on a crowded subnet.
const MAX_PROBES: u64 = 4096;

fn usable_subnet(subnet: &Ipv4Net) -> bool {
    (MIN_PREFIX..=MAX_PREFIX).contains(&subnet.prefix_len())
}

fn host_at(subnet: &Ipv4Net, index: u64) -> Option<Ipv4Addr> {
    let base = u32::from(subnet.network()) as u64;
    let hosts = host_count(subnet);
    (index >= 1 && index <= hosts)
        .then(|| u32::try_from(base + index).ok().map(Ipv4Addr::from))
        .flatten()
}

fn host_count(subnet: &Ipv4Net) -> u64 {
    match subnet.prefix_len() {
        p if p >= 31 => 0,
        p => (1u64 << (32 - u32::from(p))).saturating_sub(2),
    }
}

/// Hash-derived host address, probing linearly past addresses in use.
fn allocate_ip(subnet: &Ipv4Net, key: &str, used: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let hosts = host_count(subnet);
    if hosts == 0 {
        return None;
    }
    let start = pick(key, "ip", hosts);
    (0..hosts.min(MAX_PROBES))
        .map(|offset| 1 + (start + offset) % hosts)
        .filter_map(|index| host_at(subnet, index))
        .find(|ip| !used.contains(ip))
}

/// The engine's convention: `02:42:` followed by the IPv4 octets.
pub fn mac_for(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("02:42:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::OverrideFile;

    const APP: &str = r#"
services:
  web:
    image: nginx
    networks: [frontend, backend]
  api:
    image: node:20
    networks:
      backend:
        ipv4_address: 10.40.0.10
  db:
    image: postgres:16
    networks: [backend]
    volumes: ["pgdata:/var/lib/postgresql/data"]
networks:
  backend:
    ipam:
      config:
        - subnet: 10.40.0.0/24
volumes:
  pgdata:
"#;

    fn graph() -> LiveGraph {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog.add_stack_from_yaml("shop", APP).unwrap();
        LiveGraph::build(&catalog)
    }

    #[test]
    fn test_reference_normalization() {
        assert_eq!(normalize_reference("nginx"), "nginx:latest");
        assert_eq!(normalize_reference("postgres:16"), "postgres:16");
        assert_eq!(
            normalize_reference("localhost:5000/app"),
            "localhost:5000/app:latest"
        );
        assert_eq!(split_reference("localhost:5000/app:1.2"), ("localhost:5000/app", "1.2"));
        assert_eq!(split_reference("redis@sha256:abc"), ("redis", ""));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = graph();
        let b = graph();
        assert_eq!(a.containers, b.containers);
        assert_eq!(a.networks, b.networks);
    }

    #[test]
    fn test_endpoints_shared_between_views() {
        let graph = graph();
        let id = &graph.names["mock-shop-web-1"];
        let container = &graph.containers[id];
        for (name, endpoint) in &container.networks {
            let from_network = &graph.networks[name].containers[id];
            assert!(Arc::ptr_eq(endpoint, from_network));
        }
    }

    #[test]
    fn test_explicit_and_derived_addresses() {
        let graph = graph();
        let backend = &graph.networks["shop_backend"];
        assert_eq!(backend.subnet.unwrap().to_string(), "10.40.0.0/24");
        assert_eq!(backend.gateway, Some(Ipv4Addr::new(10, 40, 0, 1)));

        let api = &graph.containers[&graph.names["mock-shop-api-1"]];
        let endpoint = &api.networks["shop_backend"];
        assert_eq!(endpoint.ip, Some(Ipv4Addr::new(10, 40, 0, 10)));
        assert_eq!(endpoint.mac, "02:42:0a:28:00:0a");
        assert_eq!(endpoint.cidr(), "10.40.0.10/24");

        let ips: BTreeSet<_> = backend.containers.values().filter_map(|e| e.ip).collect();
        assert_eq!(ips.len(), backend.containers.len());
        assert!(!ips.contains(&Ipv4Addr::new(10, 40, 0, 1)));

        let frontend = &graph.networks["shop_frontend"];
        let subnet = frontend.subnet.unwrap();
        assert_eq!(subnet.prefix_len(), 24);
        assert_eq!(subnet.addr().octets()[0], 172);
    }

    fn network_with_subnet(subnet: &str) -> String {
        format!(
            "services:\n  app:\n    image: redis:7\n    networks: [edge]\nnetworks:\n  edge:\n    ipam:\n      config:\n        - subnet: {}\n",
            subnet
        )
    }

    #[test]
    fn test_unusable_subnets_fall_back_to_derived() {
        for subnet in ["0.0.0.0/0", "10.0.0.0/1", "10.9.9.9/31", "10.9.9.9/32"] {
            let mut catalog = Catalog::new(OverrideFile::default());
            catalog
                .add_stack_from_yaml("edge", &network_with_subnet(subnet))
                .unwrap();
            let graph = LiveGraph::build(&catalog);

            let network = &graph.networks["edge_edge"];
            let derived = network.subnet.unwrap();
            assert_eq!(derived.prefix_len(), 24, "subnet {}", subnet);
            assert_eq!(derived.addr().octets()[0], 172);
            let app = &graph.containers[&graph.names["mock-edge-app-1"]];
            let ip = app.networks["edge_edge"].ip.unwrap();
            assert!(derived.contains(&ip));
            assert_ne!(Some(ip), network.gateway);
        }
    }

    #[test]
    fn test_host_arithmetic_at_the_edges() {
        let wide: Ipv4Net = "10.0.0.0/8".parse().unwrap();
        assert_eq!(host_count(&wide), (1 << 24) - 2);
        assert_eq!(host_at(&wide, 1), Some(Ipv4Addr::new(10, 0, 0, 1)));
        let narrow: Ipv4Net = "10.0.0.0/30".parse().unwrap();
        assert_eq!(host_count(&narrow), 2);
        assert_eq!(host_at(&narrow, 3), None);
        for edge in ["0.0.0.0/0", "10.0.0.0/31", "10.0.0.0/32"] {
            let subnet: Ipv4Net = edge.parse().unwrap();
            assert!(!usable_subnet(&subnet));
        }
        let zero: Ipv4Net = "0.0.0.0/0".parse().unwrap();
        assert_eq!(host_count(&zero), u32::MAX as u64 - 1);
        assert_eq!(host_count(&"10.0.0.0/31".parse().unwrap()), 0);

        // a full subnet yields no address instead of an endless probe
        let used: BTreeSet<Ipv4Addr> = [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)].into();
        assert_eq!(allocate_ip(&narrow, "key", &used), None);
    }

    #[test]
    fn test_volume_mounts_resolve() {
        let graph = graph();
        let db = &graph.containers[&graph.names["mock-shop-db-1"]];
        assert_eq!(db.mounts[0].name, "shop_pgdata");
        assert_eq!(db.mounts[0].source, "/var/lib/docker/volumes/shop_pgdata/_data");
        assert!(db.mounts[0].read_write);
        assert_eq!(db.image, "postgres:16");
        assert!(graph.images.contains_key("nginx:latest"));
    }
}
