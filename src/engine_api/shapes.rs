//! Conversion of world objects into engine wire shapes.

use super::synth::{self, ONLINE_CPUS, image_defaults, rfc3339};
use super::types::*;
use crate::compose::MountKind;
use crate::hash::{hex_id, pick};
use crate::types::{ContainerState, Health};
use crate::world::{
    ContainerView, Endpoint, LiveImage, LiveMount, LiveNetwork, LiveVolume, WorldView,
    remote_digest,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// The engine's zero time, used for timestamps that never happened.
pub const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

pub const ENGINE_VERSION: &str = "24.0.7";
const KERNEL_VERSION: &str = "6.5.0-mock";

fn endpoint_settings(endpoint: &Endpoint) -> EndpointSettings {
    EndpointSettings {
        ipam_config: None,
        links: None,
        aliases: (!endpoint.aliases.is_empty()).then(|| endpoint.aliases.clone()),
        mac_address: endpoint.mac.clone(),
        network_id: endpoint.network_id.clone(),
        endpoint_id: endpoint.endpoint_id.clone(),
        gateway: endpoint.gateway_string(),
        ip_address: endpoint.ip_string(),
        ip_prefix_len: endpoint.prefix_len,
        ipv6_gateway: String::new(),
        global_ipv6_address: String::new(),
        global_ipv6_prefix_len: 0,
        driver_opts: None,
        dns_names: (!endpoint.aliases.is_empty()).then(|| {
            let mut names = endpoint.aliases.clone();
            names.push(endpoint.container_id[..12].to_string());
            names
        }),
    }
}

fn network_map(view: &ContainerView) -> BTreeMap<String, EndpointSettings> {
    view.networks
        .iter()
        .map(|(name, endpoint)| (name.clone(), endpoint_settings(endpoint)))
        .collect()
}

fn mount_point(mount: &LiveMount) -> MountPoint {
    let is_volume = mount.kind == MountKind::Volume;
    MountPoint {
        mount_type: mount.kind.as_str().to_string(),
        name: is_volume.then(|| mount.name.clone()),
        source: mount.source.clone(),
        destination: mount.destination.clone(),
        driver: is_volume.then(|| mount.driver.clone()),
        mode: if mount.read_write { "rw" } else { "ro" }.to_string(),
        rw: mount.read_write,
        propagation: if mount.kind == MountKind::Bind {
            "rprivate".to_string()
        } else {
            String::new()
        },
    }
}

fn network_mode(view: &ContainerView) -> String {
    view.networks
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| "none".to_string())
}

fn summary_ports(view: &ContainerView) -> Vec<Port> {
    let published = view.state == ContainerState::Running;
    view.ports
        .iter()
        .map(|port| {
            let public = port.host_port.filter(|_| published);
            Port {
                ip: public.map(|_| port.host_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string())),
                private_port: port.container_port,
                public_port: public,
                port_type: port.protocol.clone(),
            }
        })
        .collect()
}

pub fn container_summary(view: &ContainerView) -> ContainerSummary {
    ContainerSummary {
        id: view.id.clone(),
        names: vec![format!("/{}", view.name)],
        image: view.image.clone(),
        image_id: view.image_id.clone(),
        command: synth::command_line(view),
        created: view.created,
        ports: summary_ports(view),
        labels: view.labels.clone(),
        state: view.state.as_str().to_string(),
        status: view.status_text(),
        host_config: SummaryHostConfig {
            network_mode: network_mode(view),
        },
        network_settings: SummaryNetworkSettings {
            networks: network_map(view),
        },
        mounts: view.mounts.iter().map(mount_point).collect(),
    }
}

fn main_pid(view: &ContainerView) -> u64 {
    match view.state {
        ContainerState::Running | ContainerState::Paused => {
            1_000 + pick(&view.key(), "pid", 60_000)
        }
        _ => 0,
    }
}

fn state_shape(view: &ContainerView) -> ContainerStateShape {
    let hours = crate::hash::pick_range(&view.key(), "uptime", 2, 72) as i64;
    let (started_at, finished_at) = match view.state {
        ContainerState::Created => (ZERO_TIME.to_string(), ZERO_TIME.to_string()),
        ContainerState::Exited | ContainerState::Dead => {
            (rfc3339(view.started), rfc3339(view.started + hours * 3_600))
        }
        _ => (rfc3339(view.started), ZERO_TIME.to_string()),
    };
    let health = (view.health != Health::None).then(|| HealthState {
        status: view.health.as_str().to_string(),
        failing_streak: if view.health == Health::Unhealthy {
            3
        } else {
            0
        },
        log: Vec::new(),
    });
    ContainerStateShape {
        status: view.state.as_str().to_string(),
        running: matches!(view.state, ContainerState::Running | ContainerState::Paused),
        paused: view.state == ContainerState::Paused,
        restarting: view.state == ContainerState::Restarting,
        oom_killed: false,
        dead: view.state == ContainerState::Dead,
        pid: main_pid(view),
        exit_code: view.exit_code,
        error: String::new(),
        started_at,
        finished_at,
        health,
    }
}

pub fn container_inspect(view: &ContainerView) -> ContainerInspect {
    let (path, args) = synth::process(view);
    let defaults = image_defaults(&view.image);
    let running = view.state == ContainerState::Running;
    let container_root = format!("/var/lib/docker/containers/{}", view.id);

    let mut port_bindings: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    let mut ports: BTreeMap<String, Option<Vec<PortBinding>>> = defaults
        .exposed
        .iter()
        .map(|key| (key.clone(), None))
        .collect();
    for port in view.ports.iter() {
        let entry = ports.entry(port.key()).or_insert(None);
        if let Some(host_port) = port.host_port {
            let binding = PortBinding {
                host_ip: port.host_ip.clone().unwrap_or_default(),
                host_port: host_port.to_string(),
            };
            port_bindings
                .entry(port.key())
                .or_default()
                .push(binding.clone());
            if running {
                entry.get_or_insert_with(Vec::new).push(PortBinding {
                    host_ip: port.host_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
                    host_port: binding.host_port,
                });
            }
        }
    }
    let exposed: BTreeMap<String, Value> = ports.keys().map(|k| (k.clone(), json!({}))).collect();

    let binds: Vec<String> = view
        .mounts
        .iter()
        .filter(|m| m.kind != MountKind::Tmpfs)
        .map(|m| {
            let source = if m.kind == MountKind::Volume { &m.name } else { &m.source };
            format!(
                "{}:{}:{}",
                source,
                m.destination,
                if m.read_write { "rw" } else { "ro" }
            )
        })
        .collect();
    let volumes: BTreeMap<String, Value> = view
        .mounts
        .iter()
        .filter(|m| m.kind == MountKind::Volume)
        .map(|m| (m.destination.clone(), json!({})))
        .collect();

    // legacy top-level fields mirror the default bridge endpoint
    let bridge = view.networks.get("bridge").filter(|_| running);
    let (restart_name, retries) = match view.restart.split_once(':') {
        Some((name, count)) => (name.to_string(), count.parse().unwrap_or(0)),
        None => (view.restart.clone(), 0),
    };

    ContainerInspect {
        id: view.id.clone(),
        created: rfc3339(view.created),
        path,
        args,
        state: state_shape(view),
        image: view.image_id.clone(),
        resolv_conf_path: format!("{}/resolv.conf", container_root),
        hostname_path: format!("{}/hostname", container_root),
        hosts_path: format!("{}/hosts", container_root),
        log_path: format!("{}/{}-json.log", container_root, view.id),
        name: format!("/{}", view.name),
        restart_count: 0,
        driver: "overlay2".to_string(),
        platform: "linux".to_string(),
        mount_label: String::new(),
        process_label: String::new(),
        app_armor_profile: String::new(),
        exec_ids: None,
        host_config: InspectHostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            network_mode: network_mode(view),
            port_bindings,
            restart_policy: RestartPolicy {
                name: restart_name,
                maximum_retry_count: retries,
            },
            auto_remove: false,
            privileged: false,
            publish_all_ports: false,
            readonly_rootfs: false,
        },
        graph_driver: GraphDriver {
            name: "overlay2".to_string(),
            data: BTreeMap::from([
                (
                    "MergedDir".to_string(),
                    format!("/var/lib/docker/overlay2/{}/merged", &view.id[..24]),
                ),
                (
                    "UpperDir".to_string(),
                    format!("/var/lib/docker/overlay2/{}/diff", &view.id[..24]),
                ),
            ]),
        },
        mounts: view.mounts.iter().map(mount_point).collect(),
        config: ContainerConfig {
            hostname: view.hostname.clone(),
            domainname: String::new(),
            user: view.user.clone(),
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
            exposed_ports: (!exposed.is_empty()).then_some(exposed),
            tty: view.tty,
            open_stdin: false,
            stdin_once: false,
            env: view.env.clone(),
            cmd: view
                .command
                .clone()
                .or_else(|| view.entrypoint.is_none().then(|| defaults.cmd.clone())),
            image: view.image.clone(),
            volumes: (!volumes.is_empty()).then_some(volumes),
            working_dir: if view.working_dir.is_empty() {
                defaults.working_dir.clone()
            } else {
                view.working_dir.clone()
            },
            entrypoint: view
                .entrypoint
                .clone()
                .or_else(|| (!defaults.entrypoint.is_empty()).then(|| defaults.entrypoint.clone())),
            on_build: None,
            labels: view.labels.clone(),
        },
        network_settings: InspectNetworkSettings {
            bridge: String::new(),
            sandbox_id: if running {
                hex_id(&format!("sandbox:{}", view.id))
            } else {
                String::new()
            },
            sandbox_key: if running {
                format!("/var/run/docker/netns/{}", &hex_id(&format!("sandbox:{}", view.id))[..12])
            } else {
                String::new()
            },
            ports,
            endpoint_id: bridge.map(|e| e.endpoint_id.clone()).unwrap_or_default(),
            gateway: bridge.map(|e| e.gateway_string()).unwrap_or_default(),
            ip_address: bridge.map(|e| e.ip_string()).unwrap_or_default(),
            ip_prefix_len: bridge.map(|e| e.prefix_len).unwrap_or(0),
            mac_address: bridge.map(|e| e.mac.clone()).unwrap_or_default(),
            networks: network_map(view),
        },
    }
}

// ---------------------------------------------------------------------------
// images

pub fn image_summary(image: &LiveImage, containers: usize) -> ImageSummary {
    ImageSummary {
        id: image.id.clone(),
        parent_id: String::new(),
        repo_tags: vec![image.reference.clone()],
        repo_digests: vec![image.repo_digest.clone()],
        created: image.created,
        size: image.size,
        shared_size: -1,
        labels: None,
        containers: containers as i64,
    }
}

pub fn image_inspect(image: &LiveImage) -> ImageInspect {
    let defaults = image_defaults(&image.reference);
    let layers = synth::layers(&image.reference, image.size, image.created);
    let exposed: BTreeMap<String, Value> = defaults
        .exposed
        .iter()
        .map(|k| (k.clone(), json!({})))
        .collect();
    ImageInspect {
        id: image.id.clone(),
        repo_tags: vec![image.reference.clone()],
        repo_digests: vec![image.repo_digest.clone()],
        parent: String::new(),
        comment: String::new(),
        created: rfc3339(image.created),
        docker_version: "20.10.23".to_string(),
        author: String::new(),
        config: ImageConfig {
            env: vec![
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            ],
            cmd: (!defaults.cmd.is_empty()).then(|| defaults.cmd.clone()),
            entrypoint: (!defaults.entrypoint.is_empty()).then(|| defaults.entrypoint.clone()),
            working_dir: defaults.working_dir.clone(),
            exposed_ports: (!exposed.is_empty()).then_some(exposed),
            labels: None,
        },
        architecture: "amd64".to_string(),
        os: "linux".to_string(),
        size: image.size,
        graph_driver: GraphDriver {
            name: "overlay2".to_string(),
            data: BTreeMap::new(),
        },
        root_fs: RootFs {
            fs_type: "layers".to_string(),
            layers: layers
                .iter()
                .filter(|l| l.size > 0)
                .map(|l| l.diff_id.clone())
                .collect(),
        },
        metadata: ImageMetadata {
            last_tag_time: ZERO_TIME.to_string(),
        },
    }
}

pub fn image_history(image: &LiveImage) -> Vec<HistoryItem> {
    let layers = synth::layers(&image.reference, image.size, image.created);
    let newest = layers.len().saturating_sub(1);
    layers
        .into_iter()
        .enumerate()
        .rev()
        .map(|(i, layer)| HistoryItem {
            id: if i == newest {
                image.id.clone()
            } else {
                "<missing>".to_string()
            },
            created: layer.created,
            created_by: layer.created_by,
            tags: (i == newest).then(|| vec![image.reference.clone()]),
            size: layer.size,
            comment: String::new(),
        })
        .collect()
}

/// Registry view of a reference. Unknown references get the neutral empty
/// result, since registry lookups are best effort.
pub fn distribution(image: Option<&LiveImage>) -> DistributionInspect {
    let Some(image) = image else {
        return DistributionInspect {
            descriptor: Descriptor {
                media_type: String::new(),
                digest: String::new(),
                size: 0,
            },
            platforms: Vec::new(),
        };
    };
    DistributionInspect {
        descriptor: Descriptor {
            media_type: "application/vnd.oci.image.index.v1+json".to_string(),
            digest: remote_digest(&image.reference, image.update_available),
            size: 1_000 + pick(&image.reference, "index-size", 9_000) as i64,
        },
        platforms: ["amd64", "arm64"]
            .iter()
            .map(|arch| DistributionPlatform {
                architecture: arch.to_string(),
                os: "linux".to_string(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// networks and volumes

pub fn network_resource(network: &LiveNetwork, with_containers: bool) -> NetworkResource {
    let containers = if with_containers {
        network
            .containers
            .iter()
            .map(|(id, endpoint)| {
                (
                    id.clone(),
                    NetworkContainer {
                        name: endpoint.container_name.clone(),
                        endpoint_id: endpoint.endpoint_id.clone(),
                        mac_address: endpoint.mac.clone(),
                        ipv4_address: endpoint.cidr(),
                        ipv6_address: String::new(),
                    },
                )
            })
            .collect()
    } else {
        BTreeMap::new()
    };
    let options = if network.name == "bridge" {
        BTreeMap::from([
            ("com.docker.network.bridge.default_bridge".to_string(), "true".to_string()),
            ("com.docker.network.bridge.name".to_string(), "docker0".to_string()),
        ])
    } else {
        BTreeMap::new()
    };
    NetworkResource {
        name: network.name.clone(),
        id: network.id.clone(),
        created: rfc3339(network.created),
        scope: network.scope.clone(),
        driver: network.driver.clone(),
        enable_ipv6: false,
        ipam: Ipam {
            driver: "default".to_string(),
            options: None,
            config: network
                .subnet
                .map(|subnet| IpamConfig {
                    subnet: subnet.to_string(),
                    gateway: network.gateway.map(|g| g.to_string()).unwrap_or_default(),
                })
                .into_iter()
                .collect(),
        },
        internal: network.internal,
        attachable: false,
        ingress: false,
        config_from: ConfigReference {
            network: String::new(),
        },
        config_only: false,
        containers,
        options,
        labels: network.labels.clone(),
    }
}

pub fn volume_resource(volume: &LiveVolume) -> VolumeResource {
    VolumeResource {
        created_at: rfc3339(volume.created),
        driver: volume.driver.clone(),
        labels: volume.labels.clone(),
        mountpoint: volume.mountpoint.clone(),
        name: volume.name.clone(),
        options: None,
        scope: "local".to_string(),
    }
}

// ---------------------------------------------------------------------------
// stats

fn cpu_stats(total: u64, system: Option<u64>, online: Option<u64>) -> CpuStats {
    CpuStats {
        cpu_usage: CpuUsage {
            total_usage: total,
            usage_in_kernelmode: total / 5,
            usage_in_usermode: total - total / 5,
        },
        system_cpu_usage: system,
        online_cpus: online,
        throttling_data: ThrottlingData {
            periods: 0,
            throttled_periods: 0,
            throttled_time: 0,
        },
    }
}

fn empty_blkio(entries: Option<Vec<BlkioEntry>>) -> BlkioStats {
    BlkioStats {
        io_service_bytes_recursive: entries,
        io_serviced_recursive: None,
        io_queue_recursive: None,
        io_service_time_recursive: None,
        io_wait_time_recursive: None,
        io_merged_recursive: None,
        io_time_recursive: None,
        sectors_recursive: None,
    }
}

/// One stats sample. `now` is unix seconds of the read; `tick` advances the
/// counters between streamed samples.
pub fn stats_response(view: &ContainerView, tick: u64, now: i64) -> StatsResponse {
    let name = format!("/{}", view.name);
    if !view.is_up() {
        return StatsResponse {
            name,
            id: view.id.clone(),
            read: ZERO_TIME.to_string(),
            preread: ZERO_TIME.to_string(),
            pids_stats: PidsStats {
                current: None,
                limit: None,
            },
            blkio_stats: empty_blkio(None),
            num_procs: 0,
            storage_stats: BTreeMap::new(),
            cpu_stats: cpu_stats(0, None, None),
            precpu_stats: cpu_stats(0, None, None),
            memory_stats: MemoryStats::default(),
            networks: None,
        };
    }

    let figures = synth::stats_figures(&view.key(), tick);
    let interfaces = view.networks.len().max(1) as u64;
    let networks = (0..interfaces)
        .map(|i| {
            let rx = figures.net_rx / interfaces;
            let tx = figures.net_tx / interfaces;
            (
                format!("eth{}", i),
                NetworkStats {
                    rx_bytes: rx,
                    rx_packets: rx / 800,
                    rx_errors: 0,
                    rx_dropped: 0,
                    tx_bytes: tx,
                    tx_packets: tx / 600,
                    tx_errors: 0,
                    tx_dropped: 0,
                },
            )
        })
        .collect();

    StatsResponse {
        name,
        id: view.id.clone(),
        read: rfc3339(now),
        preread: rfc3339(now - 1),
        pids_stats: PidsStats {
            current: Some(figures.pids),
            limit: Some(u64::from(u32::MAX) / 2),
        },
        blkio_stats: empty_blkio(Some(vec![
            BlkioEntry {
                major: 8,
                minor: 0,
                op: "read".to_string(),
                value: figures.block_read,
            },
            BlkioEntry {
                major: 8,
                minor: 0,
                op: "write".to_string(),
                value: figures.block_write,
            },
        ])),
        num_procs: 0,
        storage_stats: BTreeMap::new(),
        cpu_stats: cpu_stats(
            figures.cpu_total,
            Some(figures.system_total),
            Some(ONLINE_CPUS),
        ),
        precpu_stats: cpu_stats(
            figures.precpu_total,
            Some(figures.presystem_total),
            Some(ONLINE_CPUS),
        ),
        memory_stats: MemoryStats {
            usage: Some(figures.memory_usage),
            stats: Some(BTreeMap::from([
                ("active_file".to_string(), figures.memory_inactive_file / 2),
                ("anon".to_string(), figures.memory_usage - figures.memory_inactive_file),
                ("file".to_string(), figures.memory_inactive_file),
                ("inactive_file".to_string(), figures.memory_inactive_file),
            ])),
            limit: Some(figures.memory_limit),
        },
        networks: Some(networks),
    }
}

// ---------------------------------------------------------------------------
// system

pub fn version(api_version: &str) -> EngineVersion {
    EngineVersion {
        platform: PlatformName {
            name: "Docker Engine - Community".to_string(),
        },
        version: ENGINE_VERSION.to_string(),
        api_version: api_version.to_string(),
        min_api_version: "1.12".to_string(),
        git_commit: "stackmock".to_string(),
        go_version: "go1.21.0".to_string(),
        os: "linux".to_string(),
        arch: "amd64".to_string(),
        kernel_version: KERNEL_VERSION.to_string(),
        build_time: rfc3339(crate::hash::SYNTHETIC_EPOCH),
    }
}

pub fn info(world: &WorldView, now: i64, listeners: usize) -> EngineInfo {
    let views = world.list_containers(true, None);
    let count = |state: ContainerState| views.iter().filter(|v| v.state == state).count();
    EngineInfo {
        id: hex_id("engine"),
        containers: views.len(),
        containers_running: count(ContainerState::Running),
        containers_paused: count(ContainerState::Paused),
        containers_stopped: views.len()
            - count(ContainerState::Running)
            - count(ContainerState::Paused),
        images: world.graph.images.len(),
        driver: "overlay2".to_string(),
        system_time: rfc3339(now),
        logging_driver: "json-file".to_string(),
        cgroup_driver: "systemd".to_string(),
        n_events_listener: listeners,
        kernel_version: KERNEL_VERSION.to_string(),
        operating_system: "Stackmock Engine".to_string(),
        os_type: "linux".to_string(),
        architecture: "x86_64".to_string(),
        ncpu: num_cpus::get(),
        mem_total: 8 * 1024 * 1024 * 1024,
        docker_root_dir: "/var/lib/docker".to_string(),
        name: hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "stackmock".to_string()),
        labels: Vec::new(),
        server_version: ENGINE_VERSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{Catalog, OverrideFile};
    use crate::world::WorldModel;

    fn world() -> WorldModel {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog
            .add_stack_from_yaml(
                "test-app",
                r#"
services:
  web:
    image: nginx:latest
    ports: ["8080:80"]
    networks: [frontend]
  db:
    image: postgres:16
    volumes: ["pgdata:/var/lib/postgresql/data"]
    networks: [backend]
volumes:
  pgdata:
"#,
            )
            .unwrap();
        WorldModel::new(catalog)
    }

    #[test]
    fn test_summary_shape() {
        let world = world();
        let web = world.inspect_container("mock-test-app-web-1").unwrap();
        let json = serde_json::to_value(container_summary(&web)).unwrap();
        assert_eq!(json["Names"][0], "/mock-test-app-web-1");
        assert_eq!(json["State"], "running");
        assert_eq!(json["Ports"][0]["PublicPort"], 8080);
        assert_eq!(json["Ports"][0]["IP"], "0.0.0.0");
        assert_eq!(json["Labels"]["com.docker.compose.project"], "test-app");
        assert!(json["NetworkSettings"]["Networks"]["test-app_frontend"]["IPAddress"].is_string());
        assert_eq!(
            json["Command"],
            "/docker-entrypoint.sh nginx -g 'daemon off;'"
        );
    }

    #[test]
    fn test_inspect_volume_mount() {
        let world = world();
        let db = world.inspect_container("mock-test-app-db-1").unwrap();
        let json = serde_json::to_value(container_inspect(&db)).unwrap();
        let mount = &json["Mounts"][0];
        assert_eq!(mount["Type"], "volume");
        assert_eq!(mount["Name"], "test-app_pgdata");
        assert_eq!(mount["Destination"], "/var/lib/postgresql/data");
        assert_eq!(mount["Mode"], "rw");
        assert_eq!(json["State"]["Running"], true);
        assert_eq!(json["Path"], "docker-entrypoint.sh");
        assert_eq!(json["Args"][0], "postgres");
    }

    #[test]
    fn test_network_inspect_populates_containers_only_when_asked() {
        let view = world().view();
        let network = view.inspect_network("test-app_backend").unwrap();
        let listed = serde_json::to_value(network_resource(network, false)).unwrap();
        assert!(listed["Containers"].as_object().unwrap().is_empty());
        let inspected = serde_json::to_value(network_resource(network, true)).unwrap();
        assert_eq!(inspected["Containers"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_history_is_newest_first() {
        let view = world().view();
        let image = view.inspect_image("nginx:latest").unwrap();
        let history = image_history(image);
        assert_eq!(history[0].id, image.id);
        assert_eq!(history[0].tags.as_deref(), Some(&["nginx:latest".to_string()][..]));
        assert!(history[1..].iter().all(|h| h.id == "<missing>"));
        assert_eq!(history.iter().map(|h| h.size).sum::<i64>(), image.size);
    }

    #[test]
    fn test_stopped_container_stats_are_zero() {
        let world = world();
        world
            .state()
            .set_service("test-app", "web", crate::types::StackStatus::Exited);
        let web = world.inspect_container("mock-test-app-web-1").unwrap();
        let stats = stats_response(&web, 0, 1_704_067_200);
        assert_eq!(stats.read, ZERO_TIME);
        assert_eq!(stats.cpu_stats.cpu_usage.total_usage, 0);
        assert!(stats.networks.is_none());
    }
}
