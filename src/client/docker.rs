//! Facade over a real container engine, through bollard.
//!
//! Engine models are read back through their JSON form, so the mapping below
//! works on the wire field names rather than on bollard's generated structs.

use super::stats::StatsPool;
use super::{EngineClient, EventStream, LogChunk, LogStream, is_relevant_event};
use crate::compose::LABEL_PROJECT;
use crate::config::StackmockConfig;
use crate::engine_api::StreamKind;
use crate::error::{ApiError, ObjectKind, Result, StackmockError, TransportError};
use crate::types::{
    ContainerInfo, ContainerState, ContainerStats, EngineEvent, EventActor, Health, ImageInfo,
    LogOptions, NetworkInfo, ProcessList, PruneReport, VolumeInfo,
};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, LogOutput, LogsOptions, StatsOptions,
    TopOptions,
};
use bollard::image::{ListImagesOptions, PruneImagesOptions};
use bollard::network::{InspectNetworkOptions, ListNetworksOptions};
use bollard::system::EventsOptions;
use bollard::volume::ListVolumesOptions;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerEngineClient {
    docker: Docker,
    pool: StatsPool,
    concurrency: usize,
}

fn transport(e: bollard::errors::Error) -> StackmockError {
    TransportError::Connect {
        reason: e.to_string(),
    }
    .into()
}

/// Maps an engine failure for the named object onto the error taxonomy.
fn engine_error(kind: ObjectKind, name: &str, e: bollard::errors::Error) -> StackmockError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => ApiError::not_found(kind, name).into(),
            400 => ApiError::BadRequest { reason: message }.into(),
            409 => ApiError::Conflict { reason: message }.into(),
            _ => ApiError::Unavailable { reason: message }.into(),
        },
        other => transport(other),
    }
}

impl DockerEngineClient {
    pub async fn connect(config: &StackmockConfig) -> Result<Self> {
        let docker = match &config.engine.docker_host {
            Some(host) => Docker::connect_with_unix(
                host.trim_start_matches("unix://"),
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(transport)?;
        docker.ping().await.map_err(transport)?;
        debug!("Engine answered ping");
        Ok(Self::with_docker(docker, config.stats.concurrency))
    }

    pub fn with_docker(docker: Docker, concurrency: usize) -> Self {
        Self {
            docker,
            pool: StatsPool::new(concurrency),
            concurrency: concurrency.max(1),
        }
    }

    async fn sample(&self, id: &str) -> Result<Value> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stats = self.docker.stats(id, Some(options));
        match stats.next().await {
            Some(Ok(stats)) => Ok(serde_json::to_value(stats)?),
            Some(Err(e)) => Err(engine_error(ObjectKind::Container, id, e)),
            None => Err(ApiError::Unavailable {
                reason: format!("no stats sample for {}", id),
            }
            .into()),
        }
    }
}

fn str_at<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn i64_at(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn strings_at(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn labels_at(value: &Value, key: &str) -> BTreeMap<String, String> {
    value
        .get(key)
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn port_display(port: &Value) -> Option<String> {
    let private = port.get("PrivatePort")?.as_u64()?;
    let protocol = port.get("Type").and_then(Value::as_str).unwrap_or("tcp");
    Some(match port.get("PublicPort").and_then(Value::as_u64) {
        Some(public) => format!(
            "{}:{}->{}/{}",
            port.get("IP").and_then(Value::as_str).unwrap_or("0.0.0.0"),
            public,
            private,
            protocol
        ),
        None => format!("{}/{}", private, protocol),
    })
}

/// A `/containers/json` entry in facade form.
pub fn container_from_value(summary: &Value) -> ContainerInfo {
    let labels = labels_at(summary, "Labels");
    let status = str_at(summary, "Status").to_string();
    let name = strings_at(summary, "Names")
        .first()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    ContainerInfo {
        id: str_at(summary, "Id").to_string(),
        name,
        image: str_at(summary, "Image").to_string(),
        state: str_at(summary, "State").parse().unwrap_or(ContainerState::Dead),
        health: Health::from_status_text(&status),
        status,
        project: labels.get(LABEL_PROJECT).cloned().unwrap_or_default(),
        service: labels
            .get(crate::compose::LABEL_SERVICE)
            .cloned()
            .unwrap_or_default(),
        created: i64_at(summary, "Created"),
        ports: summary
            .get("Ports")
            .and_then(Value::as_array)
            .map(|ports| ports.iter().filter_map(port_display).collect())
            .unwrap_or_default(),
        networks: summary
            .pointer("/NetworkSettings/Networks")
            .and_then(Value::as_object)
            .map(|networks| networks.keys().cloned().collect())
            .unwrap_or_default(),
        labels,
    }
}

pub fn image_from_value(summary: &Value) -> ImageInfo {
    ImageInfo {
        id: str_at(summary, "Id").to_string(),
        repo_tags: strings_at(summary, "RepoTags"),
        repo_digests: strings_at(summary, "RepoDigests"),
        size: i64_at(summary, "Size"),
        created: i64_at(summary, "Created"),
        containers: i64_at(summary, "Containers"),
    }
}

pub fn network_from_value(network: &Value) -> NetworkInfo {
    let ipam = network.pointer("/IPAM/Config/0");
    let ipam_str = |key: &str| {
        ipam.and_then(|c| c.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    NetworkInfo {
        id: str_at(network, "Id").to_string(),
        name: str_at(network, "Name").to_string(),
        driver: str_at(network, "Driver").to_string(),
        scope: str_at(network, "Scope").to_string(),
        internal: network
            .get("Internal")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        subnet: ipam_str("Subnet"),
        gateway: ipam_str("Gateway"),
    }
}

pub fn volume_from_value(volume: &Value) -> VolumeInfo {
    VolumeInfo {
        name: str_at(volume, "Name").to_string(),
        driver: str_at(volume, "Driver").to_string(),
        mountpoint: str_at(volume, "Mountpoint").to_string(),
        labels: labels_at(volume, "Labels"),
    }
}

pub fn prune_from_value(report: &Value) -> PruneReport {
    PruneReport {
        deleted: report
            .get("ImagesDeleted")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("Deleted").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        space_reclaimed: i64_at(report, "SpaceReclaimed"),
    }
}

/// An `/events` message in the common event shape; `None` when it carries
/// no type or action.
pub fn event_from_value(message: &Value) -> Option<EngineEvent> {
    let event_type = message.get("Type").and_then(Value::as_str)?.to_string();
    let action = message.get("Action").and_then(Value::as_str)?.to_string();
    let actor = message.get("Actor").cloned().unwrap_or(Value::Null);
    let time = i64_at(message, "time");
    let time_nano = match i64_at(message, "timeNano") {
        0 => time * 1_000_000_000,
        nano => nano,
    };
    let id = str_at(&actor, "ID").to_string();
    let attributes = labels_at(&actor, "Attributes");
    let container = event_type == "container";
    Some(EngineEvent {
        status: container.then(|| action.clone()),
        id: container.then(|| id.clone()),
        from: attributes.get("image").filter(|_| container).cloned(),
        event_type,
        action,
        actor: EventActor { id, attributes },
        scope: message
            .get("scope")
            .and_then(Value::as_str)
            .unwrap_or("local")
            .to_string(),
        time,
        time_nano,
    })
}

fn log_chunk(output: LogOutput) -> LogChunk {
    match output {
        LogOutput::StdErr { message } => LogChunk {
            stream: StreamKind::Stderr,
            data: message,
        },
        LogOutput::StdIn { message } => LogChunk {
            stream: StreamKind::Stdin,
            data: message,
        },
        LogOutput::StdOut { message } | LogOutput::Console { message } => LogChunk {
            stream: StreamKind::Stdout,
            data: message,
        },
    }
}

#[async_trait]
impl EngineClient for DockerEngineClient {
    async fn list_containers(&self, all: bool, project: Option<&str>) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        if let Some(project) = project {
            filters.insert(
                "label".to_string(),
                vec![format!("{}={}", LABEL_PROJECT, project)],
            );
        }
        let options = ListContainersOptions {
            all,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(transport)?;
        let mut containers = summaries
            .into_iter()
            .map(|summary| serde_json::to_value(summary).map(|v| container_from_value(&v)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    async fn inspect_container(&self, id: &str) -> Result<Value> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| engine_error(ObjectKind::Container, id, e))?;
        Ok(serde_json::to_value(inspect)?)
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let images = self
            .docker
            .list_images(None::<ListImagesOptions<String>>)
            .await
            .map_err(transport)?;
        images
            .into_iter()
            .map(|image| Ok(image_from_value(&serde_json::to_value(image)?)))
            .collect()
    }

    async fn inspect_image(&self, name: &str) -> Result<Value> {
        let image = self
            .docker
            .inspect_image(name)
            .await
            .map_err(|e| engine_error(ObjectKind::Image, name, e))?;
        Ok(serde_json::to_value(image)?)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(transport)?;
        networks
            .into_iter()
            .map(|network| Ok(network_from_value(&serde_json::to_value(network)?)))
            .collect()
    }

    async fn inspect_network(&self, id: &str) -> Result<Value> {
        let network = self
            .docker
            .inspect_network(id, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| engine_error(ObjectKind::Network, id, e))?;
        Ok(serde_json::to_value(network)?)
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>> {
        let response = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(transport)?;
        let response = serde_json::to_value(response)?;
        Ok(response
            .get("Volumes")
            .and_then(Value::as_array)
            .map(|volumes| volumes.iter().map(volume_from_value).collect())
            .unwrap_or_default())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Value> {
        let volume = self
            .docker
            .inspect_volume(name)
            .await
            .map_err(|e| engine_error(ObjectKind::Volume, name, e))?;
        Ok(serde_json::to_value(volume)?)
    }

    async fn stats(&self, project: &str) -> Result<Vec<ContainerStats>> {
        let containers = self.list_containers(false, Some(project)).await?;
        let mut entries: Vec<ContainerStats> = stream::iter(containers)
            .map(|container| async move {
                let usage = match self.sample(&container.id).await {
                    Ok(document) => {
                        let mut sample = self.pool.take();
                        sample.fill_from(&document);
                        let usage = sample.usage();
                        self.pool.give(sample);
                        Some(usage)
                    }
                    Err(e) => {
                        warn!("Stats unavailable for {}: {}", container.name, e);
                        None
                    }
                };
                ContainerStats {
                    id: container.id,
                    name: container.name,
                    usage,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn top(&self, id: &str) -> Result<ProcessList> {
        let top = self
            .docker
            .top_processes(id, None::<TopOptions<String>>)
            .await
            .map_err(|e| engine_error(ObjectKind::Container, id, e))?;
        Ok(ProcessList {
            titles: top.titles.unwrap_or_default(),
            processes: top.processes.unwrap_or_default(),
        })
    }

    async fn logs(&self, id: &str, options: LogOptions) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: options.follow,
            stdout: options.stdout,
            stderr: options.stderr,
            timestamps: options.timestamps,
            tail: options
                .tail
                .map_or_else(|| "all".to_string(), |tail| tail.to_string()),
            ..Default::default()
        };
        let name = id.to_string();
        let chunks = self
            .docker
            .logs(id, Some(options))
            .map(move |item| {
                item.map(log_chunk)
                    .map_err(|e| engine_error(ObjectKind::Container, &name, e))
            });
        Ok(chunks.boxed())
    }

    async fn prune_images(&self) -> Result<PruneReport> {
        let report = self
            .docker
            .prune_images(None::<PruneImagesOptions<String>>)
            .await
            .map_err(transport)?;
        Ok(prune_from_value(&serde_json::to_value(report)?))
    }

    async fn events(&self) -> Result<EventStream> {
        let events = self
            .docker
            .events(None::<EventsOptions<String>>)
            .filter_map(|item| {
                future::ready(match item {
                    Ok(message) => serde_json::to_value(message)
                        .ok()
                        .as_ref()
                        .and_then(event_from_value)
                        .filter(|e| is_relevant_event(&e.event_type, &e.action))
                        .map(Ok),
                    Err(e) => Some(Err(transport(e))),
                })
            });
        Ok(events.boxed())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_container_summary_mapping() {
        let summary = json!({
            "Id": "4f66ad9a0b2e",
            "Names": ["/shop-web-1"],
            "Image": "nginx:latest",
            "State": "running",
            "Status": "Up 5 minutes (unhealthy)",
            "Created": 1_700_000_000,
            "Labels": {
                "com.docker.compose.project": "shop",
                "com.docker.compose.service": "web"
            },
            "Ports": [
                {"IP": "0.0.0.0", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"},
                {"PrivatePort": 443, "Type": "tcp"}
            ],
            "NetworkSettings": {"Networks": {"shop_default": {}}}
        });
        let info = container_from_value(&summary);
        assert_eq!(info.name, "shop-web-1");
        assert_eq!(info.state, ContainerState::Running);
        assert_eq!(info.health, Health::Unhealthy);
        assert_eq!((info.project.as_str(), info.service.as_str()), ("shop", "web"));
        assert_eq!(info.ports, vec!["0.0.0.0:8080->80/tcp", "443/tcp"]);
        assert_eq!(info.networks, vec!["shop_default"]);
    }

    #[test]
    fn test_network_and_prune_mapping() {
        let network = network_from_value(&json!({
            "Id": "abc",
            "Name": "shop_default",
            "Driver": "bridge",
            "Scope": "local",
            "IPAM": {"Config": [{"Subnet": "172.20.0.0/16", "Gateway": "172.20.0.1"}]}
        }));
        assert_eq!(network.subnet.as_deref(), Some("172.20.0.0/16"));
        assert_eq!(network.gateway.as_deref(), Some("172.20.0.1"));
        assert!(!network.internal);

        let report = prune_from_value(&json!({
            "ImagesDeleted": [{"Untagged": "redis:6"}, {"Deleted": "sha256:aa"}],
            "SpaceReclaimed": 1024
        }));
        assert_eq!(report.deleted, vec!["sha256:aa"]);
        assert_eq!(report.space_reclaimed, 1024);
    }

    #[test]
    fn test_event_mapping() {
        let event = event_from_value(&json!({
            "Type": "container",
            "Action": "die",
            "Actor": {"ID": "4f66", "Attributes": {"image": "nginx", "exitCode": "137"}},
            "scope": "local",
            "time": 1_700_000_000,
            "timeNano": 1_700_000_000_123_456_789i64
        }))
        .unwrap();
        assert_eq!(event.action, "die");
        assert_eq!(event.id.as_deref(), Some("4f66"));
        assert_eq!(event.from.as_deref(), Some("nginx"));
        assert_eq!(event.actor.attributes["exitCode"], "137");

        let network = event_from_value(&json!({
            "Type": "network", "Action": "connect", "Actor": {"ID": "n1"}, "time": 5
        }))
        .unwrap();
        assert_eq!(network.status, None);
        assert_eq!(network.time_nano, 5_000_000_000);
        assert!(event_from_value(&json!({"Action": "start"})).is_none());
    }

    #[test]
    fn test_not_found_mapping() {
        let err = engine_error(
            ObjectKind::Container,
            "ghost",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such container: ghost".to_string(),
            },
        );
        assert!(err.is_not_found());
    }
}
