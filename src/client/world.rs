use super::stats::StatsPool;
use super::{EngineClient, EventStream, LogChunk, LogStream, is_relevant_event};
use crate::config::StackmockConfig;
use crate::engine_api::events::{EventHub, spawn_poller};
use crate::engine_api::shapes;
use crate::engine_api::synth;
use crate::engine_api::StreamKind;
use crate::error::{ApiError, Result};
use crate::types::{
    ContainerInfo, ContainerStats, ImageInfo, LogOptions, NetworkInfo, ProcessList, PruneReport,
    VolumeInfo,
};
use crate::world::{ContainerView, WorldModel};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Facade over the in-process synthetic world.
pub struct WorldClient {
    world: Arc<WorldModel>,
    hub: Arc<EventHub>,
    pool: StatsPool,
    follow_interval: Duration,
    poll_interval: Duration,
    poller: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl WorldClient {
    pub fn new(world: Arc<WorldModel>) -> Self {
        Self::with_intervals(world, Duration::from_millis(1000), Duration::from_millis(1000), 256)
    }

    pub fn with_intervals(
        world: Arc<WorldModel>,
        follow_interval: Duration,
        poll_interval: Duration,
        subscriber_buffer: usize,
    ) -> Self {
        let hub = Arc::new(EventHub::new(&world, subscriber_buffer));
        Self {
            world,
            hub,
            pool: StatsPool::new(64),
            follow_interval,
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn load(config: &StackmockConfig) -> Result<Self> {
        let world = WorldModel::load(&config.stacks.dir, &config.stacks.override_file)?;
        Ok(Self::with_intervals(
            Arc::new(world),
            Duration::from_millis(config.logs.follow_interval_ms),
            Duration::from_millis(config.events.poll_interval_ms),
            config.events.subscriber_buffer,
        ))
    }

    pub fn world(&self) -> &Arc<WorldModel> {
        &self.world
    }

    /// The poller runs only while someone may be listening.
    fn ensure_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_none() {
            let (stop, signal) = watch::channel(false);
            let handle = spawn_poller(self.world.clone(), self.hub.clone(), self.poll_interval, signal);
            *poller = Some((stop, handle));
        }
    }
}

fn container_info(view: &ContainerView) -> ContainerInfo {
    ContainerInfo {
        id: view.id.clone(),
        name: view.name.clone(),
        image: view.image.clone(),
        state: view.state,
        health: view.health,
        status: view.status_text(),
        project: view.stack.clone(),
        service: view.service.clone(),
        created: view.created,
        ports: view.ports.iter().map(|p| p.display()).collect(),
        networks: view.networks.keys().cloned().collect(),
        labels: view.labels.clone(),
    }
}

#[async_trait]
impl EngineClient for WorldClient {
    async fn list_containers(&self, all: bool, project: Option<&str>) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .world
            .list_containers(all, project)
            .iter()
            .map(container_info)
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Value> {
        let view = self.world.inspect_container(id)?;
        Ok(serde_json::to_value(shapes::container_inspect(&view))?)
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let view = self.world.view();
        Ok(view
            .list_images()
            .into_iter()
            .map(|image| ImageInfo {
                id: image.id.clone(),
                repo_tags: vec![image.reference.clone()],
                repo_digests: vec![image.repo_digest.clone()],
                size: image.size,
                created: image.created,
                containers: view.image_users(&image.id) as i64,
            })
            .collect())
    }

    async fn inspect_image(&self, name: &str) -> Result<Value> {
        let view = self.world.view();
        let image = view.inspect_image(name)?;
        Ok(serde_json::to_value(shapes::image_inspect(image))?)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        Ok(self
            .world
            .view()
            .list_networks()
            .into_iter()
            .map(|network| NetworkInfo {
                id: network.id.clone(),
                name: network.name.clone(),
                driver: network.driver.clone(),
                scope: network.scope.clone(),
                internal: network.internal,
                subnet: network.subnet.map(|s| s.to_string()),
                gateway: network.gateway.map(|g| g.to_string()),
            })
            .collect())
    }

    async fn inspect_network(&self, id: &str) -> Result<Value> {
        let view = self.world.view();
        let network = view.inspect_network(id)?;
        Ok(serde_json::to_value(shapes::network_resource(network, true))?)
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>> {
        Ok(self
            .world
            .view()
            .list_volumes()
            .into_iter()
            .map(|volume| VolumeInfo {
                name: volume.name.clone(),
                driver: volume.driver.clone(),
                mountpoint: volume.mountpoint.clone(),
                labels: volume.labels.clone(),
            })
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Value> {
        let view = self.world.view();
        let volume = view.inspect_volume(name)?;
        Ok(serde_json::to_value(shapes::volume_resource(volume))?)
    }

    async fn stats(&self, project: &str) -> Result<Vec<ContainerStats>> {
        let now = chrono::Utc::now().timestamp();
        let mut entries = Vec::new();
        for view in self.world.list_containers(false, Some(project)) {
            let document = serde_json::to_value(shapes::stats_response(&view, 1, now))?;
            let mut sample = self.pool.take();
            sample.fill_from(&document);
            entries.push(ContainerStats {
                id: view.id.clone(),
                name: view.name.clone(),
                usage: Some(sample.usage()),
            });
            self.pool.give(sample);
        }
        Ok(entries)
    }

    async fn top(&self, id: &str) -> Result<ProcessList> {
        let view = self.world.inspect_container(id)?;
        if !view.is_up() {
            return Err(ApiError::Conflict {
                reason: format!("Container {} is not running", view.id),
            }
            .into());
        }
        Ok(ProcessList {
            titles: synth::TOP_TITLES.iter().map(|t| t.to_string()).collect(),
            processes: synth::top_rows(&view),
        })
    }

    async fn logs(&self, id: &str, options: LogOptions) -> Result<LogStream> {
        let view = self.world.inspect_container(id)?;
        let (stdout, stderr, timestamps, tty) =
            (options.stdout, options.stderr, options.timestamps, view.tty);
        let wants = move |line: &synth::LogLine| if line.stderr { stderr } else { stdout };
        let chunk = move |line: &synth::LogLine| LogChunk {
            // a TTY has a single output stream
            stream: if line.stderr && !tty {
                StreamKind::Stderr
            } else {
                StreamKind::Stdout
            },
            data: Bytes::from(line.render(timestamps)),
        };

        let backlog = synth::log_backlog(&view);
        let lines: Vec<LogChunk> = (0..backlog)
            .map(|i| synth::log_line(&view, i))
            .filter(|line| wants(line))
            .map(|line| chunk(&line))
            .collect();
        let skip = options.tail.map_or(0, |tail| lines.len().saturating_sub(tail));
        let head = stream::iter(lines.into_iter().skip(skip).map(Ok));
        if !options.follow || !view.is_up() {
            return Ok(head.boxed());
        }

        let world = self.world.clone();
        let interval = self.follow_interval;
        let id = view.id.clone();
        let follow = stream::unfold((world, backlog), move |(world, mut index)| {
            let id = id.clone();
            async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let view = world.inspect_container(&id).ok().filter(|v| v.is_up())?;
                    let line = synth::log_line(&view, index);
                    index += 1;
                    if wants(&line) {
                        return Some((Ok(chunk(&line)), (world, index)));
                    }
                }
            }
        });
        Ok(head.chain(follow).boxed())
    }

    async fn prune_images(&self) -> Result<PruneReport> {
        let view = self.world.view();
        let unused = view.unused_images();
        Ok(PruneReport {
            deleted: unused.iter().map(|image| image.id.clone()).collect(),
            space_reclaimed: unused.iter().map(|image| image.size).sum(),
        })
    }

    async fn events(&self) -> Result<EventStream> {
        self.ensure_poller();
        let subscription = self.hub.broker.subscribe();
        let events = stream::unfold(subscription, |mut subscription| async move {
            loop {
                let event = subscription.receiver.recv().await?;
                if is_relevant_event(&event.event_type, &event.action) {
                    return Some((Ok(event), subscription));
                }
            }
        });
        Ok(events.boxed())
    }

    async fn close(&self) -> Result<()> {
        let poller = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((stop, handle)) = poller {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                debug!("Event poller join failed: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{Catalog, OverrideFile};
    use crate::types::{ContainerState, StackStatus};

    fn client() -> WorldClient {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog
            .add_stack_from_yaml(
                "test-app",
                r#"
services:
  web:
    image: nginx:latest
    networks: [frontend]
  db:
    image: postgres:16
    networks: [backend]
"#,
            )
            .unwrap();
        WorldClient::new(Arc::new(WorldModel::new(catalog)))
    }

    #[tokio::test]
    async fn test_list_and_inspect() {
        let client = client();
        let containers = client.list_containers(false, Some("test-app")).await.unwrap();
        let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"mock-test-app-web-1"));
        assert!(containers.iter().all(|c| c.state == ContainerState::Running));

        let raw = client.inspect_container("mock-test-app-web-1").await.unwrap();
        assert_eq!(raw["Name"], "/mock-test-app-web-1");
    }

    #[tokio::test]
    async fn test_not_found_is_typed() {
        let client = client();
        let err = client.inspect_container("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stats_cover_running_containers_only() {
        let client = client();
        client
            .world()
            .state()
            .set_service("test-app", "db", StackStatus::Exited);
        let stats = client.stats("test-app").await.unwrap();
        assert_eq!(stats.len(), 1);
        let usage = stats[0].usage.as_ref().unwrap();
        assert!(usage.cpu_percent > 0.0);
        assert!(usage.memory_percent > 0.0 && usage.memory_percent < 100.0);
    }

    #[tokio::test]
    async fn test_logs_honour_tail_and_streams() {
        let client = client();
        let options = LogOptions {
            tail: Some(3),
            ..LogOptions::default()
        };
        let chunks: Vec<_> = client
            .logs("mock-test-app-web-1", options)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);

        let stderr_only = LogOptions {
            stdout: false,
            ..LogOptions::default()
        };
        let chunks: Vec<_> = client
            .logs("mock-test-app-db-1", stderr_only)
            .await
            .unwrap()
            .collect()
            .await;
        assert!(chunks
            .iter()
            .all(|c| c.as_ref().unwrap().stream == StreamKind::Stderr));
    }

    #[tokio::test]
    async fn test_top_requires_running() {
        let client = client();
        client.world().state().set("test-app", StackStatus::Exited);
        let err = client.top("mock-test-app-web-1").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::StackmockError::Api(ApiError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_follow_state_changes() {
        let client = client();
        let mut events = client.events().await.unwrap();
        client.world().state().set("test-app", StackStatus::Exited);
        // the poller picks the change up on its next tick
        let first = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.action, "die");
        client.close().await.unwrap();
    }
}
