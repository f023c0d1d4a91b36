//! Event fan-out and synthesis.
//!
//! `EventBroker` pushes events to every subscribed `/events` connection.
//! `EventTracker` turns changes in effective container state into the
//! lifecycle events the engine would have emitted. Control endpoints run the
//! tracker right after each mutation; the poller catches mutations made
//! behind the server's back.

use crate::types::{ContainerState, EngineEvent, Health, StackStatus};
use crate::world::{LiveGraph, WorldModel, WorldView};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct EventBroker {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<EngineEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// A live subscription; dropping it unregisters the receiver.
pub struct Subscription {
    id: u64,
    broker: Arc<EventBroker>,
    pub receiver: mpsc::Receiver<EngineEvent>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

impl EventBroker {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<EngineEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.subscribers().insert(id, sender);
        debug!("Event subscriber {} registered", id);
        Subscription {
            id,
            broker: self.clone(),
            receiver,
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.subscribers().remove(&id).is_some() {
            debug!("Event subscriber {} released", id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Delivers to every subscriber without waiting. A full subscriber
    /// loses the event; a closed one is dropped from the registry.
    pub fn publish(&self, event: &EngineEvent) {
        let mut subscribers = self.subscribers();
        subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Dropping {} event for slow subscriber {}", event.action, id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    state: ContainerState,
    health: Health,
    /// False once the owning stack is inactive: the container is gone.
    present: bool,
}

/// Remembers the last announced state of every container.
#[derive(Debug, Default)]
pub struct EventTracker {
    seen: BTreeMap<String, Observed>,
    last_graph: Option<Arc<LiveGraph>>,
    last_state: Option<crate::state::StateSnapshot>,
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl EventTracker {
    /// Starts from the given view without emitting anything for it.
    pub fn primed(world: &WorldView) -> Self {
        let mut tracker = Self::default();
        tracker.diff(world, 0);
        tracker
    }

    /// Events for every change since the previous call, in container order.
    pub fn diff(&mut self, world: &WorldView, time_nano: i64) -> Vec<EngineEvent> {
        let unchanged = self
            .last_graph
            .as_ref()
            .is_some_and(|g| Arc::ptr_eq(g, &world.graph))
            && self.last_state.as_ref() == Some(&world.state);
        if unchanged {
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut current = BTreeMap::new();
        for container in world.graph.containers.values() {
            let view = world.view(container);
            let present = container.is_standalone()
                || world.state.stack(&container.stack) != StackStatus::Inactive;
            let now = Observed {
                state: view.state,
                health: view.health,
                present,
            };
            current.insert(container.id.clone(), now);

            let mut attributes = container.labels.clone();
            attributes.insert("image".to_string(), container.image.clone());
            attributes.insert("name".to_string(), container.name.clone());
            let mut emit = |action: &str, attributes: &BTreeMap<String, String>| {
                events.push(EngineEvent::container(
                    action,
                    container.id.clone(),
                    container.image.clone(),
                    attributes.clone(),
                    time_nano,
                ));
            };

            let before = self.seen.get(&container.id).copied().unwrap_or(Observed {
                state: ContainerState::Created,
                health: Health::None,
                present: false,
            });
            if before == now {
                continue;
            }
            if !before.present && now.present {
                emit("create", &attributes);
            }
            let was_up = before.present && before.state.is_up();
            let is_up = now.present && now.state.is_up();
            match (was_up, is_up) {
                (false, true) => {
                    emit("start", &attributes);
                    if now.state == ContainerState::Paused {
                        emit("pause", &attributes);
                    }
                }
                (true, false) => {
                    let mut died = attributes.clone();
                    died.insert("exitCode".to_string(), view.exit_code.to_string());
                    emit("die", &died);
                }
                (true, true) => match (before.state, now.state) {
                    (ContainerState::Paused, ContainerState::Running) => {
                        emit("unpause", &attributes)
                    }
                    (ContainerState::Running, ContainerState::Paused) => {
                        emit("pause", &attributes)
                    }
                    _ => {}
                },
                (false, false) => {}
            }
            if now.health != Health::None && now.health != before.health && is_up {
                emit(&format!("health_status: {}", now.health), &attributes);
            }
            if before.present && !now.present {
                emit("destroy", &attributes);
            }
        }

        // containers whose stack left the catalog entirely
        for (id, before) in &self.seen {
            if before.present && !current.contains_key(id) {
                events.push(EngineEvent::container(
                    "destroy",
                    id.clone(),
                    String::new(),
                    BTreeMap::new(),
                    time_nano,
                ));
            }
        }

        self.seen = current;
        self.last_graph = Some(world.graph.clone());
        self.last_state = Some(world.state.clone());
        events
    }
}

/// Broker plus tracker: the per-server event machinery.
pub struct EventHub {
    pub broker: Arc<EventBroker>,
    tracker: Mutex<EventTracker>,
}

impl EventHub {
    pub fn new(world: &WorldModel, buffer: usize) -> Self {
        Self {
            broker: Arc::new(EventBroker::new(buffer)),
            tracker: Mutex::new(EventTracker::primed(&world.view())),
        }
    }

    /// Diffs the world against what was last announced and publishes the
    /// difference. Returns the number of events published.
    pub fn sync(&self, world: &WorldModel) -> usize {
        // the view is taken under the lock so successive diffs never go
        // backwards in time
        let events = {
            let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
            let view = world.view();
            tracker.diff(&view, now_nanos())
        };
        for event in &events {
            debug!(
                "Event {} {} ({})",
                event.action,
                event.actor.id.get(..12).unwrap_or(&event.actor.id),
                event.project().unwrap_or("-")
            );
            self.broker.publish(event);
        }
        events.len()
    }
}

/// Periodically runs `EventHub::sync` until `shutdown` flips to true.
pub fn spawn_poller(
    world: Arc<WorldModel>,
    hub: Arc<EventHub>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📡 Event poller running every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let published = hub.sync(&world);
                    if published > 0 {
                        debug!("Poller published {} out-of-band events", published);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Event poller stopped");
    })
}

/// Whether `event` passes an `/events` filter set.
pub fn event_matches(event: &EngineEvent, filters: &super::filters::Filters) -> bool {
    filters.any_of("type", |t| t == event.event_type)
        && filters.any_of("event", |e| {
            e == event.action || event.action.split(':').next() == Some(e)
        })
        && filters.any_of("container", |c| {
            event.actor.id.starts_with(c) || event.actor.attributes.get("name").is_some_and(|n| n == c)
        })
        && filters.matches_labels(&event.actor.attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{Catalog, LABEL_PROJECT, OverrideFile};
    use crate::engine_api::filters::Filters;

    fn world() -> WorldModel {
        let mut catalog = Catalog::new(OverrideFile::default());
        catalog
            .add_stack_from_yaml(
                "shop",
                "services:\n  web:\n    image: nginx:latest\n  cache:\n    image: redis:7\n",
            )
            .unwrap();
        WorldModel::new(catalog)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broker = Arc::new(EventBroker::new(8));
        let mut first = broker.subscribe();
        let mut second = broker.subscribe();
        let event = EngineEvent::container("start", "abc", "nginx", BTreeMap::new(), 1);
        broker.publish(&event);
        assert_eq!(first.receiver.recv().await.unwrap(), event);
        assert_eq!(second.receiver.recv().await.unwrap(), event);
        assert_eq!(broker.listener_count(), 2);
        drop(first);
        assert_eq!(broker.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_instead_of_blocking() {
        let broker = Arc::new(EventBroker::new(2));
        let mut slow = broker.subscribe();
        for i in 0..10 {
            broker.publish(&EngineEvent::container("start", format!("c{}", i), "img", BTreeMap::new(), i));
        }
        assert_eq!(slow.receiver.recv().await.unwrap().actor.id, "c0");
        assert_eq!(slow.receiver.recv().await.unwrap().actor.id, "c1");
        assert!(slow.receiver.try_recv().is_err());
    }

    #[test]
    fn test_stop_and_start_events() {
        let world = world();
        let mut tracker = EventTracker::primed(&world.view());
        assert!(tracker.diff(&world.view(), 1).is_empty());

        world.state().set("shop", StackStatus::Exited);
        let actions: Vec<String> = tracker
            .diff(&world.view(), 2)
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["die", "die"]);

        world.state().set("shop", StackStatus::Running);
        let actions: Vec<String> = tracker
            .diff(&world.view(), 3)
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["start", "start"]);
    }

    #[test]
    fn test_inactive_destroys_and_reactivation_creates() {
        let world = world();
        let mut tracker = EventTracker::primed(&world.view());
        world.state().set("shop", StackStatus::Inactive);
        let actions: Vec<String> = tracker
            .diff(&world.view(), 1)
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["die", "destroy", "die", "destroy"]);

        world.state().set("shop", StackStatus::Running);
        let actions: Vec<String> = tracker
            .diff(&world.view(), 2)
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["create", "start", "create", "start"]);
    }

    #[test]
    fn test_service_override_emits_single_die_with_exit_code() {
        let world = world();
        let mut tracker = EventTracker::primed(&world.view());
        world.state().set_service("shop", "web", StackStatus::Exited);
        let events = tracker.diff(&world.view(), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "die");
        assert_eq!(events[0].actor.attributes["name"], "mock-shop-web-1");
        assert!(events[0].actor.attributes.contains_key("exitCode"));
        assert_eq!(events[0].project(), Some("shop"));
    }

    #[test]
    fn test_hub_sync_does_not_repeat() {
        let world = world();
        let hub = EventHub::new(&world, 16);
        let mut subscription = hub.broker.subscribe();
        world.state().set("shop", StackStatus::Paused);
        assert_eq!(hub.sync(&world), 2);
        assert_eq!(hub.sync(&world), 0);
        assert_eq!(subscription.receiver.try_recv().unwrap().action, "pause");
    }

    #[test]
    fn test_concurrent_syncs_never_reverse_transitions() {
        let world = Arc::new(world());
        let hub = Arc::new(EventHub::new(&world, 100_000));
        let mut subscription = hub.broker.subscribe();

        let togglers: Vec<_> = (0..4)
            .map(|worker| {
                let world = world.clone();
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let status = if (round + worker) % 2 == 0 {
                            StackStatus::Exited
                        } else {
                            StackStatus::Running
                        };
                        world.state().set("shop", status);
                        hub.sync(&world);
                    }
                })
            })
            .collect();
        let poller = {
            let world = world.clone();
            let hub = hub.clone();
            std::thread::spawn(move || {
                for _ in 0..800 {
                    hub.sync(&world);
                }
            })
        };
        for handle in togglers {
            handle.join().unwrap();
        }
        poller.join().unwrap();
        hub.sync(&world);

        let mut per_container: HashMap<String, Vec<String>> = HashMap::new();
        while let Ok(event) = subscription.receiver.try_recv() {
            per_container.entry(event.actor.id).or_default().push(event.action);
        }
        let final_up = world.state().get("shop") == StackStatus::Running;
        for (id, actions) in per_container {
            // starting from running, lifecycle events must alternate die/start
            for (i, action) in actions.iter().enumerate() {
                let expected = if i % 2 == 0 { "die" } else { "start" };
                assert_eq!(action, expected, "container {} saw {:?}", id, actions);
            }
            assert_eq!(actions.len() % 2 == 0, final_up);
        }
    }

    #[test]
    fn test_event_filters() {
        let event = EngineEvent::container(
            "health_status: unhealthy",
            "abcdef",
            "nginx",
            BTreeMap::from([
                ("name".to_string(), "web".to_string()),
                (LABEL_PROJECT.to_string(), "shop".to_string()),
            ]),
            1,
        );
        let by_event = Filters::parse(Some(r#"{"event":["health_status"]}"#)).unwrap();
        assert!(event_matches(&event, &by_event));
        let by_label =
            Filters::parse(Some(r#"{"label":{"com.docker.compose.project=other":true}}"#)).unwrap();
        assert!(!event_matches(&event, &by_label));
        let by_container = Filters::parse(Some(r#"{"container":["web"],"type":["container"]}"#)).unwrap();
        assert!(event_matches(&event, &by_container));
    }
}
