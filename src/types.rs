use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Desired status of a stack (or a single service) in the runtime state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackStatus {
    Running,
    Exited,
    Inactive,
    Paused,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::Running => "running",
            StackStatus::Exited => "exited",
            StackStatus::Inactive => "inactive",
            StackStatus::Paused => "paused",
        }
    }

    /// Container state a service takes when forced to this status.
    pub fn container_state(&self) -> ContainerState {
        match self {
            StackStatus::Running => ContainerState::Running,
            StackStatus::Paused => ContainerState::Paused,
            StackStatus::Exited | StackStatus::Inactive => ContainerState::Exited,
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(StackStatus::Running),
            "exited" | "stopped" => Ok(StackStatus::Exited),
            "inactive" => Ok(StackStatus::Inactive),
            "paused" => Ok(StackStatus::Paused),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Container life-cycle state, as the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    #[default]
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        }
    }

    /// Whether the container shows up in a listing without `all`.
    pub fn is_up(&self) -> bool {
        matches!(
            self,
            ContainerState::Running | ContainerState::Paused | ContainerState::Restarting
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(ContainerState::Created),
            "running" => Ok(ContainerState::Running),
            "paused" => Ok(ContainerState::Paused),
            "restarting" => Ok(ContainerState::Restarting),
            "exited" | "stopped" => Ok(ContainerState::Exited),
            "dead" => Ok(ContainerState::Dead),
            other => Err(format!("unknown container state: {}", other)),
        }
    }
}

/// Health check status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::None => "",
            Health::Starting => "starting",
            Health::Healthy => "healthy",
            Health::Unhealthy => "unhealthy",
        }
    }

    /// Reads the health marker the engine appends to a human-readable status,
    /// e.g. `Up 5 minutes (unhealthy)` or `Up 2 seconds (health: starting)`.
    pub fn from_status_text(status: &str) -> Health {
        let status = status.trim_end();
        if status.ends_with("(unhealthy)") {
            Health::Unhealthy
        } else if status.ends_with("(healthy)") {
            Health::Healthy
        } else if status.ends_with("(health: starting)") {
            Health::Starting
        } else {
            Health::None
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Health::None),
            "starting" => Ok(Health::Starting),
            "healthy" => Ok(Health::Healthy),
            "unhealthy" => Ok(Health::Unhealthy),
            other => Err(format!("unknown health status: {}", other)),
        }
    }
}

/// Container information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub health: Health,
    pub status: String,
    pub project: String,
    pub service: String,
    pub created: i64,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Image information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub size: i64,
    pub created: i64,
    pub containers: i64,
}

/// Network information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub internal: bool,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

/// Volume information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: BTreeMap<String, String>,
}

/// Resource usage figures for one container.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub pids: u64,
}

/// Stats entry for one container; `usage` is `None` when collection failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerStats {
    pub id: String,
    pub name: String,
    pub usage: Option<ResourceUsage>,
}

/// Output of `top` for a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessList {
    #[serde(rename = "Titles")]
    pub titles: Vec<String>,
    #[serde(rename = "Processes")]
    pub processes: Vec<Vec<String>>,
}

/// Result of an image prune.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: i64,
}

/// Options for fetching container logs through the facade.
#[derive(Debug, Clone, PartialEq)]
pub struct LogOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    pub tail: Option<usize>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
        }
    }
}

/// A lifecycle event in the engine's `/events` wire shape.
///
/// Both the synthetic server and the real-engine adapter normalize into this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "status", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
    #[serde(rename = "id", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(rename = "from", skip_serializing_if = "Option::is_none", default)]
    pub from: Option<String>,
    #[serde(rename = "Type")]
    pub event_type: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Actor")]
    pub actor: EventActor,
    #[serde(rename = "scope")]
    pub scope: String,
    #[serde(rename = "time")]
    pub time: i64,
    #[serde(rename = "timeNano")]
    pub time_nano: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventActor {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Attributes")]
    pub attributes: BTreeMap<String, String>,
}

impl EngineEvent {
    /// Builds a container event the way the engine emits it, with the legacy
    /// `status`/`id`/`from` fields populated.
    pub fn container(
        action: impl Into<String>,
        id: impl Into<String>,
        image: impl Into<String>,
        attributes: BTreeMap<String, String>,
        time_nano: i64,
    ) -> Self {
        let action = action.into();
        let id = id.into();
        Self {
            status: Some(action.clone()),
            id: Some(id.clone()),
            from: Some(image.into()),
            event_type: "container".to_string(),
            action,
            actor: EventActor { id, attributes },
            scope: "local".to_string(),
            time: time_nano / 1_000_000_000,
            time_nano,
        }
    }

    /// Compose project of the event's actor, if labelled.
    pub fn project(&self) -> Option<&str> {
        self.actor
            .attributes
            .get(crate::compose::LABEL_PROJECT)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_from_status_text() {
        assert_eq!(
            Health::from_status_text("Up 5 minutes (unhealthy)"),
            Health::Unhealthy
        );
        assert_eq!(Health::from_status_text("Up 1 hour (healthy)"), Health::Healthy);
        assert_eq!(
            Health::from_status_text("Up 2 seconds (health: starting)"),
            Health::Starting
        );
        assert_eq!(Health::from_status_text("Exited (0) 3 hours ago"), Health::None);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Running".parse::<StackStatus>(), Ok(StackStatus::Running));
        assert_eq!("stopped".parse::<StackStatus>(), Ok(StackStatus::Exited));
        assert!("sideways".parse::<StackStatus>().is_err());
        assert_eq!(
            StackStatus::Inactive.container_state(),
            ContainerState::Exited
        );
    }

    #[test]
    fn test_container_event_shape() {
        let event = EngineEvent::container("start", "abc", "nginx:latest", BTreeMap::new(), 1_700_000_000_123_456_789);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "start");
        assert_eq!(json["Type"], "container");
        assert_eq!(json["Actor"]["ID"], "abc");
        assert_eq!(json["time"], 1_700_000_000i64);
    }
}
