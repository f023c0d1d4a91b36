//! The optional override manifest that sits beside the stack directories.
//!
//! ```yaml
//! stacks:
//!   test-app:
//!     status: running
//!     services:
//!       web:
//!         health: unhealthy
//!         running_image: nginx:1.25
//!         update_available: true
//!         networks:
//!           frontend: { ipv4_address: 172.28.0.5, mac_address: "02:42:ac:1c:00:05" }
//! standalone:
//!   - name: portainer
//!     image: portainer/portainer-ce:latest
//!     ports: ["9000:9000"]
//! external:
//!   legacy:
//!     services:
//!       api: { image: "legacy/api:2.1", state: running }
//! images:
//!   nginx:latest: { size: 187000000 }
//! ```

use crate::compose::manifest::StringOrArray;
use crate::error::{ComposeError, Result};
use crate::types::{ContainerState, Health, StackStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideFile {
    pub stacks: BTreeMap<String, StackOverride>,
    pub standalone: Vec<StandaloneOverride>,
    pub external: BTreeMap<String, ExternalStackOverride>,
    pub images: BTreeMap<String, ImageOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackOverride {
    pub status: Option<StackStatus>,
    pub services: BTreeMap<String, ServiceOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverride {
    pub state: Option<ContainerState>,
    pub health: Option<Health>,
    pub running_image: Option<String>,
    pub update_available: Option<bool>,
    pub command: Option<StringOrArray>,
    pub args: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub restart: Option<String>,
    pub exit_code: Option<i64>,
    pub networks: BTreeMap<String, EndpointOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOverride {
    pub ipv4_address: Option<String>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StandaloneOverride {
    pub name: String,
    pub image: String,
    pub state: Option<ContainerState>,
    pub health: Option<Health>,
    pub command: Option<StringOrArray>,
    pub env: Vec<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
    pub restart: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalStackOverride {
    pub status: Option<StackStatus>,
    pub services: BTreeMap<String, ExternalServiceOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalServiceOverride {
    pub image: String,
    pub state: Option<ContainerState>,
    pub health: Option<Health>,
    pub ports: Vec<String>,
    pub command: Option<StringOrArray>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOverride {
    pub size: Option<i64>,
    pub created: Option<i64>,
}

impl OverrideFile {
    /// Loads the override file; a missing file is an empty override.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            ComposeError::InvalidOverride {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn service(&self, stack: &str, service: &str) -> Option<&ServiceOverride> {
        self.stacks.get(stack).and_then(|s| s.services.get(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_file_parses() {
        let yaml = r#"
stacks:
  test-app:
    status: running
    services:
      web:
        health: unhealthy
        running_image: nginx:1.25
        networks:
          frontend:
            ipv4_address: 172.28.0.5
      db:
        state: exited
        exit_code: 137
standalone:
  - name: portainer
    image: portainer/portainer-ce:latest
    ports: ["9000:9000"]
"#;
        let file = OverrideFile::from_yaml(yaml).unwrap();
        let web = file.service("test-app", "web").unwrap();
        assert_eq!(web.health, Some(Health::Unhealthy));
        assert_eq!(web.running_image.as_deref(), Some("nginx:1.25"));
        assert_eq!(
            web.networks["frontend"].ipv4_address.as_deref(),
            Some("172.28.0.5")
        );
        let db = file.service("test-app", "db").unwrap();
        assert_eq!(db.state, Some(ContainerState::Exited));
        assert_eq!(db.exit_code, Some(137));
        assert_eq!(file.standalone[0].name, "portainer");
        assert!(file.external.is_empty());
    }

    #[test]
    fn test_missing_override_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = OverrideFile::load(&dir.path().join("mock.yaml")).unwrap();
        assert!(file.stacks.is_empty());
    }
}
