use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The subset of the Compose specification the catalog consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeFile {
    pub version: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
    pub networks: Option<BTreeMap<String, Option<ComposeNetwork>>>,
    pub volumes: Option<BTreeMap<String, Option<ComposeVolumeSpec>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: Option<String>,
    pub build: Option<serde_yaml::Value>,
    pub container_name: Option<String>,
    pub command: Option<StringOrArray>,
    pub entrypoint: Option<StringOrArray>,
    pub environment: Option<Environment>,
    pub ports: Option<Vec<ComposePort>>,
    pub volumes: Option<Vec<ComposeVolume>>,
    pub networks: Option<ServiceNetworks>,
    pub network_mode: Option<String>,
    pub restart: Option<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub labels: Option<Labels>,
    pub healthcheck: Option<ComposeHealthcheck>,
    pub tty: Option<bool>,
    pub mac_address: Option<String>,
    pub depends_on: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    String(String),
    Array(Vec<String>),
}

impl StringOrArray {
    /// Splits the shell-form string on whitespace; exec form is kept as is.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrArray::String(s) => s.split_whitespace().map(str::to_string).collect(),
            StringOrArray::Array(items) => items.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
    Array(Vec<String>),
}

impl Environment {
    /// `KEY=value` pairs in a stable order.
    pub fn to_pairs(&self) -> Vec<String> {
        match self {
            Environment::Array(items) => items.clone(),
            Environment::Map(map) => map
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => format!("{}={}", key, yaml_scalar(value)),
                    None => key.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Labels {
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
    Array(Vec<String>),
}

impl Labels {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            Labels::Map(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.as_ref().map(yaml_scalar).unwrap_or_default()))
                .collect(),
            Labels::Array(items) => items
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item.clone(), String::new()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComposePort {
    Number(u16),
    String(String),
    Long {
        target: u16,
        published: Option<serde_yaml::Value>,
        protocol: Option<String>,
        host_ip: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComposeVolume {
    String(String),
    Long {
        #[serde(rename = "type")]
        volume_type: String,
        source: Option<String>,
        target: String,
        read_only: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceNetworks {
    List(Vec<String>),
    Map(BTreeMap<String, Option<ServiceNetwork>>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetwork {
    pub aliases: Option<Vec<String>>,
    pub ipv4_address: Option<String>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeHealthcheck {
    pub test: Option<StringOrArray>,
    pub interval: Option<String>,
    pub disable: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub driver: Option<String>,
    pub internal: Option<bool>,
    pub external: Option<External>,
    pub name: Option<String>,
    pub ipam: Option<ComposeIpam>,
    pub labels: Option<Labels>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeIpam {
    pub driver: Option<String>,
    pub config: Option<Vec<ComposeIpamConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeIpamConfig {
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum External {
    Bool(bool),
    Named { name: String },
}

impl External {
    pub fn is_external(&self) -> bool {
        match self {
            External::Bool(flag) => *flag,
            External::Named { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeVolumeSpec {
    pub driver: Option<String>,
    pub external: Option<External>,
    pub name: Option<String>,
    pub labels: Option<Labels>,
}

impl ComposeService {
    /// Network keys the service attaches to, in declaration order for lists
    /// and key order for maps.
    pub fn network_keys(&self) -> Vec<(String, ServiceNetwork)> {
        match &self.networks {
            None => Vec::new(),
            Some(ServiceNetworks::List(names)) => names
                .iter()
                .map(|name| (name.clone(), ServiceNetwork::default()))
                .collect(),
            Some(ServiceNetworks::Map(map)) => map
                .iter()
                .map(|(name, cfg)| (name.clone(), cfg.clone().unwrap_or_default()))
                .collect(),
        }
    }
}

/// Parses a compose manifest, falling back to a line-oriented scan that only
/// recovers service names and images when the YAML is not structurally valid.
pub fn parse_manifest(stack: &str, content: &str) -> Result<ComposeFile> {
    match serde_yaml::from_str::<ComposeFile>(content) {
        Ok(file) if !file.services.is_empty() => Ok(file),
        Ok(_) => Err(ComposeError::InvalidManifest {
            stack: stack.to_string(),
            reason: "no services defined".to_string(),
        }
        .into()),
        Err(err) => {
            warn!(stack, error = %err, "Compose manifest did not parse, using line scan");
            let recovered = scan_services(content);
            if recovered.services.is_empty() {
                return Err(ComposeError::InvalidManifest {
                    stack: stack.to_string(),
                    reason: err.to_string(),
                }
                .into());
            }
            debug!(stack, services = recovered.services.len(), "Recovered services from line scan");
            Ok(recovered)
        }
    }
}

/// Minimal recovery: finds the top-level `services:` block, takes the first
/// indentation level beneath it as service names and picks up `image:` keys.
pub fn scan_services(content: &str) -> ComposeFile {
    let mut file = ComposeFile::default();
    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();

        if indent == 0 {
            in_services = trimmed.trim_end_matches(':') == "services" && trimmed.ends_with(':');
            service_indent = None;
            current = None;
            continue;
        }
        if !in_services {
            continue;
        }

        let level = *service_indent.get_or_insert(indent);
        if indent == level {
            if let Some(name) = trimmed.strip_suffix(':') {
                let name = unquote(name);
                if !name.is_empty() && !name.contains(' ') {
                    file.services.insert(name.clone(), ComposeService::default());
                    current = Some(name);
                    continue;
                }
            }
            current = None;
        } else if indent > level {
            if let (Some(name), Some(image)) = (current.as_ref(), trimmed.strip_prefix("image:")) {
                let image = unquote(image.trim());
                if let Some(service) = file.services.get_mut(name) {
                    if !image.is_empty() {
                        service.image = Some(image);
                    }
                }
            }
        }
    }

    file
}

fn unquote(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

pub(crate) fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
