//! Compose short-syntax parsing for ports and mounts.

use serde::Serialize;

/// A published (or merely exposed) container port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PortSpec {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: String,
}

impl PortSpec {
    /// The engine's `80/tcp` key form.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }

    /// Human form as shown in `docker ps`, e.g. `0.0.0.0:8080->80/tcp`.
    pub fn display(&self) -> String {
        match self.host_port {
            Some(host) => format!(
                "{}:{}->{}",
                self.host_ip.as_deref().unwrap_or("0.0.0.0"),
                host,
                self.key()
            ),
            None => self.key(),
        }
    }
}

/// Parses `[ip:][host:]container[/proto]`, expanding equal-length ranges.
///
/// Returns an empty list for strings that do not describe a port.
pub fn parse_port(spec: &str) -> Vec<PortSpec> {
    let spec = spec.trim().trim_matches('"');
    let (body, protocol) = match spec.rsplit_once('/') {
        Some((body, proto)) => (body, proto.to_ascii_lowercase()),
        None => (spec, "tcp".to_string()),
    };

    // IPv6 host addresses come bracketed: [::1]:8080:80
    let (host_ip, rest) = if let Some(stripped) = body.strip_prefix('[') {
        match stripped.split_once("]:") {
            Some((ip, rest)) => (Some(ip.to_string()), rest.to_string()),
            None => return Vec::new(),
        }
    } else {
        let parts: Vec<&str> = body.split(':').collect();
        match parts.len() {
            3 => (Some(parts[0].to_string()), format!("{}:{}", parts[1], parts[2])),
            1 | 2 => (None, body.to_string()),
            _ => return Vec::new(),
        }
    };

    let (host, container) = match rest.split_once(':') {
        Some((host, container)) => (Some(host), container),
        None => (None, rest.as_str()),
    };

    let Some(container_range) = parse_range(container) else {
        return Vec::new();
    };
    let host_range = match host {
        Some("") | None => None,
        Some(h) => match parse_range(h) {
            Some(range) => Some(range),
            None => return Vec::new(),
        },
    };

    let host_ip = host_ip.filter(|ip| !ip.is_empty());
    let count = container_range.1 - container_range.0 + 1;
    let mut ports = Vec::with_capacity(count as usize);
    for offset in 0..count {
        let host_port = match host_range {
            Some((start, end)) if end - start + 1 == count => Some(start + offset),
            // a single host port mapped onto a range publishes only the first
            Some((start, _)) if offset == 0 => Some(start),
            Some(_) => None,
            None => None,
        };
        ports.push(PortSpec {
            host_ip: host_ip.clone(),
            host_port,
            container_port: container_range.0 + offset,
            protocol: protocol.clone(),
        });
    }
    ports
}

fn parse_range(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((start, end)) => {
            let start: u16 = start.trim().parse().ok()?;
            let end: u16 = end.trim().parse().ok()?;
            (start <= end).then_some((start, end))
        }
        None => {
            let port: u16 = value.trim().parse().ok()?;
            Some((port, port))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

impl MountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
            MountKind::Tmpfs => "tmpfs",
        }
    }
}

/// A mount as written in the manifest, before namespacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    pub kind: MountKind,
    /// Host path for binds, unqualified volume name for volumes; empty for
    /// anonymous volumes.
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// True when a mount source denotes a host path rather than a named volume.
pub fn is_bind_source(source: &str) -> bool {
    source.starts_with('/') || source.starts_with("./")
}

/// Parses `source:target[:mode]` or a bare `target` (anonymous volume).
pub fn parse_mount(spec: &str) -> Option<MountSpec> {
    let spec = spec.trim().trim_matches('"');
    if spec.is_empty() {
        return None;
    }
    let parts: Vec<&str> = spec.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [target] => ("", *target, ""),
        [source, target] => (*source, *target, ""),
        [source, target, mode] => (*source, *target, *mode),
        _ => return None,
    };
    if target.is_empty() {
        return None;
    }

    let read_only = mode.split(',').any(|opt| opt == "ro");
    let kind = if is_bind_source(source) {
        MountKind::Bind
    } else {
        MountKind::Volume
    };

    Some(MountSpec {
        kind,
        source: source.to_string(),
        target: target.to_string(),
        read_only,
    })
}
