use thiserror::Error;

/// Stackmock error types
#[derive(Error, Debug)]
pub enum StackmockError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Engine API error: {0}")]
    Api(#[from] ApiError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StackmockError {
    /// True when the error names an unknown container, image, network or volume.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StackmockError::Api(ApiError::NotFound { .. }))
    }

    /// True when the engine could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, StackmockError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found at path: {path}")]
    NotFound { path: String },

    #[error("Invalid config file {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Invalid manifest for stack {stack}: {reason}")]
    InvalidManifest { stack: String, reason: String },

    #[error("Invalid override file {path}: {reason}")]
    InvalidOverride { path: String, reason: String },
}

/// Errors surfaced through the engine protocol and the client facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("No such {kind}: {name}")]
    NotFound { kind: ObjectKind, name: String },

    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Upstream unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl ApiError {
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        ApiError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        ApiError::BadRequest {
            reason: reason.into(),
        }
    }

    /// Message text in the wording the real engine uses for the envelope body.
    pub fn engine_message(&self) -> String {
        match self {
            ApiError::NotFound { kind, name } => match kind {
                ObjectKind::Container => format!("No such container: {}", name),
                ObjectKind::Image => format!("No such image: {}", name),
                ObjectKind::Network => format!("network {} not found", name),
                ObjectKind::Volume => format!("get {}: no such volume", name),
            },
            ApiError::BadRequest { reason } => reason.clone(),
            ApiError::Conflict { reason } => reason.clone(),
            ApiError::Unavailable { reason } => reason.clone(),
            // internal detail stays in the logs
            ApiError::Internal { .. } => "internal server error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Container,
    Image,
    Network,
    Volume,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjectKind::Container => "container",
            ObjectKind::Image => "image",
            ObjectKind::Network => "network",
            ObjectKind::Volume => "volume",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind engine socket {path}: {reason}")]
    Bind { path: String, reason: String },

    #[error("Cannot reach container engine: {reason}")]
    Connect { reason: String },
}

/// Convenience type alias for Stackmock results
pub type Result<T, E = StackmockError> = std::result::Result<T, E>;
