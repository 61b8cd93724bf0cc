//! Runtime configuration with validation.
//!
//! Everything here is an opaque startup parameter for the core: transport and
//! serializer choice, listen/connect addresses, pool sizes and queue bounds.
//! Unknown transport, serializer or registry names are rejected while the
//! configuration is loaded, never at first request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown transport kind: {0:?}")]
    UnknownTransport(String),

    #[error("unknown serializer kind: {0:?}")]
    UnknownSerializer(String),

    #[error("unknown registry kind: {0:?}")]
    UnknownRegistry(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("transport {transport} cannot carry {serializer} payloads")]
    IncompatibleSerializer {
        transport: TransportKind,
        serializer: SerializerKind,
    },

    #[error("admin port {0} collides with the RPC port")]
    DuplicatePorts(u16),
}

impl From<ConfigError> for crate::domain::error::RpcError {
    fn from(e: ConfigError) -> Self {
        crate::domain::error::RpcError::Config(e.to_string())
    }
}

/// Wire protocol carrying requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Length-framed binary records over TCP
    #[serde(alias = "tcp")]
    Binary,
    /// Text bodies posted to a fixed endpoint over HTTP/1.1
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Binary => f.write_str("binary"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" | "tcp" => Ok(TransportKind::Binary),
            "http" => Ok(TransportKind::Http),
            _ => Err(ConfigError::UnknownTransport(s.to_string())),
        }
    }
}

/// Payload encoding plugged into a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    Json,
    Bincode,
}

impl SerializerKind {
    /// Whether the encoding is printable text.
    pub fn is_text(&self) -> bool {
        matches!(self, SerializerKind::Json)
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializerKind::Json => f.write_str("json"),
            SerializerKind::Bincode => f.write_str("bincode"),
        }
    }
}

impl FromStr for SerializerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(SerializerKind::Json),
            "bincode" => Ok(SerializerKind::Bincode),
            _ => Err(ConfigError::UnknownSerializer(s.to_string())),
        }
    }
}

/// Which service registrar the server publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    None,
    Memory,
}

impl FromStr for RegistryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RegistryKind::None),
            "memory" => Ok(RegistryKind::Memory),
            _ => Err(ConfigError::UnknownRegistry(s.to_string())),
        }
    }
}

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub transport: TransportConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub workers: WorkerPoolConfig,
    pub registry: RegistryConfig,
    pub admin: AdminConfig,
}

impl RpcConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RpcConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply `RPC_*` overrides from the given lookup (usually the process
    /// environment), then re-validate.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("RPC_TRANSPORT") {
            self.transport.kind = kind.parse()?;
        }
        if let Some(kind) = lookup("RPC_SERIALIZER") {
            self.transport.serializer = kind.parse()?;
        }
        if let Some(kind) = lookup("RPC_REGISTRY") {
            self.registry.kind = kind.parse()?;
        }
        if let Some(host) = lookup("RPC_HOST") {
            self.server.host = host.parse().map_err(|_| ConfigError::InvalidValue {
                field: "server.host",
                reason: format!("not an IP address: {host}"),
            })?;
        }
        if let Some(port) = lookup("RPC_PORT") {
            self.server.port = parse_number("server.port", &port)?;
        }
        if let Some(threads) = lookup("RPC_WORKERS") {
            self.workers.threads = parse_number("workers.threads", &threads)?;
        }
        if let Some(port) = lookup("RPC_ADMIN_PORT") {
            self.admin.port = parse_number("admin.port", &port)?;
            self.admin.enabled = true;
        }
        self.validate()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.kind == TransportKind::Http && !self.transport.serializer.is_text() {
            return Err(ConfigError::IncompatibleSerializer {
                transport: self.transport.kind,
                serializer: self.transport.serializer,
            });
        }

        if self.transport.max_frame_size == 0 {
            return Err(invalid("transport.max_frame_size", "cannot be 0"));
        }

        if self.server.io_threads == 0 {
            return Err(invalid("server.io_threads", "cannot be 0"));
        }

        if self.server.write_queue == 0 {
            return Err(invalid("server.write_queue", "cannot be 0"));
        }

        if self.workers.threads == 0 {
            return Err(invalid("workers.threads", "cannot be 0"));
        }

        self.client.validate()?;

        if self.admin.enabled && self.admin.port != 0 && self.admin.port == self.server.port {
            return Err(ConfigError::DuplicatePorts(self.admin.port));
        }

        Ok(())
    }

    /// RPC listen address
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Admin listen address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(field: &'static str, text: &str) -> Result<T, ConfigError> {
    text.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("not a number: {text}"),
    })
}

/// Transport selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub serializer: SerializerKind,
    /// Largest accepted frame or HTTP body, in bytes
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Binary,
            serializer: SerializerKind::Bincode,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

/// Server socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// Port (0 picks an ephemeral port)
    pub port: u16,
    /// Network I/O threads, independent of the worker pool
    pub io_threads: usize,
    /// Listen backlog
    pub backlog: u32,
    pub keepalive: bool,
    /// Requests per connection that may be executing or awaiting a write
    /// before the reader stops pulling frames
    pub write_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 7070,
            io_threads: num_cpus::get().max(1),
            backlog: 1024,
            keepalive: true,
            write_queue: 1024,
        }
    }
}

/// Client-side call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Default deadline for every call ticket
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// How often expired tickets are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Requests buffered per connection before sends are refused
    pub write_queue: usize,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_queue == 0 {
            return Err(invalid("client.write_queue", "cannot be 0"));
        }
        if self.call_timeout.is_zero() {
            return Err(invalid("client.call_timeout", "cannot be 0"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("client.sweep_interval", "cannot be 0"));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            call_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            write_queue: 1024,
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub threads: usize,
    /// Calls allowed to wait for a free worker before submissions are rejected
    pub queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: 16,
            queue_capacity: 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Service registrar selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Memory,
        }
    }
}

/// Admin HTTP surface (disabled by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub host: IpAddr,
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 7071,
        }
    }
}
