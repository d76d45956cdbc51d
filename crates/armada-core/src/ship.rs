//! Ships: the Docker hosts containers are placed on.
//!
//! A ship is a reachable Docker daemon. Ships are declared statically in the
//! environment document, created once at load time and immutable for the
//! duration of a play. The daemon client itself is acquired lazily by the
//! orchestrator; this module only carries the connection parameters.

use serde::{Deserialize, Serialize};

/// Default port the Docker daemon listens on for plain TCP.
pub const DEFAULT_DOCKER_PORT: u16 = 2375;

/// Default timeout, in seconds, applied to daemon RPCs.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// How to reach the Docker daemon on a ship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// Plain TCP to `address:docker_port`.
    Tcp,

    /// TLS, with optional client certificate and server verification.
    Tls {
        /// Path to the client certificate (PEM).
        cert: Option<String>,
        /// Path to the client key (PEM).
        key: Option<String>,
        /// Path to the CA certificate used for verification.
        ca_cert: Option<String>,
        /// Whether to verify the server certificate.
        verify: bool,
    },

    /// Local Unix socket.
    Unix {
        /// Path to the daemon socket.
        socket_path: String,
    },

    /// SSH tunnel to the remote daemon.
    Ssh {
        /// User to connect as.
        user: String,
        /// SSH port.
        port: u16,
        /// Private key file, if not using the agent.
        key_file: Option<String>,
    },
}

impl Default for Transport {
    fn default() -> Self {
        Self::Tcp
    }
}

impl Transport {
    /// Returns a short name for the transport, for logs and errors.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls { .. } => "tls",
            Self::Unix { .. } => "unix",
            Self::Ssh { .. } => "ssh",
        }
    }
}

/// A declared Docker host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ship {
    /// Unique logical name.
    pub name: String,

    /// IP address or resolvable host name. This is also the address
    /// published to containers as their host address.
    pub address: String,

    /// Port the daemon listens on (TCP and TLS transports).
    pub docker_port: u16,

    /// Explicit daemon endpoint, overriding `address:docker_port`.
    pub endpoint: Option<String>,

    /// Transport used to reach the daemon.
    pub transport: Transport,

    /// Docker API version to negotiate; `None` means auto.
    pub api_version: Option<String>,

    /// Default timeout for daemon RPCs, in seconds.
    pub timeout_secs: u64,
}

impl Ship {
    /// Creates a ship with default port, transport and timeout.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            docker_port: DEFAULT_DOCKER_PORT,
            endpoint: None,
            transport: Transport::default(),
            api_version: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Sets the daemon port.
    pub fn with_docker_port(mut self, port: u16) -> Self {
        self.docker_port = port;
        self
    }

    /// Sets an explicit daemon endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the transport.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the RPC timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the API version to negotiate.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Returns the daemon endpoint for this ship.
    ///
    /// The explicit `endpoint` wins; otherwise the endpoint is derived from
    /// the address, port and transport.
    pub fn daemon_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        match &self.transport {
            Transport::Unix { socket_path } => format!("unix://{}", socket_path),
            Transport::Ssh { user, port, .. } => {
                format!("ssh://{}@{}:{}", user, self.address, port)
            }
            _ => format!("tcp://{}:{}", self.address, self.docker_port),
        }
    }
}

impl std::fmt::Display for Ship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.daemon_endpoint())
    }
}

/// Defaults applied to every ship unless overridden per ship.
///
/// Mirrors the `ship_defaults` document block; per-ship values win field by
/// field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipDefaults {
    /// Default daemon port.
    pub docker_port: Option<u16>,

    /// Default RPC timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// Default API version.
    pub api_version: Option<String>,
}
