//! The container runtime adapter.
//!
//! Plays never talk to a daemon directly; every wire interaction goes
//! through the [`ContainerRuntime`] trait. One runtime exists per ship,
//! acquired lazily through a [`RuntimeProvider`] and shared by every task
//! targeting that ship, so implementations must be safe under concurrent
//! calls. The production implementation is [`docker::DockerRuntime`]
//! (bollard); [`testing::FakeRuntime`] provides an in-memory double with an
//! RPC journal for scenario tests.

pub mod docker;
pub mod testing;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use armada_core::container::ContainerSpec;
use armada_core::discovery;
use armada_core::environment::Environment;
use armada_core::port::Protocol;
use armada_core::registry::RegistryAuth;
use armada_core::ship::Ship;

use crate::error::Result;

/// Observed state of a container, as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedState {
    /// No container of that name exists.
    Absent,

    /// Created but never started.
    Created,

    /// Running.
    Running {
        /// When the container started.
        started_at: Option<DateTime<Utc>>,
    },

    /// Exited.
    Stopped {
        /// Exit code of the main process.
        exit_code: i64,
        /// When the container exited.
        finished_at: Option<DateTime<Utc>>,
    },
}

impl ObservedState {
    /// Returns true when the container is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns true when no container exists.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns a short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Created => "created",
            Self::Running { .. } => "running",
            Self::Stopped { .. } => "stopped",
        }
    }
}

/// Inspection result for a container.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    /// Observed state.
    pub state: ObservedState,

    /// Daemon-assigned container ID, when the container exists.
    pub id: Option<String>,

    /// Image reference the container was created from.
    pub image: Option<String>,

    /// ID of the image the container was created from.
    pub image_id: Option<String>,
}

impl ContainerStatus {
    /// The status of an absent container.
    pub fn absent() -> Self {
        Self {
            state: ObservedState::Absent,
            id: None,
            image: None,
            image_id: None,
        }
    }
}

/// A single published port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublication {
    /// In-container port.
    pub container_port: u16,

    /// Protocol.
    pub protocol: Protocol,

    /// Host address the port binds to.
    pub host_address: String,

    /// Host port.
    pub host_port: u16,
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,

    /// Exit code.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Returns true when the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A runtime-agnostic container creation request.
///
/// Built from a [`ContainerSpec`] and the projected environment; kept free
/// of daemon API types so test doubles can record and assert on it.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Container name.
    pub name: String,

    /// Full image reference, including tag.
    pub image: String,

    /// Container host name.
    pub hostname: String,

    /// Environment, as sorted `KEY=value` entries.
    pub env: Vec<String>,

    /// Container labels.
    pub labels: BTreeMap<String, String>,

    /// Published ports, ranges expanded.
    pub ports: Vec<PortPublication>,

    /// Host bind strings (`host:container[:ro]`).
    pub binds: Vec<String>,

    /// Container-only volume paths.
    pub container_volumes: Vec<String>,

    /// Containers whose volumes are shared in.
    pub volumes_from: Vec<String>,

    /// Network mode.
    pub network_mode: Option<String>,

    /// DNS servers.
    pub dns: Vec<String>,

    /// Restart policy name (`no`, `always`, ...).
    pub restart_policy: String,

    /// Maximum restart retries for `on-failure`.
    pub restart_retries: Option<u32>,

    /// Security options.
    pub security_opts: Vec<String>,

    /// Extra hosts entries (`host:address`).
    pub extra_hosts: Vec<String>,

    /// Command override, whitespace-split.
    pub command: Option<Vec<String>>,

    /// User override.
    pub user: Option<String>,

    /// Working directory override.
    pub workdir: Option<String>,

    /// Read-only root filesystem.
    pub read_only_rootfs: bool,

    /// Privileged mode.
    pub privileged: bool,

    /// Log driver.
    pub log_driver: Option<String>,

    /// Log driver options.
    pub log_opts: BTreeMap<String, String>,

    /// Links (`container:alias`).
    pub links: Vec<String>,

    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,

    /// Memory plus swap limit in bytes.
    pub swap_bytes: Option<i64>,

    /// CPU shares.
    pub cpu_shares: Option<u32>,

    /// Ulimits as `(name, soft, hard)`.
    pub ulimits: Vec<(String, i64, i64)>,
}

impl CreateRequest {
    /// Builds the creation request for a container, including its projected
    /// environment.
    pub fn from_spec(environment: &Environment, spec: &ContainerSpec) -> Self {
        let env = discovery::container_environment(environment, spec)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let ports = spec
            .ports
            .values()
            .flat_map(|port| {
                let bind = port.bind_address.clone();
                let protocol = port.external.protocol;
                port.pairs().map(move |(external, internal)| PortPublication {
                    container_port: internal,
                    protocol,
                    host_address: bind.clone(),
                    host_port: external,
                })
            })
            .collect();

        Self {
            name: spec.name.clone(),
            image: spec.image.reference(),
            hostname: spec.name.clone(),
            env,
            labels: spec.labels.clone(),
            ports,
            binds: spec.volumes.iter().map(|v| v.as_bind()).collect(),
            container_volumes: spec.container_volumes.clone(),
            volumes_from: spec.volumes_from.clone(),
            network_mode: spec.network_mode.clone(),
            dns: spec.dns.clone(),
            restart_policy: spec.restart_policy.as_docker_str().to_string(),
            restart_retries: match spec.restart_policy {
                armada_core::RestartPolicy::OnFailure { max_retries } => max_retries,
                _ => None,
            },
            security_opts: spec.security_opts.clone(),
            extra_hosts: spec
                .extra_hosts
                .iter()
                .map(|(host, addr)| format!("{}:{}", host, addr))
                .collect(),
            command: spec
                .command
                .as_ref()
                .map(|c| c.split_whitespace().map(String::from).collect()),
            user: spec.user.clone(),
            workdir: spec.workdir.clone(),
            read_only_rootfs: spec.read_only_rootfs,
            privileged: spec.privileged,
            log_driver: spec.log_driver.clone(),
            log_opts: spec.log_opts.clone(),
            links: spec
                .links
                .iter()
                .map(|(container, alias)| format!("{}:{}", container, alias))
                .collect(),
            memory_bytes: spec.limits.memory_bytes,
            swap_bytes: spec.limits.swap_bytes,
            cpu_shares: spec.limits.cpu_shares,
            ulimits: spec
                .limits
                .ulimits
                .iter()
                .map(|u| (u.name.clone(), u.soft, u.hard))
                .collect(),
        }
    }
}

/// A stream of log lines.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Per-ship daemon capability used by container tasks.
///
/// Implementations must be safe under concurrent calls; a single runtime is
/// shared by all tasks targeting its ship.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks daemon reachability.
    async fn ping(&self) -> Result<()>;

    /// Inspects a container by name. An unknown name yields
    /// [`ObservedState::Absent`], not an error.
    async fn inspect(&self, name: &str) -> Result<ContainerStatus>;

    /// Creates a container and returns its daemon ID.
    async fn create(&self, request: &CreateRequest) -> Result<String>;

    /// Starts a created or stopped container.
    async fn start(&self, name: &str) -> Result<()>;

    /// Stops a running container: TERM, then KILL after `timeout_secs`.
    async fn stop(&self, name: &str, timeout_secs: u64) -> Result<()>;

    /// Sends a signal to a running container.
    async fn kill(&self, name: &str, signal: &str) -> Result<()>;

    /// Removes a container, optionally with its managed volumes.
    async fn remove(&self, name: &str, with_volumes: bool) -> Result<()>;

    /// Returns true when an image reference is present on the ship.
    async fn image_present(&self, reference: &str) -> Result<bool>;

    /// Returns the ID of an image reference, if present.
    async fn image_id(&self, reference: &str) -> Result<Option<String>>;

    /// Pulls an image, using the given credentials when provided.
    async fn pull(&self, reference: &str, auth: Option<&RegistryAuth>) -> Result<()>;

    /// Authenticates against a registry ahead of pulls.
    async fn login(&self, auth: &RegistryAuth) -> Result<()>;

    /// Executes a command inside a running container.
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Streams log lines from a container.
    async fn logs(&self, name: &str, follow: bool, tail: Option<usize>) -> Result<LogStream>;
}

/// Lazily provides the shared runtime for a ship.
pub trait RuntimeProvider: Send + Sync {
    /// Returns the runtime for a ship, creating it on first use.
    fn runtime(&self, ship: &Ship) -> Result<Arc<dyn ContainerRuntime>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::image::ImageRef;
    use armada_core::port::{PortDef, PortSpec};
    use armada_core::service::Service;

    #[test]
    fn test_create_request_from_spec() {
        let mut service = Service::new("web", "acme/web:1");
        service.instances = vec!["web-1".to_string()];

        let spec = ContainerSpec::builder(
            "web-1",
            "web",
            "alpha",
            ImageRef::parse("acme/web:1").unwrap(),
        )
        .port(PortSpec::parse("http", &PortDef::Spec("8080:80".to_string())).unwrap())
        .env("MODE", "fast")
        .build();

        let environment = Environment::new(
            "test",
            vec![Ship::new("alpha", "10.0.0.1")],
            vec![],
            vec![service],
            vec![spec.clone()],
        )
        .unwrap();

        let request = CreateRequest::from_spec(&environment, &spec);
        assert_eq!(request.name, "web-1");
        assert_eq!(request.image, "acme/web:1");
        assert_eq!(
            request.ports,
            vec![PortPublication {
                container_port: 80,
                protocol: Protocol::Tcp,
                host_address: "0.0.0.0".to_string(),
                host_port: 8080,
            }]
        );
        assert!(request.env.contains(&"MODE=fast".to_string()));
        assert!(request.env.contains(&"SERVICE_NAME=web".to_string()));
    }
}
