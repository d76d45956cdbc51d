//! Container instances: the placed, runnable units of a service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checks::LifecycleChecks;
use crate::error::{ConfigError, Result};
use crate::image::ImageRef;
use crate::port::PortSpec;

/// Default grace period, in seconds, between TERM and KILL on stop.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// A host path bound into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    /// Source path on the ship.
    pub host: String,

    /// Target path inside the container.
    pub container: String,

    /// Whether the binding is read-only.
    pub read_only: bool,
}

impl VolumeBinding {
    /// Creates a read-write binding.
    pub fn new(host: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// Marks the binding read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Returns the Docker bind string (`host:container[:ro]`).
    pub fn as_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.host, self.container)
        } else {
            format!("{}:{}", self.host, self.container)
        }
    }
}

/// Container restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Never restart.
    No,
    /// Restart on non-zero exit, up to an optional retry cap.
    OnFailure {
        /// Maximum restart attempts.
        max_retries: Option<u32>,
    },
    /// Always restart.
    Always,
    /// Restart unless explicitly stopped.
    UnlessStopped,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::No
    }
}

impl RestartPolicy {
    /// Parses the daemon policy syntax (`no`, `always`, `unless-stopped`,
    /// `on-failure[:N]`).
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "no" | "" => Ok(Self::No),
            "always" => Ok(Self::Always),
            "unless-stopped" => Ok(Self::UnlessStopped),
            "on-failure" => Ok(Self::OnFailure { max_retries: None }),
            other => match other.strip_prefix("on-failure:") {
                Some(count) => {
                    let max = count.parse::<u32>().map_err(|_| ConfigError::InvalidLimit {
                        limit: "restart",
                        value: other.to_string(),
                    })?;
                    Ok(Self::OnFailure {
                        max_retries: Some(max),
                    })
                }
                None => Err(ConfigError::InvalidLimit {
                    limit: "restart",
                    value: other.to_string(),
                }),
            },
        }
    }

    /// Returns the daemon policy name.
    pub fn as_docker_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::OnFailure { .. } => "on-failure",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

/// A ulimit applied to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ulimit {
    /// Ulimit name (e.g. `nofile`).
    pub name: String,
    /// Soft limit.
    pub soft: i64,
    /// Hard limit.
    pub hard: i64,
}

/// Resource limits for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,

    /// Memory plus swap limit in bytes.
    pub swap_bytes: Option<i64>,

    /// CPU shares (relative weight).
    pub cpu_shares: Option<u32>,

    /// Ulimits.
    pub ulimits: Vec<Ulimit>,
}

/// Parses a memory size with optional `k`/`m`/`g` suffix into bytes.
pub fn parse_memory(value: &str) -> Result<u64> {
    let value = value.trim();
    let err = || ConfigError::InvalidLimit {
        limit: "memory",
        value: value.to_string(),
    };

    if value.is_empty() {
        return Err(err());
    }

    let (digits, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c.to_ascii_lowercase())),
        _ => (value, None),
    };

    let base = digits.parse::<u64>().map_err(|_| err())?;
    let multiplier = match unit {
        None | Some('b') => 1,
        Some('k') => 1024,
        Some('m') => 1024 * 1024,
        Some('g') => 1024 * 1024 * 1024,
        Some(_) => return Err(err()),
    };
    Ok(base * multiplier)
}

/// A single placed container instance of a service.
///
/// All fields are the effective, merged configuration: service defaults
/// overlaid with the instance's own declaration (instance wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Instance name, unique across all services.
    pub name: String,

    /// Owning service name.
    pub service: String,

    /// Target ship name.
    pub ship: String,

    /// Effective image: instance override, or the service image.
    pub image: ImageRef,

    /// Named port mappings (service defaults merged with overrides).
    pub ports: BTreeMap<String, PortSpec>,

    /// Declared environment, flattened and merged (env files, then service
    /// env, then instance env). Projection variables layer beneath this.
    pub env: BTreeMap<String, String>,

    /// Lifecycle checks (service checks plus instance checks).
    pub checks: LifecycleChecks,

    /// Host volume bindings.
    pub volumes: Vec<VolumeBinding>,

    /// Container-only volumes (no host source).
    pub container_volumes: Vec<String>,

    /// Containers whose volumes are shared into this one. Sources must run
    /// on the same ship, and imply a hard dependency on their service.
    pub volumes_from: Vec<String>,

    /// Resource limits.
    pub limits: Limits,

    /// Network mode (e.g. `host`, `bridge`).
    pub network_mode: Option<String>,

    /// DNS servers.
    pub dns: Vec<String>,

    /// Restart policy.
    pub restart_policy: RestartPolicy,

    /// Security options passed to the daemon.
    pub security_opts: Vec<String>,

    /// Container labels.
    pub labels: BTreeMap<String, String>,

    /// Grace period between TERM and KILL on stop, in seconds.
    pub stop_timeout_secs: u64,

    /// Command override.
    pub command: Option<String>,

    /// User override.
    pub user: Option<String>,

    /// Working directory override.
    pub workdir: Option<String>,

    /// Mount the root filesystem read-only.
    pub read_only_rootfs: bool,

    /// Run privileged.
    pub privileged: bool,

    /// Extra `/etc/hosts` entries (host name to address).
    pub extra_hosts: BTreeMap<String, String>,

    /// Log driver override.
    pub log_driver: Option<String>,

    /// Log driver options.
    pub log_opts: BTreeMap<String, String>,

    /// Docker links (container name to alias).
    pub links: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Creates a builder for a container instance.
    pub fn builder(
        name: impl Into<String>,
        service: impl Into<String>,
        ship: impl Into<String>,
        image: ImageRef,
    ) -> ContainerSpecBuilder {
        ContainerSpecBuilder {
            spec: Self {
                name: name.into(),
                service: service.into(),
                ship: ship.into(),
                image,
                ports: BTreeMap::new(),
                env: BTreeMap::new(),
                checks: LifecycleChecks::default(),
                volumes: Vec::new(),
                container_volumes: Vec::new(),
                volumes_from: Vec::new(),
                limits: Limits::default(),
                network_mode: None,
                dns: Vec::new(),
                restart_policy: RestartPolicy::default(),
                security_opts: Vec::new(),
                labels: BTreeMap::new(),
                stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
                command: None,
                user: None,
                workdir: None,
                read_only_rootfs: false,
                privileged: false,
                extra_hosts: BTreeMap::new(),
                log_driver: None,
                log_opts: BTreeMap::new(),
                links: BTreeMap::new(),
            },
        }
    }

    /// Looks up a named port.
    pub fn port(&self, name: &str) -> Option<&PortSpec> {
        self.ports.get(name)
    }
}

impl std::fmt::Display for ContainerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} [on {}]", self.name, self.service, self.ship)
    }
}

/// Builder for [`ContainerSpec`].
#[derive(Debug)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    /// Adds a named port.
    pub fn port(mut self, port: PortSpec) -> Self {
        self.spec.ports.insert(port.name.clone(), port);
        self
    }

    /// Replaces the named port map.
    pub fn ports(mut self, ports: BTreeMap<String, PortSpec>) -> Self {
        self.spec.ports = ports;
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    /// Replaces the environment map.
    pub fn env_map(mut self, env: BTreeMap<String, String>) -> Self {
        self.spec.env = env;
        self
    }

    /// Sets the lifecycle checks.
    pub fn checks(mut self, checks: LifecycleChecks) -> Self {
        self.spec.checks = checks;
        self
    }

    /// Adds a volume binding.
    pub fn volume(mut self, binding: VolumeBinding) -> Self {
        self.spec.volumes.push(binding);
        self
    }

    /// Adds a container-only volume.
    pub fn container_volume(mut self, path: impl Into<String>) -> Self {
        self.spec.container_volumes.push(path.into());
        self
    }

    /// Adds a `volumes_from` source.
    pub fn volumes_from(mut self, source: impl Into<String>) -> Self {
        self.spec.volumes_from.push(source.into());
        self
    }

    /// Sets resource limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.spec.limits = limits;
        self
    }

    /// Sets the network mode.
    pub fn network_mode(mut self, mode: impl Into<String>) -> Self {
        self.spec.network_mode = Some(mode.into());
        self
    }

    /// Adds a DNS server.
    pub fn dns(mut self, server: impl Into<String>) -> Self {
        self.spec.dns.push(server.into());
        self
    }

    /// Sets the restart policy.
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.spec.restart_policy = policy;
        self
    }

    /// Adds a security option.
    pub fn security_opt(mut self, opt: impl Into<String>) -> Self {
        self.spec.security_opts.push(opt.into());
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the stop timeout.
    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.spec.stop_timeout_secs = secs;
        self
    }

    /// Sets the command override.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.spec.command = Some(command.into());
        self
    }

    /// Sets the user override.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.spec.user = Some(user.into());
        self
    }

    /// Sets the working directory override.
    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.spec.workdir = Some(dir.into());
        self
    }

    /// Mounts the root filesystem read-only.
    pub fn read_only_rootfs(mut self, read_only: bool) -> Self {
        self.spec.read_only_rootfs = read_only;
        self
    }

    /// Runs the container privileged.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.spec.privileged = privileged;
        self
    }

    /// Adds an extra hosts entry.
    pub fn extra_host(mut self, host: impl Into<String>, address: impl Into<String>) -> Self {
        self.spec.extra_hosts.insert(host.into(), address.into());
        self
    }

    /// Sets the log driver and options.
    pub fn log_driver(
        mut self,
        driver: impl Into<String>,
        opts: BTreeMap<String, String>,
    ) -> Self {
        self.spec.log_driver = Some(driver.into());
        self.spec.log_opts = opts;
        self
    }

    /// Adds a Docker link.
    pub fn link(mut self, container: impl Into<String>, alias: impl Into<String>) -> Self {
        self.spec.links.insert(container.into(), alias.into());
        self
    }

    /// Builds the container spec.
    pub fn build(self) -> ContainerSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_suffixes() {
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert_eq!(parse_memory("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_memory("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_memory("lots").is_err());
        assert!(parse_memory("").is_err());
    }

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!(RestartPolicy::parse("no").unwrap(), RestartPolicy::No);
        assert_eq!(
            RestartPolicy::parse("always").unwrap(),
            RestartPolicy::Always
        );
        assert_eq!(
            RestartPolicy::parse("on-failure:3").unwrap(),
            RestartPolicy::OnFailure {
                max_retries: Some(3)
            }
        );
        assert!(RestartPolicy::parse("sometimes").is_err());
    }

    #[test]
    fn test_bind_string() {
        let binding = VolumeBinding::new("/srv/data", "/data");
        assert_eq!(binding.as_bind(), "/srv/data:/data");
        assert_eq!(binding.read_only().as_bind(), "/srv/data:/data:ro");
    }

    #[test]
    fn test_builder() {
        let image = ImageRef::parse("acme/kafka:3").unwrap();
        let spec = ContainerSpec::builder("kafka-1", "kafka", "alpha", image)
            .env("BROKER_ID", "1")
            .stop_timeout_secs(30)
            .volumes_from("zk-1")
            .build();

        assert_eq!(spec.name, "kafka-1");
        assert_eq!(spec.stop_timeout_secs, 30);
        assert_eq!(spec.volumes_from, vec!["zk-1".to_string()]);
        assert_eq!(spec.env.get("BROKER_ID").map(String::as_str), Some("1"));
    }
}
