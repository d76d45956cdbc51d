//! Document schema and normalization.
//!
//! The environment description is a YAML document with a top-level
//! `__armada.schema` version selector. Versions 1 and 2 differ in the
//! direction of volume binding keys (v1: `container: host`, v2:
//! `host: container`); both normalize to the same internal representation.
//! Unknown document keys are rejected.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use armada_core::checks::LifecycleChecks;
use armada_core::container::{parse_memory, ContainerSpec, Limits, RestartPolicy, Ulimit, VolumeBinding};
use armada_core::env::EnvValue;
use armada_core::environment::Environment;
use armada_core::error::ConfigError;
use armada_core::image::ImageRef;
use armada_core::port::{PortDef, PortSpec};
use armada_core::registry::{PullRetryPolicy, RegistryAuth};
use armada_core::service::Service;
use armada_core::ship::{Ship, Transport, DEFAULT_DOCKER_PORT, DEFAULT_TIMEOUT_SECS};

use crate::envfile;
use crate::error::Result;

/// Supported schema versions.
const SUPPORTED_SCHEMAS: [u32; 2] = [1, 2];

/// A field accepting either a single value or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value.
    One(T),
    /// A list of values.
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T: Clone> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// The raw environment document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDoc {
    /// Schema version; absent means version 1.
    #[serde(rename = "__armada.schema", default)]
    pub schema: Option<u32>,

    /// Environment name.
    pub name: String,

    /// Registry credentials by name.
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryDoc>,

    /// Defaults applied to every ship.
    #[serde(default)]
    pub ship_defaults: ShipDefaultsDoc,

    /// Ships by name.
    #[serde(default)]
    pub ships: BTreeMap<String, ShipDoc>,

    /// Services by name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDoc>,

    /// Audit sink configuration.
    #[serde(default)]
    pub audit: Vec<AuditDoc>,
}

/// Defaults shared by all ships.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipDefaultsDoc {
    /// Default daemon port.
    #[serde(default)]
    pub docker_port: Option<u16>,

    /// Default RPC timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Default API version.
    #[serde(default)]
    pub api_version: Option<String>,
}

/// A ship declaration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipDoc {
    /// IP address or resolvable host name.
    pub ip: String,

    /// Daemon port.
    #[serde(default)]
    pub docker_port: Option<u16>,

    /// Explicit daemon endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Unix socket path; selects the Unix transport.
    #[serde(default)]
    pub socket_path: Option<String>,

    /// SSH tunnel parameters; selects the SSH transport.
    #[serde(default)]
    pub ssh_tunnel: Option<SshTunnelDoc>,

    /// Enable TLS.
    #[serde(default)]
    pub tls: bool,

    /// TLS client certificate path.
    #[serde(default)]
    pub tls_cert: Option<String>,

    /// TLS client key path.
    #[serde(default)]
    pub tls_key: Option<String>,

    /// TLS CA certificate path.
    #[serde(default)]
    pub tls_ca_cert: Option<String>,

    /// Verify the server certificate.
    #[serde(default)]
    pub tls_verify: bool,

    /// API version override.
    #[serde(default)]
    pub api_version: Option<String>,

    /// RPC timeout override, in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// SSH tunnel parameters for a ship.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshTunnelDoc {
    /// User to connect as.
    pub user: String,

    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key file.
    #[serde(default)]
    pub key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Registry credentials.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDoc {
    /// Registry URL; defaults to the registry's map key.
    #[serde(default)]
    pub registry: Option<String>,

    /// Account user name.
    pub username: String,

    /// Account password.
    pub password: String,

    /// Account email.
    #[serde(default)]
    pub email: Option<String>,

    /// Image pull retry policy.
    #[serde(default)]
    pub pull_retry: Option<PullRetryDoc>,
}

/// Image pull retry policy.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PullRetryDoc {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,

    /// HTTP status codes that trigger a retry.
    #[serde(default)]
    pub retry_on_status: Vec<u16>,
}

/// A service declaration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDoc {
    /// Default image for instances.
    pub image: String,

    /// Default named ports.
    #[serde(default)]
    pub ports: BTreeMap<String, PortDef>,

    /// Default environment.
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    /// Env files merged beneath `env`.
    #[serde(default)]
    pub env_file: OneOrMany<String>,

    /// Service-level lifecycle checks.
    #[serde(default)]
    pub lifecycle: LifecycleChecks,

    /// Hard dependencies.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Soft dependencies.
    #[serde(default)]
    pub wants_info: Vec<String>,

    /// Exclude from "all" selections.
    #[serde(default)]
    pub omit: bool,

    /// Instances by name.
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceDoc>,
}

/// A container instance declaration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceDoc {
    /// Target ship.
    pub ship: String,

    /// Image override.
    #[serde(default)]
    pub image: Option<String>,

    /// Port overrides, by name.
    #[serde(default)]
    pub ports: BTreeMap<String, PortDef>,

    /// Instance environment; wins over the service's.
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    /// Instance env files.
    #[serde(default)]
    pub env_file: OneOrMany<String>,

    /// Instance lifecycle checks, in addition to the service's.
    #[serde(default)]
    pub lifecycle: LifecycleChecks,

    /// Volume bindings; key direction depends on the schema version.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,

    /// Container-only volumes.
    #[serde(default)]
    pub container_volumes: OneOrMany<String>,

    /// Containers whose volumes are shared into this one.
    #[serde(default)]
    pub volumes_from: OneOrMany<String>,

    /// Resource limits.
    #[serde(default)]
    pub limits: Option<LimitsDoc>,

    /// Network mode.
    #[serde(default)]
    pub net: Option<String>,

    /// DNS servers.
    #[serde(default)]
    pub dns: OneOrMany<String>,

    /// Restart policy (`no`, `always`, `unless-stopped`, `on-failure[:N]`).
    #[serde(default)]
    pub restart: Option<String>,

    /// Security options.
    #[serde(default)]
    pub security_opt: Vec<String>,

    /// Container labels.
    #[serde(default)]
    pub labels: BTreeMap<String, EnvValue>,

    /// TERM-to-KILL grace period on stop, in seconds.
    #[serde(default)]
    pub stop_timeout: Option<u64>,

    /// Command override.
    #[serde(default)]
    pub command: Option<String>,

    /// User override.
    #[serde(default)]
    pub user: Option<String>,

    /// Working directory override.
    #[serde(default)]
    pub workdir: Option<String>,

    /// Mount the root filesystem read-only.
    #[serde(default)]
    pub read_only: bool,

    /// Run privileged.
    #[serde(default)]
    pub privileged: bool,

    /// Extra `/etc/hosts` entries.
    #[serde(default)]
    pub extra_hosts: BTreeMap<String, String>,

    /// Log driver.
    #[serde(default)]
    pub log_driver: Option<String>,

    /// Log driver options.
    #[serde(default)]
    pub log_opt: BTreeMap<String, String>,

    /// Docker links (container name to alias).
    #[serde(default)]
    pub links: BTreeMap<String, String>,
}

/// Resource limits.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsDoc {
    /// Memory limit; bytes or a `k`/`m`/`g` suffixed string.
    #[serde(default)]
    pub memory: Option<MemoryValue>,

    /// Memory plus swap limit.
    #[serde(default)]
    pub swap: Option<MemoryValue>,

    /// CPU shares.
    #[serde(default)]
    pub cpu: Option<u32>,

    /// Ulimits by name.
    #[serde(default)]
    pub ulimits: BTreeMap<String, UlimitDoc>,
}

/// A memory size: raw bytes or a suffixed string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemoryValue {
    /// Raw byte count.
    Bytes(u64),
    /// Suffixed size string, e.g. `512m`.
    Text(String),
}

impl MemoryValue {
    fn to_bytes(&self) -> std::result::Result<u64, ConfigError> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Text(s) => parse_memory(s),
        }
    }
}

/// A ulimit: equal soft/hard value, or an explicit pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UlimitDoc {
    /// Same soft and hard limit.
    Equal(i64),
    /// Explicit soft and hard limits.
    Pair {
        /// Soft limit.
        soft: i64,
        /// Hard limit.
        hard: i64,
    },
}

/// An audit sink declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditDoc {
    /// Sink type.
    #[serde(rename = "type")]
    pub kind: String,

    /// Whether sink failures are swallowed.
    #[serde(default)]
    pub ignore_errors: bool,
}

/// Builds the validated environment from a parsed document.
///
/// `base_dir` anchors env file references.
pub fn build(doc: EnvironmentDoc, base_dir: &Path) -> Result<Environment> {
    let schema = doc.schema.unwrap_or(1);
    if !SUPPORTED_SCHEMAS.contains(&schema) {
        return Err(ConfigError::UnsupportedSchema(schema).into());
    }

    let ships = doc
        .ships
        .into_iter()
        .map(|(name, ship)| build_ship(name, ship, &doc.ship_defaults))
        .collect();

    let registries = doc
        .registries
        .into_iter()
        .map(|(name, registry)| build_registry(name, registry))
        .collect();

    let mut services = Vec::new();
    let mut containers = Vec::new();

    for (service_name, mut service_doc) in doc.services {
        let instances = std::mem::take(&mut service_doc.instances);
        let service_ports = parse_ports(&service_doc.ports)?;
        let service_env_files = service_doc.env_file.clone().into_vec();

        let mut service = Service::new(&service_name, &service_doc.image);
        service.ports = service_ports.clone();
        service.env = service_doc.env.clone();
        service.env_files = service_env_files.clone();
        service.checks = service_doc.lifecycle.clone();
        service.requires = service_doc.requires.iter().cloned().collect();
        service.wants_info = service_doc.wants_info.iter().cloned().collect();
        service.omit = service_doc.omit;
        service.instances = instances.keys().cloned().collect();
        services.push(service);

        for (instance_name, instance) in instances {
            containers.push(build_container(
                &service_name,
                &service_doc,
                &service_ports,
                &service_env_files,
                instance_name,
                instance,
                schema,
                base_dir,
            )?);
        }
    }

    Ok(Environment::new(
        doc.name, ships, registries, services, containers,
    )?)
}

fn build_ship(name: String, doc: ShipDoc, defaults: &ShipDefaultsDoc) -> Ship {
    let transport = if let Some(socket_path) = doc.socket_path {
        Transport::Unix { socket_path }
    } else if let Some(tunnel) = doc.ssh_tunnel {
        Transport::Ssh {
            user: tunnel.user,
            port: tunnel.port,
            key_file: tunnel.key,
        }
    } else if doc.tls || doc.tls_cert.is_some() {
        Transport::Tls {
            cert: doc.tls_cert,
            key: doc.tls_key,
            ca_cert: doc.tls_ca_cert,
            verify: doc.tls_verify,
        }
    } else {
        Transport::Tcp
    };

    let mut ship = Ship::new(name, doc.ip).with_transport(transport);
    ship.docker_port = doc
        .docker_port
        .or(defaults.docker_port)
        .unwrap_or(DEFAULT_DOCKER_PORT);
    ship.timeout_secs = doc
        .timeout
        .or(defaults.timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    ship.api_version = doc.api_version.or_else(|| defaults.api_version.clone());
    ship.endpoint = doc.endpoint;
    ship
}

fn build_registry(name: String, doc: RegistryDoc) -> RegistryAuth {
    RegistryAuth {
        registry: doc.registry.unwrap_or_else(|| name.clone()),
        name,
        username: doc.username,
        password: doc.password,
        email: doc.email,
        retry: doc.pull_retry.map(|retry| PullRetryPolicy {
            max_attempts: retry.max_attempts,
            retry_statuses: retry.retry_on_status,
        }),
    }
}

fn parse_ports(defs: &BTreeMap<String, PortDef>) -> Result<BTreeMap<String, PortSpec>> {
    defs.iter()
        .map(|(name, def)| Ok((name.clone(), PortSpec::parse(name, def)?)))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn build_container(
    service_name: &str,
    service_doc: &ServiceDoc,
    service_ports: &BTreeMap<String, PortSpec>,
    service_env_files: &[String],
    instance_name: String,
    instance: InstanceDoc,
    schema: u32,
    base_dir: &Path,
) -> Result<ContainerSpec> {
    let image_ref = instance
        .image
        .as_deref()
        .unwrap_or(service_doc.image.as_str());
    let image = ImageRef::parse(image_ref)?;

    // Port merge: service defaults, instance overrides by name.
    let mut ports = service_ports.clone();
    for (name, def) in &instance.ports {
        ports.insert(name.clone(), PortSpec::parse(name, def)?);
    }

    // Env overlay: env files in declaration order, then service env, then
    // instance env.
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    for file in service_env_files.iter().chain(instance.env_file.clone().into_vec().iter()) {
        let path = resolve_env_file(base_dir, file);
        env.extend(envfile::load(&path)?);
    }
    for (key, value) in &service_doc.env {
        env.insert(key.clone(), value.flatten());
    }
    for (key, value) in &instance.env {
        env.insert(key.clone(), value.flatten());
    }

    let checks = LifecycleChecks::merged(&service_doc.lifecycle, &instance.lifecycle);

    let limits = match &instance.limits {
        Some(doc) => Limits {
            memory_bytes: doc.memory.as_ref().map(MemoryValue::to_bytes).transpose()?,
            swap_bytes: doc
                .swap
                .as_ref()
                .map(MemoryValue::to_bytes)
                .transpose()?
                .map(|bytes| bytes as i64),
            cpu_shares: doc.cpu,
            ulimits: doc
                .ulimits
                .iter()
                .map(|(name, ulimit)| match ulimit {
                    UlimitDoc::Equal(limit) => Ulimit {
                        name: name.clone(),
                        soft: *limit,
                        hard: *limit,
                    },
                    UlimitDoc::Pair { soft, hard } => Ulimit {
                        name: name.clone(),
                        soft: *soft,
                        hard: *hard,
                    },
                })
                .collect(),
        },
        None => Limits::default(),
    };

    let restart_policy = match &instance.restart {
        Some(policy) => RestartPolicy::parse(policy)?,
        None => RestartPolicy::default(),
    };

    // Volume key direction is the schema difference: v1 maps
    // container -> host, v2 maps host -> container.
    let volumes = instance
        .volumes
        .iter()
        .map(|(key, value)| match schema {
            1 => VolumeBinding::new(value.clone(), key.clone()),
            _ => VolumeBinding::new(key.clone(), value.clone()),
        })
        .collect::<Vec<_>>();

    let mut builder = ContainerSpec::builder(instance_name, service_name, instance.ship, image)
        .ports(ports)
        .env_map(env)
        .checks(checks)
        .limits(limits)
        .restart_policy(restart_policy)
        .read_only_rootfs(instance.read_only)
        .privileged(instance.privileged);

    for binding in volumes {
        builder = builder.volume(binding);
    }
    for path in instance.container_volumes.into_vec() {
        builder = builder.container_volume(path);
    }
    for source in instance.volumes_from.into_vec() {
        builder = builder.volumes_from(source);
    }
    if let Some(net) = instance.net {
        builder = builder.network_mode(net);
    }
    for server in instance.dns.into_vec() {
        builder = builder.dns(server);
    }
    for opt in instance.security_opt {
        builder = builder.security_opt(opt);
    }
    for (key, value) in &instance.labels {
        builder = builder.label(key, value.flatten());
    }
    if let Some(timeout) = instance.stop_timeout {
        builder = builder.stop_timeout_secs(timeout);
    }
    if let Some(command) = instance.command {
        builder = builder.command(command);
    }
    if let Some(user) = instance.user {
        builder = builder.user(user);
    }
    if let Some(workdir) = instance.workdir {
        builder = builder.workdir(workdir);
    }
    for (host, address) in &instance.extra_hosts {
        builder = builder.extra_host(host, address);
    }
    if let Some(driver) = instance.log_driver {
        builder = builder.log_driver(driver, instance.log_opt.clone());
    }
    for (container, alias) in &instance.links {
        builder = builder.link(container, alias);
    }

    Ok(builder.build())
}

fn resolve_env_file(base_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
