//! Docker runtime implementation.
//!
//! Talks to each ship's Docker daemon through bollard. One client is
//! created per ship on first use and multiplexes all of that ship's
//! container tasks; the ship's transport selector and timeout apply at
//! connect time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::{
    HostConfig, HostConfigLogConfig, PortBinding, ResourcesUlimits, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info};

use armada_core::error::ConfigError;
use armada_core::registry::RegistryAuth;
use armada_core::ship::{Ship, Transport};

use crate::error::{OrchestratorError, Result};
use crate::runtime::{
    ContainerRuntime, ContainerStatus, CreateRequest, ExecOutput, LogStream, ObservedState,
    RuntimeProvider,
};

/// A per-ship Docker daemon client.
pub struct DockerRuntime {
    docker: Docker,
    ship: String,
}

impl DockerRuntime {
    /// Connects to a ship's daemon according to its transport selector.
    ///
    /// No I/O happens here; the connection is established lazily by the
    /// first RPC.
    pub fn connect(ship: &Ship) -> Result<Self> {
        let version = client_version(ship)?;
        let timeout = ship.timeout_secs;

        let docker = match &ship.transport {
            Transport::Tcp => {
                let addr = format!("tcp://{}:{}", ship.address, ship.docker_port);
                Docker::connect_with_http(&addr, timeout, &version)
                    .map_err(|e| OrchestratorError::daemon(&ship.name, &e))?
            }
            Transport::Unix { socket_path } => {
                Docker::connect_with_socket(socket_path, timeout, &version)
                    .map_err(|e| OrchestratorError::daemon(&ship.name, &e))?
            }
            Transport::Tls {
                cert,
                key,
                ca_cert,
                verify: _,
            } => {
                let (Some(cert), Some(key), Some(ca_cert)) = (cert, key, ca_cert) else {
                    return Err(ConfigError::invalid_ship(
                        &ship.name,
                        "tls transport requires tls_cert, tls_key and tls_ca_cert",
                    )
                    .into());
                };
                let addr = format!("tcp://{}:{}", ship.address, ship.docker_port);
                Docker::connect_with_ssl(
                    &addr,
                    Path::new(key),
                    Path::new(cert),
                    Path::new(ca_cert),
                    timeout,
                    &version,
                )
                .map_err(|e| OrchestratorError::daemon(&ship.name, &e))?
            }
            Transport::Ssh { .. } => {
                return Err(ConfigError::invalid_ship(
                    &ship.name,
                    "ssh transport is not supported by the Docker backend",
                )
                .into());
            }
        };

        debug!(ship = %ship.name, endpoint = %ship.daemon_endpoint(), "Docker client ready");

        Ok(Self {
            docker,
            ship: ship.name.clone(),
        })
    }

    fn daemon_err(&self, err: bollard::errors::Error) -> OrchestratorError {
        OrchestratorError::daemon(&self.ship, &err)
    }
}

fn client_version(ship: &Ship) -> Result<ClientVersion> {
    match &ship.api_version {
        None => Ok(*API_DEFAULT_VERSION),
        Some(auto) if auto == "auto" => Ok(*API_DEFAULT_VERSION),
        Some(version) => {
            let parsed = version.split_once('.').and_then(|(major, minor)| {
                Some(ClientVersion {
                    major_version: major.parse().ok()?,
                    minor_version: minor.parse().ok()?,
                })
            });
            parsed.ok_or_else(|| {
                ConfigError::invalid_ship(
                    &ship.name,
                    format!("invalid api_version {:?}", version),
                )
                .into()
            })
        }
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    // The daemon reports a zero time for fields that were never set.
    if value.starts_with("0001-") {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| self.daemon_err(e))?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerStatus> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(err) => {
                let err = self.daemon_err(err);
                if err.is_not_found() {
                    return Ok(ContainerStatus::absent());
                }
                return Err(err);
            }
        };

        let state = match inspect.state {
            Some(state) => {
                use bollard::models::ContainerStateStatusEnum as S;
                match state.status {
                    Some(S::CREATED) => ObservedState::Created,
                    Some(S::RUNNING) | Some(S::PAUSED) | Some(S::RESTARTING) => {
                        ObservedState::Running {
                            started_at: parse_time(state.started_at.as_deref()),
                        }
                    }
                    _ => ObservedState::Stopped {
                        exit_code: state.exit_code.unwrap_or(0),
                        finished_at: parse_time(state.finished_at.as_deref()),
                    },
                }
            }
            None => ObservedState::Created,
        };

        Ok(ContainerStatus {
            state,
            id: inspect.id,
            image: inspect.config.as_ref().and_then(|c| c.image.clone()),
            image_id: inspect.image,
        })
    }

    async fn create(&self, request: &CreateRequest) -> Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = request
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/{}", p.container_port, p.protocol),
                    HashMap::new(),
                )
            })
            .collect();

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for publication in &request.ports {
            let key = format!("{}/{}", publication.container_port, publication.protocol);
            let binding = PortBinding {
                host_ip: Some(publication.host_address.clone()),
                host_port: Some(publication.host_port.to_string()),
            };
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(binding);
        }

        let volumes: HashMap<String, HashMap<(), ()>> = request
            .container_volumes
            .iter()
            .map(|path| (path.clone(), HashMap::new()))
            .collect();

        let restart_policy = RestartPolicy {
            name: Some(match request.restart_policy.as_str() {
                "always" => RestartPolicyNameEnum::ALWAYS,
                "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
                "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
                _ => RestartPolicyNameEnum::NO,
            }),
            maximum_retry_count: request.restart_retries.map(|n| n as i64),
        };

        let host_config = HostConfig {
            binds: (!request.binds.is_empty()).then(|| request.binds.clone()),
            links: (!request.links.is_empty()).then(|| request.links.clone()),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            network_mode: request.network_mode.clone(),
            dns: (!request.dns.is_empty()).then(|| request.dns.clone()),
            restart_policy: Some(restart_policy),
            security_opt: (!request.security_opts.is_empty())
                .then(|| request.security_opts.clone()),
            extra_hosts: (!request.extra_hosts.is_empty()).then(|| request.extra_hosts.clone()),
            volumes_from: (!request.volumes_from.is_empty())
                .then(|| request.volumes_from.clone()),
            privileged: Some(request.privileged),
            readonly_rootfs: Some(request.read_only_rootfs),
            memory: request.memory_bytes.map(|b| b as i64),
            memory_swap: request.swap_bytes,
            cpu_shares: request.cpu_shares.map(|s| s as i64),
            ulimits: (!request.ulimits.is_empty()).then(|| {
                request
                    .ulimits
                    .iter()
                    .map(|(name, soft, hard)| ResourcesUlimits {
                        name: Some(name.clone()),
                        soft: Some(*soft),
                        hard: Some(*hard),
                    })
                    .collect()
            }),
            log_config: request.log_driver.as_ref().map(|driver| HostConfigLogConfig {
                typ: Some(driver.clone()),
                config: (!request.log_opts.is_empty()).then(|| {
                    request
                        .log_opts
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                }),
            }),
            ..Default::default()
        };

        let config = Config {
            hostname: Some(request.hostname.clone()),
            user: request.user.clone(),
            image: Some(request.image.clone()),
            env: Some(request.env.clone()),
            cmd: request.command.clone(),
            working_dir: request.workdir.clone(),
            labels: Some(
                request
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            volumes: (!volumes.is_empty()).then_some(volumes),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| self.daemon_err(e))?;

        info!(ship = %self.ship, container = %request.name, id = %response.id, "Created container");
        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| self.daemon_err(e))?;
        info!(ship = %self.ship, container = %name, "Started container");
        Ok(())
    }

    async fn stop(&self, name: &str, timeout_secs: u64) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| self.daemon_err(e))?;
        info!(ship = %self.ship, container = %name, "Stopped container");
        Ok(())
    }

    async fn kill(&self, name: &str, signal: &str) -> Result<()> {
        let options = KillContainerOptions { signal };
        self.docker
            .kill_container(name, Some(options))
            .await
            .map_err(|e| self.daemon_err(e))?;
        info!(ship = %self.ship, container = %name, signal = %signal, "Killed container");
        Ok(())
    }

    async fn remove(&self, name: &str, with_volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            v: with_volumes,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| self.daemon_err(e))?;
        info!(ship = %self.ship, container = %name, "Removed container");
        Ok(())
    }

    async fn image_present(&self, reference: &str) -> Result<bool> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = self.daemon_err(err);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => Ok(inspect.id),
            Err(err) => {
                let err = self.daemon_err(err);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn pull(&self, reference: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        let (image, tag) = reference
            .rsplit_once(':')
            .unwrap_or((reference, "latest"));

        let options = CreateImageOptions {
            from_image: image,
            tag,
            ..Default::default()
        };

        let credentials = auth.map(|auth| DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            email: auth.email.clone(),
            serveraddress: Some(auth.registry.clone()),
            ..Default::default()
        });

        info!(ship = %self.ship, image = %reference, "Pulling image");

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(ship = %self.ship, status = %status, "Pull progress");
                    }
                }
                Err(err) => return Err(self.daemon_err(err)),
            }
        }

        Ok(())
    }

    async fn login(&self, auth: &RegistryAuth) -> Result<()> {
        // The daemon API authenticates per pull; credentials are attached to
        // the pull request itself. Login exists so callers can resolve and
        // serialize credential use per ship and registry.
        debug!(ship = %self.ship, registry = %auth.registry, user = %auth.username, "Registry credentials resolved");
        Ok(())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput> {
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(name, options)
            .await
            .map_err(|e| self.daemon_err(e))?;

        let start = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| self.daemon_err(e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(self.daemon_err(err)),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| self.daemon_err(e))?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn logs(&self, name: &str, follow: bool, tail: Option<usize>) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let docker = self.docker.clone();
        let ship = self.ship.clone();
        let container = name.to_string();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String>>(64);

        tokio::spawn(async move {
            let mut stream = docker.logs(&container, Some(options));
            while let Some(chunk) = stream.next().await {
                let item = chunk
                    .map(|log| log.to_string())
                    .map_err(|e| OrchestratorError::daemon(&ship, &e));
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }
}

/// Lazily connects and caches one [`DockerRuntime`] per ship.
#[derive(Default)]
pub struct DockerProvider {
    runtimes: Mutex<HashMap<String, Arc<DockerRuntime>>>,
}

impl DockerProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuntimeProvider for DockerProvider {
    fn runtime(&self, ship: &Ship) -> Result<Arc<dyn ContainerRuntime>> {
        let mut runtimes = self
            .runtimes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(runtime) = runtimes.get(&ship.name) {
            return Ok(runtime.clone());
        }
        let runtime = Arc::new(DockerRuntime::connect(ship)?);
        runtimes.insert(ship.name.clone(), runtime.clone());
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_version_parsing() {
        let ship = Ship::new("alpha", "10.0.0.1").with_api_version("1.44");
        let version = client_version(&ship).unwrap();
        assert_eq!(version.major_version, 1);
        assert_eq!(version.minor_version, 44);

        let ship = Ship::new("alpha", "10.0.0.1").with_api_version("auto");
        assert!(client_version(&ship).is_ok());

        let ship = Ship::new("alpha", "10.0.0.1").with_api_version("new");
        assert!(client_version(&ship).is_err());
    }

    #[test]
    fn test_parse_time() {
        assert!(parse_time(Some("2024-05-01T10:00:00.000000000Z")).is_some());
        assert!(parse_time(Some("0001-01-01T00:00:00Z")).is_none());
        assert!(parse_time(None).is_none());
    }

    #[test]
    fn test_ssh_transport_rejected() {
        let ship = Ship::new("edge", "10.0.0.9").with_transport(Transport::Ssh {
            user: "ops".to_string(),
            port: 22,
            key_file: None,
        });
        let err = DockerRuntime::connect(&ship).err().unwrap();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
