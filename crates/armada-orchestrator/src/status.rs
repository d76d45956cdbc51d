//! The status play: read-only, unordered, trivially parallel.
//!
//! Status never mutates daemon state. For each selected container it
//! reports configured and actual image, observed state and age, and in
//! detailed mode probes each named TCP port with a short connect timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use armada_core::container::ContainerSpec;
use armada_core::environment::{Environment, Selection, SelectionFilters};

use crate::error::Result;
use crate::runtime::{ObservedState, RuntimeProvider};

/// Connect timeout of a status port probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Options of a status run.
#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    /// Worker pool size; `None` is unbounded.
    pub concurrency: Option<usize>,

    /// Probe named ports externally.
    pub detailed: bool,

    /// Transitively include hard dependencies of the targets.
    pub with_dependencies: bool,

    /// Glob filters applied to the selection.
    pub filters: SelectionFilters,
}

/// Probe result of one named port.
#[derive(Debug, Clone)]
pub struct PortStatus {
    /// Port name.
    pub name: String,

    /// External port number probed.
    pub external_port: u16,

    /// Whether a TCP connection succeeded.
    pub open: bool,
}

/// Status of one container.
#[derive(Debug, Clone)]
pub struct StatusRow {
    /// Container name.
    pub container: String,

    /// Owning service.
    pub service: String,

    /// Target ship.
    pub ship: String,

    /// Image the environment configures.
    pub configured_image: String,

    /// Image the container actually runs, when it exists.
    pub actual_image: Option<String>,

    /// Short state label (`running`, `stopped`, `absent`, `host down`).
    pub state: String,

    /// Seconds since start, for running containers.
    pub uptime_secs: Option<i64>,

    /// Exit code, for stopped containers.
    pub exit_code: Option<i64>,

    /// Seconds since exit, for stopped containers.
    pub exited_secs_ago: Option<i64>,

    /// Daemon error, when the ship was unreachable.
    pub error: Option<String>,

    /// Port probes (detailed mode only).
    pub ports: Vec<PortStatus>,
}

/// Reports the status of the selected containers.
pub async fn status(
    environment: &Arc<Environment>,
    provider: &Arc<dyn RuntimeProvider>,
    targets: &[String],
    options: &StatusOptions,
) -> Result<Vec<StatusRow>> {
    let selection = environment.select(
        targets,
        &Selection {
            with_dependencies: options.with_dependencies,
            filters: options.filters.clone(),
        },
    )?;

    let semaphore = Arc::new(Semaphore::new(
        options.concurrency.unwrap_or(selection.len().max(1)),
    ));

    let rows = selection.iter().map(|spec| {
        let environment = environment.clone();
        let provider = provider.clone();
        let semaphore = semaphore.clone();
        let spec = (*spec).clone();
        let detailed = options.detailed;
        async move {
            let _permit = semaphore.acquire_owned().await;
            inspect_row(&environment, provider.as_ref(), &spec, detailed).await
        }
    });

    Ok(futures::future::join_all(rows).await)
}

async fn inspect_row(
    environment: &Environment,
    provider: &dyn RuntimeProvider,
    spec: &ContainerSpec,
    detailed: bool,
) -> StatusRow {
    let mut row = StatusRow {
        container: spec.name.clone(),
        service: spec.service.clone(),
        ship: spec.ship.clone(),
        configured_image: spec.image.reference(),
        actual_image: None,
        state: "absent".to_string(),
        uptime_secs: None,
        exit_code: None,
        exited_secs_ago: None,
        error: None,
        ports: Vec::new(),
    };

    let runtime = match provider.runtime(environment.ship_of(spec)) {
        Ok(runtime) => runtime,
        Err(err) => {
            row.state = "host down".to_string();
            row.error = Some(err.to_string());
            return row;
        }
    };

    match runtime.inspect(&spec.name).await {
        Ok(status) => {
            row.actual_image = status.image;
            row.state = status.state.label().to_string();
            match status.state {
                ObservedState::Running { started_at } => {
                    row.uptime_secs =
                        started_at.map(|started| (Utc::now() - started).num_seconds());
                }
                ObservedState::Stopped {
                    exit_code,
                    finished_at,
                } => {
                    row.exit_code = Some(exit_code);
                    row.exited_secs_ago =
                        finished_at.map(|finished| (Utc::now() - finished).num_seconds());
                }
                _ => {}
            }
        }
        Err(err) => {
            row.state = "host down".to_string();
            row.error = Some(err.to_string());
            return row;
        }
    }

    if detailed {
        let address = &environment.ship_of(spec).address;
        for (name, port) in &spec.ports {
            if !port.is_tcp() {
                continue;
            }
            let open = probe(address, port.external_port()).await;
            row.ports.push(PortStatus {
                name: name.clone(),
                external_port: port.external_port(),
                open,
            });
        }
    }

    row
}

async fn probe(address: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((address, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{FakeProvider, RpcCall};
    use armada_core::image::ImageRef;
    use armada_core::service::Service;
    use armada_core::ship::Ship;

    fn environment() -> Arc<Environment> {
        let mut service = Service::new("web", "acme/web:1");
        service.instances = vec!["web-1".to_string()];
        let container = ContainerSpec::builder(
            "web-1",
            "web",
            "alpha",
            ImageRef::parse("acme/web:1").unwrap(),
        )
        .build();

        Arc::new(
            Environment::new(
                "test",
                vec![Ship::new("alpha", "127.0.0.1")],
                vec![],
                vec![service],
                vec![container],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_status_never_mutates() {
        let environment = environment();
        let provider = Arc::new(FakeProvider::new());
        let fake = provider.fake("alpha");
        fake.seed_running("web-1", "acme/web:1");

        let provider: Arc<dyn RuntimeProvider> = provider.clone();
        let rows = status(&environment, &provider, &[], &StatusOptions::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, "running");
        assert_eq!(rows[0].actual_image.as_deref(), Some("acme/web:1"));

        let mutating = fake.count(|call| {
            !matches!(
                call,
                RpcCall::Inspect(_) | RpcCall::ImagePresent(_) | RpcCall::ImageId(_) | RpcCall::Ping
            )
        });
        assert_eq!(mutating, 0);
    }

    #[tokio::test]
    async fn test_status_reports_exit_code() {
        let environment = environment();
        let provider = Arc::new(FakeProvider::new());
        provider.fake("alpha").seed_stopped("web-1", "acme/web:1", 3);

        let provider: Arc<dyn RuntimeProvider> = provider;
        let rows = status(&environment, &provider, &[], &StatusOptions::default())
            .await
            .unwrap();
        assert_eq!(rows[0].state, "stopped");
        assert_eq!(rows[0].exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_status_absent_container() {
        let environment = environment();
        let provider: Arc<dyn RuntimeProvider> = Arc::new(FakeProvider::new());
        let rows = status(&environment, &provider, &[], &StatusOptions::default())
            .await
            .unwrap();
        assert_eq!(rows[0].state, "absent");
        assert!(rows[0].actual_image.is_none());
    }
}
