//! In-memory runtime double for tests.
//!
//! [`FakeRuntime`] implements [`ContainerRuntime`] against an in-memory
//! container table, records every RPC in a journal, and supports scripted
//! failures keyed by operation and target. Scenario tests drive whole plays
//! against it and assert on the journal.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use armada_core::registry::RegistryAuth;
use armada_core::ship::Ship;

use crate::error::{OrchestratorError, Result};
use crate::runtime::{
    ContainerRuntime, ContainerStatus, CreateRequest, ExecOutput, LogStream, ObservedState,
    RuntimeProvider,
};

/// A recorded daemon RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    /// Daemon ping.
    Ping,
    /// Container inspection.
    Inspect(String),
    /// Container creation.
    Create(String),
    /// Container start.
    Start(String),
    /// Container stop with its timeout.
    Stop(String, u64),
    /// Container kill with its signal.
    Kill(String, String),
    /// Container removal; the flag is `with_volumes`.
    Remove(String, bool),
    /// Image presence probe.
    ImagePresent(String),
    /// Image ID lookup.
    ImageId(String),
    /// Image pull.
    Pull(String),
    /// Registry login.
    Login(String),
    /// In-container exec.
    Exec(String),
    /// Log retrieval.
    Logs(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    state: ObservedState,
    image: String,
    image_id: String,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    images: BTreeMap<String, String>,
    journal: Vec<RpcCall>,
    failures: BTreeMap<String, VecDeque<u16>>,
    exec_exit_codes: BTreeMap<String, i64>,
    log_lines: BTreeMap<String, Vec<String>>,
    create_requests: Vec<CreateRequest>,
}

/// An in-memory Docker daemon double for one ship.
pub struct FakeRuntime {
    ship: String,
    inner: Mutex<Inner>,
    pull_delay_ms: AtomicU64,
    image_serial: AtomicU64,
}

impl FakeRuntime {
    /// Creates an empty fake daemon for a ship.
    pub fn new(ship: impl Into<String>) -> Self {
        Self {
            ship: ship.into(),
            inner: Mutex::new(Inner::default()),
            pull_delay_ms: AtomicU64::new(0),
            image_serial: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks an image present with the given ID.
    pub fn set_image(&self, reference: impl Into<String>, id: impl Into<String>) {
        self.lock().images.insert(reference.into(), id.into());
    }

    /// Removes an image.
    pub fn remove_image(&self, reference: &str) {
        self.lock().images.remove(reference);
    }

    /// Seeds a running container created from the given image reference.
    pub fn seed_running(&self, name: impl Into<String>, image: impl Into<String>) {
        let name = name.into();
        let image = image.into();
        let mut inner = self.lock();
        let image_id = inner
            .images
            .get(&image)
            .cloned()
            .unwrap_or_else(|| "sha256:seed".to_string());
        inner.containers.insert(
            name.clone(),
            FakeContainer {
                id: format!("id-{}", name),
                state: ObservedState::Running { started_at: None },
                image,
                image_id,
            },
        );
    }

    /// Seeds a stopped container.
    pub fn seed_stopped(&self, name: impl Into<String>, image: impl Into<String>, exit_code: i64) {
        let name = name.into();
        let image = image.into();
        let mut inner = self.lock();
        let image_id = inner
            .images
            .get(&image)
            .cloned()
            .unwrap_or_else(|| "sha256:seed".to_string());
        inner.containers.insert(
            name.clone(),
            FakeContainer {
                id: format!("id-{}", name),
                state: ObservedState::Stopped {
                    exit_code,
                    finished_at: None,
                },
                image,
                image_id,
            },
        );
    }

    /// Scripts the next call of `op` against `target` to fail with an HTTP
    /// status. Repeated calls queue further failures.
    pub fn fail_next(&self, op: &str, target: &str, status: u16) {
        self.lock()
            .failures
            .entry(format!("{}:{}", op, target))
            .or_default()
            .push_back(status);
    }

    /// Delays every pull, to make overlap deterministic in coalescing tests.
    pub fn set_pull_delay_ms(&self, delay: u64) {
        self.pull_delay_ms.store(delay, Ordering::Relaxed);
    }

    /// Scripts the exit code of execs in a container.
    pub fn set_exec_exit(&self, container: impl Into<String>, exit_code: i64) {
        self.lock().exec_exit_codes.insert(container.into(), exit_code);
    }

    /// Scripts the log lines of a container.
    pub fn set_logs(&self, container: impl Into<String>, lines: Vec<String>) {
        self.lock().log_lines.insert(container.into(), lines);
    }

    /// Returns a snapshot of the RPC journal.
    pub fn journal(&self) -> Vec<RpcCall> {
        self.lock().journal.clone()
    }

    /// Counts journal entries matching a predicate.
    pub fn count(&self, matching: impl Fn(&RpcCall) -> bool) -> usize {
        self.lock().journal.iter().filter(|call| matching(call)).count()
    }

    /// Returns the creation requests received, in order.
    pub fn create_requests(&self) -> Vec<CreateRequest> {
        self.lock().create_requests.clone()
    }

    /// Returns the current state of a container, if it exists.
    pub fn state_of(&self, name: &str) -> Option<ObservedState> {
        self.lock().containers.get(name).map(|c| c.state.clone())
    }

    fn take_failure(&self, op: &str, target: &str) -> Option<u16> {
        let mut inner = self.lock();
        let queue = inner.failures.get_mut(&format!("{}:{}", op, target))?;
        let status = queue.pop_front();
        if queue.is_empty() {
            inner.failures.remove(&format!("{}:{}", op, target));
        }
        status
    }

    fn injected(&self, op: &str, target: &str) -> Result<()> {
        if let Some(status) = self.take_failure(op, target) {
            return Err(OrchestratorError::daemon_status(
                &self.ship,
                status,
                format!("injected {} failure", op),
            ));
        }
        Ok(())
    }

    fn not_found(&self, what: &str) -> OrchestratorError {
        OrchestratorError::daemon_status(&self.ship, 404, format!("no such {}", what))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        self.lock().journal.push(RpcCall::Ping);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerStatus> {
        self.lock().journal.push(RpcCall::Inspect(name.to_string()));
        self.injected("inspect", name)?;

        let inner = self.lock();
        Ok(match inner.containers.get(name) {
            Some(container) => ContainerStatus {
                state: container.state.clone(),
                id: Some(container.id.clone()),
                image: Some(container.image.clone()),
                image_id: Some(container.image_id.clone()),
            },
            None => ContainerStatus::absent(),
        })
    }

    async fn create(&self, request: &CreateRequest) -> Result<String> {
        self.lock().journal.push(RpcCall::Create(request.name.clone()));
        self.injected("create", &request.name)?;

        let mut inner = self.lock();
        if inner.containers.contains_key(&request.name) {
            return Err(OrchestratorError::daemon_status(
                &self.ship,
                409,
                format!("container {} already exists", request.name),
            ));
        }
        let image_id = inner
            .images
            .get(&request.image)
            .cloned()
            .unwrap_or_else(|| "sha256:unknown".to_string());
        let id = format!("id-{}", request.name);
        inner.containers.insert(
            request.name.clone(),
            FakeContainer {
                id: id.clone(),
                state: ObservedState::Created,
                image: request.image.clone(),
                image_id,
            },
        );
        inner.create_requests.push(request.clone());
        Ok(id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.lock().journal.push(RpcCall::Start(name.to_string()));
        self.injected("start", name)?;

        let mut inner = self.lock();
        match inner.containers.get_mut(name) {
            Some(container) => {
                container.state = ObservedState::Running { started_at: None };
                Ok(())
            }
            None => Err(self.not_found("container")),
        }
    }

    async fn stop(&self, name: &str, timeout_secs: u64) -> Result<()> {
        self.lock()
            .journal
            .push(RpcCall::Stop(name.to_string(), timeout_secs));
        self.injected("stop", name)?;

        let mut inner = self.lock();
        match inner.containers.get_mut(name) {
            Some(container) => {
                container.state = ObservedState::Stopped {
                    exit_code: 0,
                    finished_at: None,
                };
                Ok(())
            }
            None => Err(self.not_found("container")),
        }
    }

    async fn kill(&self, name: &str, signal: &str) -> Result<()> {
        self.lock()
            .journal
            .push(RpcCall::Kill(name.to_string(), signal.to_string()));
        self.injected("kill", name)?;

        let mut inner = self.lock();
        match inner.containers.get_mut(name) {
            Some(container) => {
                container.state = ObservedState::Stopped {
                    exit_code: 137,
                    finished_at: None,
                };
                Ok(())
            }
            None => Err(self.not_found("container")),
        }
    }

    async fn remove(&self, name: &str, with_volumes: bool) -> Result<()> {
        self.lock()
            .journal
            .push(RpcCall::Remove(name.to_string(), with_volumes));
        self.injected("remove", name)?;

        let mut inner = self.lock();
        match inner.containers.remove(name) {
            Some(_) => Ok(()),
            None => Err(self.not_found("container")),
        }
    }

    async fn image_present(&self, reference: &str) -> Result<bool> {
        self.lock()
            .journal
            .push(RpcCall::ImagePresent(reference.to_string()));
        Ok(self.lock().images.contains_key(reference))
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        self.lock().journal.push(RpcCall::ImageId(reference.to_string()));
        Ok(self.lock().images.get(reference).cloned())
    }

    async fn pull(&self, reference: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        self.lock().journal.push(RpcCall::Pull(reference.to_string()));

        let delay = self.pull_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        self.injected("pull", reference)?;

        let mut inner = self.lock();
        if !inner.images.contains_key(reference) {
            let serial = self.image_serial.fetch_add(1, Ordering::Relaxed);
            inner
                .images
                .insert(reference.to_string(), format!("sha256:{:08x}", serial));
        }
        Ok(())
    }

    async fn login(&self, auth: &RegistryAuth) -> Result<()> {
        self.lock().journal.push(RpcCall::Login(auth.name.clone()));
        self.injected("login", &auth.name)?;
        Ok(())
    }

    async fn exec(&self, name: &str, _cmd: &[String]) -> Result<ExecOutput> {
        self.lock().journal.push(RpcCall::Exec(name.to_string()));
        self.injected("exec", name)?;

        let inner = self.lock();
        let container = inner.containers.get(name).ok_or_else(|| self.not_found("container"))?;
        if !container.state.is_running() {
            return Err(OrchestratorError::daemon_status(
                &self.ship,
                409,
                format!("container {} is not running", name),
            ));
        }
        let exit_code = inner.exec_exit_codes.get(name).copied().unwrap_or(0);
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
        })
    }

    async fn logs(&self, name: &str, _follow: bool, tail: Option<usize>) -> Result<LogStream> {
        self.lock().journal.push(RpcCall::Logs(name.to_string()));

        let inner = self.lock();
        if !inner.containers.contains_key(name) {
            return Err(self.not_found("container"));
        }
        let mut lines = inner.log_lines.get(name).cloned().unwrap_or_default();
        if let Some(tail) = tail {
            if lines.len() > tail {
                lines = lines.split_off(lines.len() - tail);
            }
        }
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }
}

/// Provides one [`FakeRuntime`] per ship, creating them on demand.
#[derive(Default)]
pub struct FakeProvider {
    runtimes: Mutex<BTreeMap<String, Arc<FakeRuntime>>>,
}

impl FakeProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fake daemon for a ship name, creating it if needed.
    ///
    /// Tests use this to seed state before running a play.
    pub fn fake(&self, ship: &str) -> Arc<FakeRuntime> {
        let mut runtimes = self
            .runtimes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        runtimes
            .entry(ship.to_string())
            .or_insert_with(|| Arc::new(FakeRuntime::new(ship)))
            .clone()
    }
}

impl RuntimeProvider for FakeProvider {
    fn runtime(&self, ship: &Ship) -> Result<Arc<dyn ContainerRuntime>> {
        Ok(self.fake(&ship.name))
    }
}
