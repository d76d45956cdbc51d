//! Per-container task execution: the container state machine.
//!
//! A task drives one container from its observed state to the target state
//! of the play's action, confirming transitions through lifecycle checks.
//! Tasks are idempotent: a container already at its target reports
//! `already` and issues no mutating RPC. Errors are caught at the task
//! boundary and recorded as the container's result; they never unwind the
//! scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use armada_core::container::ContainerSpec;
use armada_core::environment::Environment;
use armada_core::graph::Direction;

use crate::error::{FailureKind, OrchestratorError, Result};
use crate::lifecycle::{self, CheckContext, Slot};
use crate::progress::{ProgressReporter, TaskProgress};
use crate::pull::PullCoordinator;
use crate::runtime::{ContainerRuntime, CreateRequest, ObservedState};

/// Attempts made waiting for the daemon to report a state change.
const STATE_WAIT_ATTEMPTS: u32 = 10;

/// Delay between state polls.
const STATE_WAIT_DELAY: Duration = Duration::from_millis(500);

/// An orchestration action over a target set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Make images present on their ships.
    Pull,

    /// Bring containers up and confirm through `running` checks.
    Start {
        /// Pull images even when present.
        refresh_images: bool,
    },

    /// Stop containers: TERM, then KILL after the stop timeout.
    Stop,

    /// Kill containers immediately.
    Kill,

    /// Stop and start containers, optionally on a fresh image.
    Restart {
        /// Pull images before restarting.
        refresh_images: bool,
        /// Keep the existing container when its image is unchanged.
        reuse: bool,
        /// Skip containers whose image is unchanged.
        only_if_changed: bool,
    },

    /// Remove stopped containers and their managed volumes.
    Clean,
}

impl Action {
    /// Returns the action name used in audit events and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Restart { .. } => "restart",
            Self::Clean => "clean",
        }
    }

    /// Returns the dependency traversal direction of the action.
    pub fn direction(&self) -> Direction {
        match self {
            Self::Pull | Self::Start { .. } | Self::Restart { .. } => Direction::Forward,
            Self::Stop | Self::Kill | Self::Clean => Direction::Reverse,
        }
    }
}

/// Terminal result of a container task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The transition was performed.
    Done,

    /// The container already was at the target state.
    Already,

    /// The task failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// One-line diagnostic.
        reason: String,
    },
}

impl TaskOutcome {
    /// Builds the failed outcome for an error.
    pub fn from_error(err: &OrchestratorError) -> Self {
        Self::Failed {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    /// Returns true for failed outcomes.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Already => f.write_str("already"),
            Self::Failed { kind, reason } => write!(f, "failed ({}): {}", kind, reason),
        }
    }
}

/// Cooperative cancellation flag, observed between task stages.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Shared context of one container task.
pub struct TaskContext {
    /// The environment the play operates on.
    pub environment: Arc<Environment>,

    /// The runtime of the container's ship.
    pub runtime: Arc<dyn ContainerRuntime>,

    /// The play-wide pull coordinator.
    pub puller: Arc<PullCoordinator>,

    /// Progress observer.
    pub progress: Arc<dyn ProgressReporter>,

    /// Cancellation flag.
    pub cancel: CancelFlag,
}

impl TaskContext {
    fn stage(&self, container: &str, stage: &str) {
        self.progress.update(
            container,
            TaskProgress::Working {
                stage: stage.to_string(),
            },
        );
    }

    fn check_ctx<'a>(&'a self, spec: &'a ContainerSpec) -> CheckContext<'a> {
        CheckContext {
            environment: &self.environment,
            container: spec,
            runtime: self.runtime.clone(),
        }
    }

    async fn ensure_image(&self, spec: &ContainerSpec, refresh: bool) -> Result<()> {
        let ship = self.environment.ship_of(spec);
        self.puller
            .ensure_image(
                ship,
                self.runtime.clone(),
                &spec.image,
                &self.environment.registries,
                refresh,
            )
            .await
    }
}

/// Runs one action against one container.
pub async fn run(action: &Action, ctx: &TaskContext, spec: &ContainerSpec) -> Result<TaskOutcome> {
    ctx.cancel.check()?;
    match action {
        Action::Pull => pull(ctx, spec).await,
        Action::Start { refresh_images } => start(ctx, spec, *refresh_images).await,
        Action::Stop => stop(ctx, spec).await,
        Action::Kill => kill(ctx, spec).await,
        Action::Restart {
            refresh_images,
            reuse,
            only_if_changed,
        } => restart(ctx, spec, *refresh_images, *reuse, *only_if_changed).await,
        Action::Clean => clean(ctx, spec).await,
    }
}

async fn pull(ctx: &TaskContext, spec: &ContainerSpec) -> Result<TaskOutcome> {
    ctx.stage(&spec.name, "pulling image...");
    ctx.ensure_image(spec, true).await?;
    Ok(TaskOutcome::Done)
}

async fn start(ctx: &TaskContext, spec: &ContainerSpec, refresh: bool) -> Result<TaskOutcome> {
    ctx.stage(&spec.name, "checking container...");
    let status = ctx.runtime.inspect(&spec.name).await?;

    if status.state.is_running() {
        // Confirm the application is actually up before calling it a no-op.
        ctx.stage(&spec.name, "checking service...");
        lifecycle::verify(Slot::Running, &ctx.check_ctx(spec)).await?;
        return Ok(TaskOutcome::Already);
    }

    if refresh || status.state.is_absent() {
        ctx.cancel.check()?;
        ctx.stage(&spec.name, "pulling image...");
        ctx.ensure_image(spec, refresh).await?;
    }

    ctx.cancel.check()?;
    if status.state.is_absent() {
        ctx.stage(&spec.name, "creating container...");
        let request = CreateRequest::from_spec(&ctx.environment, spec);
        ctx.runtime.create(&request).await?;
    }

    ctx.stage(&spec.name, "starting container...");
    ctx.runtime.start(&spec.name).await?;

    ctx.stage(&spec.name, "waiting for container...");
    wait_for_state(ctx, spec, |state| state.is_running()).await?;

    ctx.stage(&spec.name, "waiting for service...");
    lifecycle::verify(Slot::Running, &ctx.check_ctx(spec)).await?;

    Ok(TaskOutcome::Done)
}

async fn stop(ctx: &TaskContext, spec: &ContainerSpec) -> Result<TaskOutcome> {
    ctx.stage(&spec.name, "checking container...");
    let status = ctx.runtime.inspect(&spec.name).await?;
    if !status.state.is_running() {
        return Ok(TaskOutcome::Already);
    }

    ctx.stage(&spec.name, "stopping container...");
    ctx.runtime.stop(&spec.name, spec.stop_timeout_secs).await?;

    ctx.stage(&spec.name, "waiting for service shutdown...");
    lifecycle::verify(Slot::Stopped, &ctx.check_ctx(spec)).await?;

    Ok(TaskOutcome::Done)
}

async fn kill(ctx: &TaskContext, spec: &ContainerSpec) -> Result<TaskOutcome> {
    ctx.stage(&spec.name, "checking container...");
    let status = ctx.runtime.inspect(&spec.name).await?;
    if !status.state.is_running() {
        return Ok(TaskOutcome::Already);
    }

    ctx.stage(&spec.name, "killing container...");
    ctx.runtime.kill(&spec.name, "KILL").await?;
    Ok(TaskOutcome::Done)
}

async fn clean(ctx: &TaskContext, spec: &ContainerSpec) -> Result<TaskOutcome> {
    ctx.stage(&spec.name, "checking container...");
    let status = ctx.runtime.inspect(&spec.name).await?;

    match status.state {
        ObservedState::Absent => Ok(TaskOutcome::Already),
        ObservedState::Running { .. } => Err(OrchestratorError::state(
            &spec.name,
            "cannot clean a running container",
        )),
        _ => {
            ctx.stage(&spec.name, "removing container...");
            ctx.runtime.remove(&spec.name, true).await?;
            Ok(TaskOutcome::Done)
        }
    }
}

async fn restart(
    ctx: &TaskContext,
    spec: &ContainerSpec,
    refresh: bool,
    reuse: bool,
    only_if_changed: bool,
) -> Result<TaskOutcome> {
    ctx.stage(&spec.name, "checking container...");
    let status = ctx.runtime.inspect(&spec.name).await?;

    if refresh {
        ctx.stage(&spec.name, "pulling image...");
        ctx.ensure_image(spec, true).await?;
    }

    let desired_image_id = ctx.runtime.image_id(&spec.image.reference()).await?;
    let unchanged = !status.state.is_absent()
        && desired_image_id.is_some()
        && status.image_id == desired_image_id;

    if only_if_changed && unchanged {
        return Ok(TaskOutcome::Already);
    }

    ctx.cancel.check()?;

    if reuse && unchanged {
        // Same image: plain stop and start of the existing container.
        if status.state.is_running() {
            ctx.stage(&spec.name, "stopping container...");
            ctx.runtime.stop(&spec.name, spec.stop_timeout_secs).await?;
        }
        ctx.stage(&spec.name, "starting container...");
        ctx.runtime.start(&spec.name).await?;
    } else {
        if !status.state.is_absent() {
            if status.state.is_running() {
                ctx.stage(&spec.name, "stopping container...");
                ctx.runtime.stop(&spec.name, spec.stop_timeout_secs).await?;
            }
            ctx.stage(&spec.name, "removing old container...");
            ctx.runtime.remove(&spec.name, false).await?;
        }

        ctx.cancel.check()?;
        ctx.stage(&spec.name, "pulling image...");
        ctx.ensure_image(spec, false).await?;

        ctx.stage(&spec.name, "creating container...");
        let request = CreateRequest::from_spec(&ctx.environment, spec);
        ctx.runtime.create(&request).await?;

        ctx.stage(&spec.name, "starting container...");
        ctx.runtime.start(&spec.name).await?;
    }

    ctx.stage(&spec.name, "waiting for container...");
    wait_for_state(ctx, spec, |state| state.is_running()).await?;

    ctx.stage(&spec.name, "waiting for service...");
    lifecycle::verify(Slot::Running, &ctx.check_ctx(spec)).await?;

    Ok(TaskOutcome::Done)
}

/// Polls the daemon until the container state satisfies the condition.
async fn wait_for_state(
    ctx: &TaskContext,
    spec: &ContainerSpec,
    satisfied: impl Fn(&ObservedState) -> bool,
) -> Result<()> {
    for attempt in 1..=STATE_WAIT_ATTEMPTS {
        let status = ctx.runtime.inspect(&spec.name).await?;
        if satisfied(&status.state) {
            return Ok(());
        }
        if attempt < STATE_WAIT_ATTEMPTS {
            tokio::time::sleep(STATE_WAIT_DELAY).await;
        }
    }

    let ship = &spec.ship;
    Err(OrchestratorError::daemon_reason(
        ship,
        format!("container {} did not reach the expected state", spec.name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use crate::runtime::testing::{FakeRuntime, RpcCall};
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
                vec![Ship::new("alpha", "10.0.0.1")],
                vec![],
                vec![service],
                vec![container],
            )
            .unwrap(),
        )
    }

    fn context(runtime: Arc<FakeRuntime>) -> TaskContext {
        TaskContext {
            environment: environment(),
            runtime,
            puller: Arc::new(PullCoordinator::new()),
            progress: Arc::new(NullProgress),
            cancel: CancelFlag::new(),
        }
    }

    #[tokio::test]
    async fn test_start_creates_and_starts_absent_container() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Start { refresh_images: false }, &ctx, spec)
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Done);

        // Image was absent and therefore pulled.
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Pull(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Create(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Start(_))), 1);
        assert!(runtime.state_of("web-1").unwrap().is_running());
    }

    #[tokio::test]
    async fn test_start_running_container_is_noop() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.seed_running("web-1", "acme/web:1");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Start { refresh_images: false }, &ctx, spec)
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Already);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Create(_))), 0);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Start(_))), 0);
    }

    #[tokio::test]
    async fn test_start_stopped_container_starts_in_place() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.set_image("acme/web:1", "sha256:1");
        runtime.seed_stopped("web-1", "acme/web:1", 0);
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Start { refresh_images: false }, &ctx, spec)
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Create(_))), 0);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Start(_))), 1);
    }

    #[tokio::test]
    async fn test_stop_uses_stop_timeout() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.seed_running("web-1", "acme/web:1");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Stop, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(
            runtime.count(|c| matches!(c, RpcCall::Stop(_, 10))),
            1
        );
    }

    #[tokio::test]
    async fn test_stop_not_running_is_noop() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Stop, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Already);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Stop(_, _))), 0);
    }

    #[tokio::test]
    async fn test_kill_sends_kill_signal() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.seed_running("web-1", "acme/web:1");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Kill, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(
            runtime.count(|c| matches!(c, RpcCall::Kill(_, signal) if signal == "KILL")),
            1
        );
    }

    #[tokio::test]
    async fn test_clean_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.seed_stopped("web-1", "acme/web:1", 0);
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let outcome = run(&Action::Clean, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(
            runtime.count(|c| matches!(c, RpcCall::Remove(_, true))),
            1
        );

        // Second run: nothing left to remove.
        let outcome = run(&Action::Clean, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Already);
        assert_eq!(
            runtime.count(|c| matches!(c, RpcCall::Remove(_, _))),
            1
        );
    }

    #[tokio::test]
    async fn test_clean_rejects_running_container() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.seed_running("web-1", "acme/web:1");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let err = run(&Action::Clean, &ctx, spec).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::State);
    }

    #[tokio::test]
    async fn test_restart_reuse_unchanged_image_keeps_container() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.set_image("acme/web:1", "sha256:1");
        runtime.seed_running("web-1", "acme/web:1");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let action = Action::Restart {
            refresh_images: false,
            reuse: true,
            only_if_changed: false,
        };
        let outcome = run(&action, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Remove(_, _))), 0);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Create(_))), 0);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Stop(_, _))), 1);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Start(_))), 1);
    }

    #[tokio::test]
    async fn test_restart_changed_image_recreates() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.set_image("acme/web:1", "sha256:old");
        runtime.seed_running("web-1", "acme/web:1");
        // The tag now points at a different image than the container uses.
        runtime.set_image("acme/web:1", "sha256:new");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let action = Action::Restart {
            refresh_images: false,
            reuse: true,
            only_if_changed: false,
        };
        let outcome = run(&action, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Remove(_, _))), 1);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Create(_))), 1);
    }

    #[tokio::test]
    async fn test_restart_only_if_changed_skips_unchanged() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.set_image("acme/web:1", "sha256:1");
        runtime.seed_running("web-1", "acme/web:1");
        let ctx = context(runtime.clone());
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let action = Action::Restart {
            refresh_images: false,
            reuse: false,
            only_if_changed: true,
        };
        let outcome = run(&action, &ctx, spec).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Already);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Stop(_, _))), 0);
    }

    #[tokio::test]
    async fn test_cancelled_task_fails_with_cancelled() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        let ctx = context(runtime.clone());
        ctx.cancel.cancel();
        let env = ctx.environment.clone();
        let spec = env.container("web-1").unwrap();

        let err = run(&Action::Start { refresh_images: false }, &ctx, spec)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
