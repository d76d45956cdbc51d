//! The orchestration scheduler.
//!
//! A play executes one action over a selected set of containers. The
//! selection is partitioned into layers by longest-path depth in the hard
//! dependency graph (dependencies first, or dependents first for the
//! reverse actions). Layers run strictly in sequence; within a layer,
//! tasks run in a worker pool bounded by the concurrency cap.
//!
//! A failing task never cancels its peers: the layer is drained, then the
//! play aborts before the next layer starts and the remaining containers
//! are recorded as cancelled. External cancellation behaves the same way,
//! observed at stage boundaries inside tasks and between layers here.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use armada_core::environment::{Environment, Selection, SelectionFilters};
use armada_core::graph::layered_order;

use crate::audit::{AuditTrail, PlaySummary};
use crate::error::{FailureKind, OrchestratorError, Result};
use crate::progress::{NullProgress, ProgressReporter, TaskProgress};
use crate::pull::PullCoordinator;
use crate::runtime::RuntimeProvider;
use crate::task::{self, Action, CancelFlag, TaskContext, TaskOutcome};

/// Options of a play run.
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Worker pool size; `None` is unbounded.
    pub concurrency: Option<usize>,

    /// Transitively include hard dependencies of the targets.
    pub with_dependencies: bool,

    /// Collapse all selected containers into a single layer.
    pub ignore_order: bool,

    /// Glob filters applied to the selection.
    pub filters: SelectionFilters,
}

/// Terminal result of one container task within a play.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Container name.
    pub container: String,

    /// Owning service.
    pub service: String,

    /// Target ship.
    pub ship: String,

    /// The outcome.
    pub outcome: TaskOutcome,
}

/// The results of a finished play.
#[derive(Debug, Clone)]
pub struct PlayReport {
    /// The action that ran.
    pub action: String,

    /// Per-container results, sorted by `(service, container)`.
    pub results: Vec<TaskResult>,
}

impl PlayReport {
    /// Returns true when any container failed.
    pub fn failed(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failure())
    }

    /// Returns the result of a container, if it was part of the play.
    pub fn result_of(&self, container: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.container == container)
    }

    /// Aggregates the per-container outcomes.
    pub fn summary(&self) -> PlaySummary {
        let mut summary = PlaySummary::default();
        for result in &self.results {
            match &result.outcome {
                TaskOutcome::Done => summary.done += 1,
                TaskOutcome::Already => summary.already += 1,
                TaskOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// The layered parallel executor.
pub struct Play {
    environment: Arc<Environment>,
    provider: Arc<dyn RuntimeProvider>,
    progress: Arc<dyn ProgressReporter>,
    audit: Arc<AuditTrail>,
    cancel: CancelFlag,
}

impl Play {
    /// Creates a play over an environment.
    pub fn new(environment: Arc<Environment>, provider: Arc<dyn RuntimeProvider>) -> Self {
        Self {
            environment,
            provider,
            progress: Arc::new(NullProgress),
            audit: Arc::new(AuditTrail::new()),
            cancel: CancelFlag::new(),
        }
    }

    /// Sets the progress observer.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Sets the audit trail.
    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Arc::new(audit);
        self
    }

    /// Returns the cancellation flag; raising it stops new layers from
    /// starting while in-flight tasks drain.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Runs an action over the resolved target set.
    ///
    /// Configuration problems (unknown targets, bad filters) surface as
    /// errors before any daemon is contacted. Task failures do not: they
    /// are recorded in the report, and [`PlayReport::failed`] reflects
    /// them.
    pub async fn run(
        &self,
        action: Action,
        targets: &[String],
        options: &PlayOptions,
    ) -> Result<PlayReport> {
        let selection = self.environment.select(
            targets,
            &Selection {
                with_dependencies: options.with_dependencies,
                filters: options.filters.clone(),
            },
        )?;

        let pairs: Vec<(&str, &str)> = selection
            .iter()
            .map(|c| (c.name.as_str(), c.service.as_str()))
            .collect();
        let layers = layered_order(
            self.environment.graph(),
            &pairs,
            action.direction(),
            options.ignore_order,
        );

        let all_names: Vec<String> = layers.iter().cloned().collect();
        self.audit.play_started(action.name(), &all_names)?;

        info!(
            action = action.name(),
            containers = layers.container_count(),
            layers = layers.layers.len(),
            "play starting"
        );

        let total = layers.container_count();
        let semaphore = Arc::new(Semaphore::new(options.concurrency.unwrap_or(total.max(1))));
        let puller = Arc::new(PullCoordinator::new());

        let mut results: Vec<TaskResult> = Vec::with_capacity(total);
        let mut abort = false;

        for layer in &layers.layers {
            if abort || self.cancel.is_cancelled() {
                let reason = if abort {
                    "play aborted after earlier failure"
                } else {
                    "cancelled"
                };
                for name in layer {
                    let spec = &self.environment.containers[name];
                    let outcome = TaskOutcome::Failed {
                        kind: FailureKind::Cancelled,
                        reason: reason.to_string(),
                    };
                    self.progress
                        .update(name, TaskProgress::Finished(outcome.clone()));
                    self.audit.container_ended(action.name(), name, &outcome)?;
                    results.push(TaskResult {
                        container: spec.name.clone(),
                        service: spec.service.clone(),
                        ship: spec.ship.clone(),
                        outcome,
                    });
                }
                continue;
            }

            let failures_before = results.iter().filter(|r| r.outcome.is_failure()).count();
            let mut tasks = JoinSet::new();

            for name in layer {
                let spec = self.environment.containers[name].clone();
                self.progress.update(name, TaskProgress::Pending);
                self.audit.container_started(action.name(), name)?;

                let runtime = match self.provider.runtime(self.environment.ship_of(&spec)) {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        warn!(container = %name, error = %err, "no runtime for ship");
                        let outcome = TaskOutcome::from_error(&err);
                        self.progress
                            .update(name, TaskProgress::Finished(outcome.clone()));
                        self.audit.container_ended(action.name(), name, &outcome)?;
                        results.push(TaskResult {
                            container: spec.name.clone(),
                            service: spec.service.clone(),
                            ship: spec.ship.clone(),
                            outcome,
                        });
                        continue;
                    }
                };

                let ctx = TaskContext {
                    environment: self.environment.clone(),
                    runtime,
                    puller: puller.clone(),
                    progress: self.progress.clone(),
                    cancel: self.cancel.clone(),
                };
                let action = action.clone();
                let semaphore = semaphore.clone();

                tasks.spawn(async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => match task::run(&action, &ctx, &spec).await {
                            Ok(outcome) => outcome,
                            Err(err) => TaskOutcome::from_error(&err),
                        },
                        Err(_) => TaskOutcome::Failed {
                            kind: FailureKind::Cancelled,
                            reason: "worker pool closed".to_string(),
                        },
                    };
                    (spec.name, spec.service, spec.ship, outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (container, service, ship, outcome) = joined.map_err(|err| {
                    OrchestratorError::daemon_reason("scheduler", format!("task panicked: {err}"))
                })?;

                self.progress
                    .update(&container, TaskProgress::Finished(outcome.clone()));
                self.audit.container_ended(action.name(), &container, &outcome)?;
                results.push(TaskResult {
                    container,
                    service,
                    ship,
                    outcome,
                });
            }

            let failures_after = results.iter().filter(|r| r.outcome.is_failure()).count();
            if failures_after > failures_before {
                abort = true;
            }
        }

        results.sort_by(|a, b| (&a.service, &a.container).cmp(&(&b.service, &b.container)));

        let report = PlayReport {
            action: action.name().to_string(),
            results,
        };
        self.audit.play_ended(action.name(), &report.summary())?;

        info!(action = action.name(), summary = %report.summary(), "play finished");
        Ok(report)
    }
}
