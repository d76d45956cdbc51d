//! Audit trail of orchestration plays.
//!
//! Auditors observe plays at four points: play start, per-container action
//! start and end, and play end. Sinks are registered with an
//! `ignore_errors` flag; a failing sink with the flag set is logged and
//! never aborts the play.

use tracing::warn;

use crate::error::Result;
use crate::task::TaskOutcome;

/// Aggregate results of a finished play.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaySummary {
    /// Tasks that performed their transition.
    pub done: usize,

    /// Tasks that were no-ops.
    pub already: usize,

    /// Tasks that failed.
    pub failed: usize,
}

impl std::fmt::Display for PlaySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} done, {} already, {} failed",
            self.done, self.already, self.failed
        )
    }
}

/// Observer of play and container transitions.
pub trait Auditor: Send + Sync {
    /// A play is starting over the given targets.
    fn play_started(&self, action: &str, targets: &[String]) -> Result<()>;

    /// A container action is starting.
    fn container_started(&self, action: &str, container: &str) -> Result<()>;

    /// A container action finished with the given result.
    fn container_ended(&self, action: &str, container: &str, outcome: &TaskOutcome) -> Result<()>;

    /// The play finished.
    fn play_ended(&self, action: &str, summary: &PlaySummary) -> Result<()>;
}

struct Sink {
    auditor: Box<dyn Auditor>,
    ignore_errors: bool,
}

/// Dispatches audit events to every registered sink.
#[derive(Default)]
pub struct AuditTrail {
    sinks: Vec<Sink>,
}

impl AuditTrail {
    /// Creates an empty trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink.
    pub fn register(&mut self, auditor: Box<dyn Auditor>, ignore_errors: bool) {
        self.sinks.push(Sink {
            auditor,
            ignore_errors,
        });
    }

    fn dispatch(&self, event: impl Fn(&dyn Auditor) -> Result<()>) -> Result<()> {
        for sink in &self.sinks {
            match event(sink.auditor.as_ref()) {
                Ok(()) => {}
                Err(err) if sink.ignore_errors => {
                    warn!(error = %err, "audit sink failed (ignored)");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Notifies sinks that a play started.
    pub fn play_started(&self, action: &str, targets: &[String]) -> Result<()> {
        self.dispatch(|auditor| auditor.play_started(action, targets))
    }

    /// Notifies sinks that a container action started.
    pub fn container_started(&self, action: &str, container: &str) -> Result<()> {
        self.dispatch(|auditor| auditor.container_started(action, container))
    }

    /// Notifies sinks of a container's terminal result.
    pub fn container_ended(
        &self,
        action: &str,
        container: &str,
        outcome: &TaskOutcome,
    ) -> Result<()> {
        self.dispatch(|auditor| auditor.container_ended(action, container, outcome))
    }

    /// Notifies sinks that the play finished.
    pub fn play_ended(&self, action: &str, summary: &PlaySummary) -> Result<()> {
        self.dispatch(|auditor| auditor.play_ended(action, summary))
    }
}

/// Auditor logging through `tracing`.
pub struct TracingAuditor;

impl Auditor for TracingAuditor {
    fn play_started(&self, action: &str, targets: &[String]) -> Result<()> {
        tracing::info!(action = %action, targets = %targets.join(", "), "play started");
        Ok(())
    }

    fn container_started(&self, action: &str, container: &str) -> Result<()> {
        tracing::debug!(action = %action, container = %container, "container action started");
        Ok(())
    }

    fn container_ended(&self, action: &str, container: &str, outcome: &TaskOutcome) -> Result<()> {
        tracing::info!(action = %action, container = %container, outcome = %outcome, "container action ended");
        Ok(())
    }

    fn play_ended(&self, action: &str, summary: &PlaySummary) -> Result<()> {
        tracing::info!(action = %action, summary = %summary, "play ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingAuditor {
        calls: Arc<AtomicUsize>,
    }

    impl Auditor for FailingAuditor {
        fn play_started(&self, _action: &str, _targets: &[String]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(OrchestratorError::daemon_reason("sink", "unreachable"))
        }

        fn container_started(&self, _action: &str, _container: &str) -> Result<()> {
            Ok(())
        }

        fn container_ended(
            &self,
            _action: &str,
            _container: &str,
            _outcome: &TaskOutcome,
        ) -> Result<()> {
            Ok(())
        }

        fn play_ended(&self, _action: &str, _summary: &PlaySummary) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ignored_sink_failure_does_not_propagate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut trail = AuditTrail::new();
        trail.register(
            Box::new(FailingAuditor {
                calls: calls.clone(),
            }),
            true,
        );

        assert!(trail.play_started("start", &[]).is_ok());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_strict_sink_failure_propagates() {
        let mut trail = AuditTrail::new();
        trail.register(
            Box::new(FailingAuditor {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            false,
        );

        assert!(trail.play_started("start", &[]).is_err());
    }

    #[test]
    fn test_summary_display() {
        let summary = PlaySummary {
            done: 2,
            already: 1,
            failed: 0,
        };
        assert_eq!(summary.to_string(), "2 done, 1 already, 0 failed");
    }
}
