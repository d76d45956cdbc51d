//! Task progress observation.
//!
//! The scheduler reports per-container task state through a
//! [`ProgressReporter`]; all rendering lives outside the engine. For any
//! one container the sequence is totally ordered: `Pending`, zero or more
//! `Working` stages, then exactly one `Finished`. Reporters must be safe
//! for concurrent notifications about different containers.

use crate::task::TaskOutcome;

/// A per-container task status update.
#[derive(Debug, Clone)]
pub enum TaskProgress {
    /// Queued, waiting for a worker slot or its dependency layer.
    Pending,

    /// In flight, with a short stage description.
    Working {
        /// What the task is doing (`pulling image...`, `starting...`).
        stage: String,
    },

    /// Terminal result.
    Finished(TaskOutcome),
}

/// Observer for task status updates.
pub trait ProgressReporter: Send + Sync {
    /// Receives a status update for a container.
    fn update(&self, container: &str, progress: TaskProgress);
}

/// A reporter that drops every update.
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn update(&self, _container: &str, _progress: TaskProgress) {}
}

/// A reporter that logs updates through `tracing`.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn update(&self, container: &str, progress: TaskProgress) {
        match progress {
            TaskProgress::Pending => {
                tracing::debug!(container = %container, "waiting...");
            }
            TaskProgress::Working { stage } => {
                tracing::info!(container = %container, "{}", stage);
            }
            TaskProgress::Finished(outcome) => {
                tracing::info!(container = %container, outcome = %outcome, "task finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Reporter capturing updates for assertions.
    pub struct RecordingProgress {
        updates: Mutex<Vec<(String, String)>>,
    }

    impl RecordingProgress {
        pub fn new() -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
            }
        }

        pub fn updates(&self) -> Vec<(String, String)> {
            self.updates.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingProgress {
        fn update(&self, container: &str, progress: TaskProgress) {
            let label = match progress {
                TaskProgress::Pending => "pending".to_string(),
                TaskProgress::Working { stage } => stage,
                TaskProgress::Finished(outcome) => format!("finished: {}", outcome),
            };
            self.updates
                .lock()
                .unwrap()
                .push((container.to_string(), label));
        }
    }

    #[test]
    fn test_recording_reporter() {
        let reporter = RecordingProgress::new();
        reporter.update("web-1", TaskProgress::Pending);
        reporter.update(
            "web-1",
            TaskProgress::Working {
                stage: "starting...".to_string(),
            },
        );
        let updates = reporter.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1, "pending");
    }
}
