//! Dependency-aware, parallel container orchestration for Armada.
//!
//! This crate is the engine: it consumes the validated environment built by
//! `armada-loader` and executes orchestration actions (pull, start, stop,
//! kill, restart, clean, status, logs) across a fleet of Docker hosts,
//! respecting dependency order, honoring per-play concurrency caps, and
//! confirming every transition through lifecycle checks.
//!
//! # Architecture
//!
//! - [`runtime`]: the per-ship daemon adapter. [`runtime::ContainerRuntime`]
//!   is the only surface that touches the wire; bollard implements it for
//!   real daemons, [`runtime::testing::FakeRuntime`] for tests.
//! - [`task`]: the per-container state machine that reconciles observed
//!   daemon state against the target state of an action.
//! - [`lifecycle`]: tcp/http/exec/rexec/sleep probes that gate transition
//!   success.
//! - [`pull`]: image management, with `(ship, image)` pull coalescing and
//!   per-registry login serialization.
//! - [`play`]: the layered scheduler. Layers run strictly in order; within
//!   a layer, tasks share a bounded worker pool.
//! - [`status`] and [`logs`]: the read-only operations.
//! - [`audit`] and [`progress`]: observer surfaces; all rendering and
//!   notification live outside this crate.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use armada_orchestrator::{Action, Play, PlayOptions};
//! use armada_orchestrator::runtime::docker::DockerProvider;
//!
//! # async fn example(environment: Arc<armada_core::Environment>) -> armada_orchestrator::Result<()> {
//! let play = Play::new(environment, Arc::new(DockerProvider::new()));
//! let report = play
//!     .run(
//!         Action::Start { refresh_images: false },
//!         &["kafka".to_string()],
//!         &PlayOptions {
//!             with_dependencies: true,
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! assert!(!report.failed());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod error;
pub mod lifecycle;
pub mod logs;
pub mod play;
pub mod progress;
pub mod pull;
pub mod runtime;
pub mod status;
pub mod task;

pub use audit::{AuditTrail, Auditor, PlaySummary, TracingAuditor};
pub use error::{FailureKind, OrchestratorError, Result};
pub use play::{Play, PlayOptions, PlayReport, TaskResult};
pub use progress::{ProgressReporter, TaskProgress, TracingProgress};
pub use pull::PullCoordinator;
pub use status::{status, StatusOptions, StatusRow};
pub use task::{Action, CancelFlag, TaskOutcome};
