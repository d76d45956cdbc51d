//! Error types for orchestration operations.
//!
//! Errors are classified by kind: configuration errors are fatal and happen
//! before any action, everything else is caught at the task boundary,
//! recorded in the per-container result, and never unwinds the scheduler.

use std::sync::Arc;

use thiserror::Error;

use armada_core::ConfigError;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Classification of a task failure, as reported in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Configuration problem.
    Config,
    /// Daemon RPC or transport failure.
    Daemon,
    /// Image pull or registry login failure after retries.
    Image,
    /// Lifecycle check budget exhausted.
    Lifecycle,
    /// Illegal transition request.
    State,
    /// Interrupted before completion.
    Cancelled,
    /// Local I/O failure.
    Io,
}

impl FailureKind {
    /// Returns the short kind label used in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Daemon => "daemon",
            Self::Image => "image",
            Self::Lifecycle => "lifecycle",
            Self::State => "state",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur while driving containers.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration error, fatal before any action.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Daemon RPC failure.
    #[error("daemon error on {ship}: {reason}")]
    Daemon {
        /// The ship whose daemon failed.
        ship: String,
        /// The failure description.
        reason: String,
        /// HTTP status of the daemon response, when available.
        status: Option<u16>,
    },

    /// Image pull or registry login failure.
    #[error("image {image}: {reason}")]
    Image {
        /// The image that failed.
        image: String,
        /// The failure description.
        reason: String,
    },

    /// Lifecycle check budget exhausted.
    #[error("lifecycle {slot} checks failed for {container}: {reason}")]
    LifecycleTimeout {
        /// The container the checks gated.
        container: String,
        /// The lifecycle slot.
        slot: &'static str,
        /// What gave up.
        reason: String,
    },

    /// Illegal transition request.
    #[error("invalid operation on {container}: {reason}")]
    State {
        /// The container.
        container: String,
        /// Why the operation is illegal.
        reason: String,
    },

    /// Interrupted before completion.
    #[error("cancelled")]
    Cancelled,

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure shared between coalesced waiters.
    #[error(transparent)]
    Shared(Arc<OrchestratorError>),
}

impl OrchestratorError {
    /// Creates a daemon error from a bollard failure.
    pub fn daemon(ship: impl Into<String>, err: &bollard::errors::Error) -> Self {
        let status = match err {
            bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
                Some(*status_code)
            }
            _ => None,
        };
        Self::Daemon {
            ship: ship.into(),
            reason: err.to_string(),
            status,
        }
    }

    /// Creates a daemon error from a plain reason.
    pub fn daemon_reason(ship: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Daemon {
            ship: ship.into(),
            reason: reason.into(),
            status: None,
        }
    }

    /// Creates a daemon error carrying an HTTP status.
    pub fn daemon_status(ship: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self::Daemon {
            ship: ship.into(),
            reason: reason.into(),
            status: Some(status),
        }
    }

    /// Creates an image error.
    pub fn image(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a lifecycle timeout error.
    pub fn lifecycle(
        container: impl Into<String>,
        slot: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::LifecycleTimeout {
            container: container.into(),
            slot,
            reason: reason.into(),
        }
    }

    /// Creates a state error.
    pub fn state(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::State {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Returns the failure classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) => FailureKind::Config,
            Self::Daemon { .. } => FailureKind::Daemon,
            Self::Image { .. } => FailureKind::Image,
            Self::LifecycleTimeout { .. } => FailureKind::Lifecycle,
            Self::State { .. } => FailureKind::State,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Io(_) => FailureKind::Io,
            Self::Shared(inner) => inner.kind(),
        }
    }

    /// Returns the HTTP status carried by a daemon error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Daemon { status, .. } => *status,
            Self::Shared(inner) => inner.http_status(),
            _ => None,
        }
    }

    /// Returns true when the error is a daemon 404.
    pub fn is_not_found(&self) -> bool {
        self.http_status() == Some(404)
    }

    /// Returns true when the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), FailureKind::Cancelled)
    }
}
