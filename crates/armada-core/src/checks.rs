//! Lifecycle check configuration.
//!
//! Checks are declared on services and instances and gate the success of
//! container transitions: the `running` slot gates start and restart, the
//! `stopped` slot gates stop. This module only carries the typed
//! configuration records; execution lives in the orchestrator, where each
//! check type registers its prober keyed by the `type` tag.

use serde::{Deserialize, Serialize};

/// Default probe budget, in seconds, when none is configured.
pub const DEFAULT_MAX_WAIT_SECS: u64 = 300;

/// Retry budget of a check.
///
/// Attempts are made at a one second cadence, so a `max_wait` of N seconds
/// allows N attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckBudget {
    /// Keep attempting for up to this many seconds.
    MaxWait(u64),
    /// Make exactly this many attempts.
    Attempts(u32),
}

impl CheckBudget {
    /// Returns the number of attempts this budget allows.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::MaxWait(secs) => (*secs).max(1) as u32,
            Self::Attempts(n) => (*n).max(1),
        }
    }

    fn from_fields(max_wait: Option<u64>, attempts: Option<u32>) -> Self {
        match (attempts, max_wait) {
            (Some(n), _) => Self::Attempts(n),
            (None, Some(secs)) => Self::MaxWait(secs),
            (None, None) => Self::MaxWait(DEFAULT_MAX_WAIT_SECS),
        }
    }
}

fn default_http_path() -> String {
    "/".to_string()
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_http_scheme() -> String {
    "http".to_string()
}

/// A single lifecycle check, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckDef {
    /// Open a TCP connection to a named (or literal) port.
    Tcp {
        /// Port name, or a literal port number as a string.
        port: String,
        /// Host to probe; defaults to the ship's address.
        #[serde(default)]
        host: Option<String>,
        /// Budget in seconds.
        #[serde(default)]
        max_wait: Option<u64>,
        /// Budget in attempts; wins over `max_wait`.
        #[serde(default)]
        attempts: Option<u32>,
    },

    /// Send an HTTP request and expect a 200 (or a body match).
    Http {
        /// Port name, or a literal port number as a string.
        port: String,
        /// Host to probe; defaults to the ship's address.
        #[serde(default)]
        host: Option<String>,
        /// Request path.
        #[serde(default = "default_http_path")]
        path: String,
        /// Request method.
        #[serde(default = "default_http_method")]
        method: String,
        /// URL scheme.
        #[serde(default = "default_http_scheme")]
        scheme: String,
        /// When set, success is a body match instead of status 200.
        #[serde(default)]
        match_regex: Option<String>,
        /// Budget in seconds.
        #[serde(default)]
        max_wait: Option<u64>,
        /// Budget in attempts; wins over `max_wait`.
        #[serde(default)]
        attempts: Option<u32>,
    },

    /// Run a command on the controller host; exit 0 is success. The child
    /// receives the environment the container itself was projected.
    Exec {
        /// Shell command to run.
        command: String,
        /// Budget in seconds.
        #[serde(default)]
        max_wait: Option<u64>,
        /// Budget in attempts; wins over `max_wait`.
        #[serde(default)]
        attempts: Option<u32>,
    },

    /// Run a command inside the container; exit 0 is success.
    Rexec {
        /// Shell command to run.
        command: String,
        /// Budget in seconds.
        #[serde(default)]
        max_wait: Option<u64>,
        /// Budget in attempts; wins over `max_wait`.
        #[serde(default)]
        attempts: Option<u32>,
    },

    /// Wait a fixed number of seconds; always succeeds.
    Sleep {
        /// Seconds to wait.
        wait: u64,
    },
}

impl CheckDef {
    /// Returns the retry budget of this check.
    pub fn budget(&self) -> CheckBudget {
        match self {
            Self::Tcp {
                max_wait, attempts, ..
            }
            | Self::Http {
                max_wait, attempts, ..
            }
            | Self::Exec {
                max_wait, attempts, ..
            }
            | Self::Rexec {
                max_wait, attempts, ..
            } => CheckBudget::from_fields(*max_wait, *attempts),
            Self::Sleep { .. } => CheckBudget::Attempts(1),
        }
    }

    /// Returns the check type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Http { .. } => "http",
            Self::Exec { .. } => "exec",
            Self::Rexec { .. } => "rexec",
            Self::Sleep { .. } => "sleep",
        }
    }
}

/// Checks grouped by the lifecycle slot they gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleChecks {
    /// Checks gating start/restart success.
    #[serde(default)]
    pub running: Vec<CheckDef>,

    /// Checks gating stop success.
    #[serde(default)]
    pub stopped: Vec<CheckDef>,
}

impl LifecycleChecks {
    /// Returns true when no checks are configured in either slot.
    pub fn is_empty(&self) -> bool {
        self.running.is_empty() && self.stopped.is_empty()
    }

    /// Merges service-level checks with instance-level checks.
    ///
    /// Both sets apply; instance checks run in addition to the service's.
    pub fn merged(service: &Self, instance: &Self) -> Self {
        let mut running = service.running.clone();
        running.extend(instance.running.iter().cloned());
        let mut stopped = service.stopped.clone();
        stopped.extend(instance.stopped.iter().cloned());
        Self { running, stopped }
    }
}
