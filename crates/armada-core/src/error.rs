//! Error types for the core entity model.
//!
//! Everything in this module is a configuration error: a problem with the
//! environment description that is detected before any action is taken
//! against a Docker daemon.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while building or validating an environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unsupported environment document schema version.
    #[error("unsupported environment schema version {0}")]
    UnsupportedSchema(u32),

    /// A name is used more than once within its namespace.
    #[error("duplicate {kind} name: {name}")]
    DuplicateName {
        /// The kind of entity (ship, service, container).
        kind: &'static str,
        /// The offending name.
        name: String,
    },

    /// A container references a ship that is not defined.
    #[error("container {container} placed on unknown ship {ship}")]
    UnknownShip {
        /// The referencing container.
        container: String,
        /// The missing ship name.
        ship: String,
    },

    /// A service dependency does not resolve to a defined service.
    #[error("service {service} depends on unknown service {dependency}")]
    UnknownDependency {
        /// The referencing service.
        service: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// A selection target is neither a service nor a container.
    #[error("{0} is neither a service nor a container")]
    UnknownTarget(String),

    /// The hard dependency graph contains a cycle.
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// A port specification could not be parsed.
    #[error("invalid port spec for port {name}: {reason}")]
    InvalidPortSpec {
        /// The port name.
        name: String,
        /// Why the spec was rejected.
        reason: String,
    },

    /// An image reference could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidImage(String),

    /// A resource limit value could not be parsed.
    #[error("invalid {limit} limit {value:?}")]
    InvalidLimit {
        /// The limit kind (memory, swap, cpu).
        limit: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A `volumes_from` reference is invalid.
    #[error("container {container} takes volumes from {volume_source}: {reason}")]
    InvalidVolumesFrom {
        /// The referencing container.
        container: String,
        /// The volume source container.
        volume_source: String,
        /// Why the reference was rejected.
        reason: String,
    },

    /// A lifecycle check is misconfigured.
    #[error("invalid lifecycle check for {container}: {reason}")]
    InvalidLifecycleCheck {
        /// The container carrying the check.
        container: String,
        /// Why the check was rejected.
        reason: String,
    },

    /// A glob filter pattern could not be compiled.
    #[error("invalid filter pattern {0:?}")]
    InvalidFilter(String),

    /// A ship declaration cannot be used.
    #[error("ship {ship}: {reason}")]
    InvalidShip {
        /// The ship name.
        ship: String,
        /// Why the declaration was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a duplicate name error.
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    /// Creates an unknown ship error.
    pub fn unknown_ship(container: impl Into<String>, ship: impl Into<String>) -> Self {
        Self::UnknownShip {
            container: container.into(),
            ship: ship.into(),
        }
    }

    /// Creates an unknown dependency error.
    pub fn unknown_dependency(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    /// Creates an invalid port spec error.
    pub fn invalid_port(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPortSpec {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid `volumes_from` error.
    pub fn invalid_volumes_from(
        container: impl Into<String>,
        volume_source: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidVolumesFrom {
            container: container.into(),
            volume_source: volume_source.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid lifecycle check error.
    pub fn invalid_check(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLifecycleCheck {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid ship error.
    pub fn invalid_ship(ship: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidShip {
            ship: ship.into(),
            reason: reason.into(),
        }
    }
}
