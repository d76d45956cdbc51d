//! Entity model for the Armada container orchestrator.
//!
//! This crate holds the static description a play operates on: ships
//! (Docker hosts), registries, services, container instances, named ports
//! and lifecycle check configuration, together with the service dependency
//! graph and the per-container environment projection.
//!
//! Everything here is built once by the loader, validated, and treated as
//! immutable for the duration of a play. No I/O happens in this crate; the
//! orchestrator consumes these types to drive daemons, and the loader
//! produces them from the YAML environment document.
//!
//! # Overview
//!
//! - [`environment::Environment`]: the validated aggregate and target
//!   selection.
//! - [`graph`]: hard/soft dependency edges, cycle detection, and the
//!   expansion of a selection into ordered execution layers.
//! - [`discovery`]: the environment variable projection that realizes
//!   service discovery between dependents.
//! - [`ship`], [`service`], [`container`], [`port`], [`registry`],
//!   [`image`], [`checks`], [`env`]: the individual entity types.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod checks;
pub mod container;
pub mod discovery;
pub mod env;
pub mod environment;
pub mod error;
pub mod graph;
pub mod image;
pub mod port;
pub mod registry;
pub mod service;
pub mod ship;

pub use container::{ContainerSpec, Limits, RestartPolicy, VolumeBinding};
pub use environment::{Environment, Selection, SelectionFilters};
pub use error::{ConfigError, Result};
pub use graph::{DependencyGraph, Direction, Layers};
pub use image::ImageRef;
pub use port::{PortSpec, Protocol};
pub use registry::{PullRetryPolicy, RegistryAuth};
pub use service::Service;
pub use ship::{Ship, ShipDefaults, Transport};
