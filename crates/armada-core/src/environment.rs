//! The validated environment aggregate.
//!
//! An [`Environment`] is the fully resolved, immutable description a play
//! operates on: ships, registries, services and container instances, plus
//! the dependency graph derived from them. Construction performs all
//! configuration validation; every error surfaced here is fatal and happens
//! before any daemon is contacted.

use std::collections::BTreeMap;

use regex::Regex;

use crate::container::ContainerSpec;
use crate::error::{ConfigError, Result};
use crate::graph::DependencyGraph;
use crate::registry::RegistryAuth;
use crate::service::Service;
use crate::ship::Ship;

/// Glob filters applied to a selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilters {
    /// Glob over container names (`-C`).
    pub container_pattern: Option<String>,

    /// Glob over ship names (`-S`).
    pub ship_pattern: Option<String>,
}

/// Options controlling target selection for a play.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Transitively include hard dependencies of the targets.
    pub with_dependencies: bool,

    /// Glob filters applied to the final set.
    pub filters: SelectionFilters,
}

/// The complete, validated orchestration environment.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Environment name, injected into every container.
    pub name: String,

    /// Ships by name.
    pub ships: BTreeMap<String, Ship>,

    /// Registry credentials.
    pub registries: Vec<RegistryAuth>,

    /// Services by name.
    pub services: BTreeMap<String, Service>,

    /// Container instances by name.
    pub containers: BTreeMap<String, ContainerSpec>,

    graph: DependencyGraph,
}

impl Environment {
    /// Builds and validates an environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when names collide, references do not
    /// resolve, `volumes_from` crosses ships, or the hard dependency graph
    /// contains a cycle.
    pub fn new(
        name: impl Into<String>,
        ships: Vec<Ship>,
        registries: Vec<RegistryAuth>,
        services: Vec<Service>,
        containers: Vec<ContainerSpec>,
    ) -> Result<Self> {
        let mut ship_map = BTreeMap::new();
        for ship in ships {
            let key = ship.name.clone();
            if ship_map.insert(key.clone(), ship).is_some() {
                return Err(ConfigError::duplicate("ship", key));
            }
        }

        let mut service_map: BTreeMap<String, Service> = BTreeMap::new();
        for service in services {
            let key = service.name.clone();
            if service_map.insert(key.clone(), service).is_some() {
                return Err(ConfigError::duplicate("service", key));
            }
        }

        let mut container_map: BTreeMap<String, ContainerSpec> = BTreeMap::new();
        for container in containers {
            let key = container.name.clone();
            if container_map.insert(key.clone(), container).is_some() {
                return Err(ConfigError::duplicate("container", key));
            }
        }

        // Reference resolution.
        for service in service_map.values() {
            for dep in service.info_dependencies() {
                if !service_map.contains_key(dep) {
                    return Err(ConfigError::unknown_dependency(&service.name, dep));
                }
            }
        }
        for container in container_map.values() {
            if !ship_map.contains_key(&container.ship) {
                return Err(ConfigError::unknown_ship(&container.name, &container.ship));
            }
            if !service_map.contains_key(&container.service) {
                return Err(ConfigError::UnknownTarget(container.service.clone()));
            }
        }

        // volumes_from: source must exist, live on the same ship, and not be
        // the referencing container itself. Each reference adds an implicit
        // hard edge between the owning services.
        let mut implicit_edges = Vec::new();
        for container in container_map.values() {
            for source in &container.volumes_from {
                if source == &container.name {
                    return Err(ConfigError::invalid_volumes_from(
                        &container.name,
                        source,
                        "a container cannot take volumes from itself",
                    ));
                }
                let source_spec = container_map.get(source).ok_or_else(|| {
                    ConfigError::invalid_volumes_from(
                        &container.name,
                        source,
                        "no such container",
                    )
                })?;
                if source_spec.ship != container.ship {
                    return Err(ConfigError::invalid_volumes_from(
                        &container.name,
                        source,
                        format!(
                            "must run on the same ship ({} vs {})",
                            container.ship, source_spec.ship
                        ),
                    ));
                }
                if source_spec.service != container.service {
                    implicit_edges
                        .push((container.service.clone(), source_spec.service.clone()));
                }
            }
        }

        let graph = DependencyGraph::build(&service_map, &implicit_edges)?;

        Ok(Self {
            name: name.into(),
            ships: ship_map,
            registries,
            services: service_map,
            containers: container_map,
            graph,
        })
    }

    /// The service dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Looks up a container by name.
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.get(name)
    }

    /// Looks up a service by name.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// The ship a container is placed on.
    ///
    /// Resolution was validated at construction, so this always succeeds for
    /// containers belonging to this environment.
    pub fn ship_of(&self, container: &ContainerSpec) -> &Ship {
        &self.ships[&container.ship]
    }

    /// Containers of a service, in instance declaration order.
    pub fn containers_of(&self, service: &Service) -> Vec<&ContainerSpec> {
        service
            .instances
            .iter()
            .filter_map(|name| self.containers.get(name))
            .collect()
    }

    /// Resolves a play's target set.
    ///
    /// Each target is a container name first, then a service name expanded
    /// to its instances. An empty target list selects every service not
    /// marked `omit`; naming an omitted service explicitly still selects it.
    /// With `with_dependencies`, instances of all transitive hard
    /// dependencies join the set. Glob filters apply last. The result is
    /// sorted by `(service, container)` and free of duplicates.
    pub fn select(&self, targets: &[String], selection: &Selection) -> Result<Vec<&ContainerSpec>> {
        let mut names: Vec<String> = Vec::new();

        if targets.is_empty() {
            for service in self.services.values().filter(|s| !s.omit) {
                names.extend(service.instances.iter().cloned());
            }
        } else {
            for target in targets {
                if self.containers.contains_key(target) {
                    names.push(target.clone());
                } else if let Some(service) = self.services.get(target) {
                    names.extend(service.instances.iter().cloned());
                } else {
                    return Err(ConfigError::UnknownTarget(target.clone()));
                }
            }
        }

        if selection.with_dependencies {
            let mut extra = Vec::new();
            for name in &names {
                let Some(container) = self.containers.get(name) else {
                    continue;
                };
                for dep_service in self.graph.transitive_hard_deps(&container.service) {
                    if let Some(service) = self.services.get(&dep_service) {
                        extra.extend(service.instances.iter().cloned());
                    }
                }
            }
            names.extend(extra);
        }

        let container_re = compile_filter(selection.filters.container_pattern.as_deref())?;
        let ship_re = compile_filter(selection.filters.ship_pattern.as_deref())?;

        let mut selected: Vec<&ContainerSpec> = Vec::new();
        for name in names {
            let Some(container) = self.containers.get(&name) else {
                continue;
            };
            if selected.iter().any(|c| c.name == container.name) {
                continue;
            }
            if let Some(re) = &container_re {
                if !re.is_match(&container.name) {
                    continue;
                }
            }
            if let Some(re) = &ship_re {
                if !re.is_match(&container.ship) {
                    continue;
                }
            }
            selected.push(container);
        }

        selected.sort_by(|a, b| (&a.service, &a.name).cmp(&(&b.service, &b.name)));
        Ok(selected)
    }
}

/// Compiles a shell-style glob (`*`, `?`) into an anchored regex.
fn compile_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };

    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re)
        .map(Some)
        .map_err(|_| ConfigError::InvalidFilter(pattern.to_string()))
}
