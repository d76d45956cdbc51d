//! Services: named templates producing container instances.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::checks::LifecycleChecks;
use crate::env::EnvMap;
use crate::port::PortSpec;

/// A named service and its defaults.
///
/// Dependencies are declared at the service level: `requires` edges order
/// plays and feed environment projection, `wants_info` edges feed projection
/// only. The `omit` flag excludes a service from "all" selections while
/// leaving it eligible as a dependency of others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique service name.
    pub name: String,

    /// Default image reference for instances of this service.
    pub image: String,

    /// Default named ports, overridable per instance.
    pub ports: BTreeMap<String, PortSpec>,

    /// Default environment, overridable per instance.
    pub env: EnvMap,

    /// Env files merged beneath `env`, in declaration order.
    pub env_files: Vec<String>,

    /// Service-level lifecycle checks, merged with instance checks.
    pub checks: LifecycleChecks,

    /// Hard dependencies: affect ordering and projection.
    pub requires: BTreeSet<String>,

    /// Soft dependencies: affect projection only.
    pub wants_info: BTreeSet<String>,

    /// Excluded from "all" selections, still usable as a dependency.
    pub omit: bool,

    /// Instance (container) names, in declaration order.
    pub instances: Vec<String>,
}

impl Service {
    /// Creates a service with the given name and image and no defaults.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ports: BTreeMap::new(),
            env: EnvMap::new(),
            env_files: Vec::new(),
            checks: LifecycleChecks::default(),
            requires: BTreeSet::new(),
            wants_info: BTreeSet::new(),
            omit: false,
            instances: Vec::new(),
        }
    }

    /// All services this one draws discovery information from: hard and
    /// soft dependencies alike.
    pub fn info_dependencies(&self) -> impl Iterator<Item = &String> {
        self.requires.iter().chain(self.wants_info.iter())
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{} instances]", self.name, self.instances.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_dependencies_covers_both_edge_kinds() {
        let mut service = Service::new("kafka", "acme/kafka:3");
        service.requires.insert("zookeeper".to_string());
        service.wants_info.insert("schema-registry".to_string());

        let deps: Vec<_> = service.info_dependencies().cloned().collect();
        assert!(deps.contains(&"zookeeper".to_string()));
        assert!(deps.contains(&"schema-registry".to_string()));
    }
}
