//! Per-container environment projection.
//!
//! Service discovery between dependents is realized entirely through
//! environment variables computed from the static environment: every
//! container learns the addresses and published ports of its own peers and
//! of every hard or soft dependency. The projection is a pure function of
//! the environment document; the variable names and values are part of the
//! contract observable by images running under the orchestrator.
//!
//! Variable names are built from service, container and port names with
//! every non-alphanumeric character mapped to `_`, then uppercased; the
//! original names are preserved inside values.

use std::collections::BTreeMap;

use crate::container::ContainerSpec;
use crate::environment::Environment;
use crate::service::Service;

/// Normalizes a name for use in a variable identifier.
pub fn var_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Computes the projected (discovery) variables for a container.
///
/// This is the layer beneath the container's declared environment: env
/// files, service `env` and instance `env` all override it.
pub fn project(env: &Environment, container: &ContainerSpec) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let ship = env.ship_of(container);

    vars.insert("ARMADA_ENVIRONMENT_NAME".to_string(), env.name.clone());
    vars.insert("DOCKER_IMAGE".to_string(), container.image.name());
    vars.insert("DOCKER_TAG".to_string(), container.image.tag.clone());
    vars.insert("SERVICE_NAME".to_string(), container.service.clone());
    vars.insert("CONTAINER_NAME".to_string(), container.name.clone());
    vars.insert("CONTAINER_HOST_ADDRESS".to_string(), ship.address.clone());

    let own_service = &env.services[&container.service];
    let mut info_services: Vec<&Service> = vec![own_service];
    for dep in own_service.info_dependencies() {
        if let Some(service) = env.service(dep) {
            info_services.push(service);
        }
    }

    for service in info_services {
        vars.insert(
            format!("{}_INSTANCES", var_name(&service.name)),
            service.instances.join(","),
        );

        for peer in env.containers_of(service) {
            let basename = format!("{}_{}", var_name(&service.name), var_name(&peer.name));
            let peer_ship = env.ship_of(peer);
            vars.insert(format!("{}_HOST", basename), peer_ship.address.clone());

            for (port_name, port) in &peer.ports {
                vars.insert(
                    format!("{}_{}_PORT", basename, var_name(port_name)),
                    port.external_port().to_string(),
                );
                vars.insert(
                    format!("{}_{}_INTERNAL_PORT", basename, var_name(port_name)),
                    port.internal_port().to_string(),
                );
            }
        }
    }

    vars
}

/// Computes the full environment a container receives at creation:
/// projected variables overlaid with the declared environment (declared
/// values win).
pub fn container_environment(
    env: &Environment,
    container: &ContainerSpec,
) -> BTreeMap<String, String> {
    let mut vars = project(env, container);
    for (key, value) in &container.env {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerSpec;
    use crate::image::ImageRef;
    use crate::port::{PortDef, PortSpec};
    use crate::service::Service;
    use crate::ship::Ship;

    fn kafka_env() -> Environment {
        let mut zookeeper = Service::new("zookeeper", "acme/zookeeper:3.9");
        zookeeper.instances = vec!["zk".to_string()];
        let mut kafka = Service::new("kafka", "acme/kafka:3");
        kafka.instances = vec!["kafka".to_string()];
        kafka.requires.insert("zookeeper".to_string());

        let zk = ContainerSpec::builder(
            "zk",
            "zookeeper",
            "alpha",
            ImageRef::parse("acme/zookeeper:3.9").unwrap(),
        )
        .port(PortSpec::parse("client", &PortDef::Number(2181)).unwrap())
        .build();

        let kafka_c = ContainerSpec::builder(
            "kafka",
            "kafka",
            "beta",
            ImageRef::parse("acme/kafka:3").unwrap(),
        )
        .port(PortSpec::parse("broker", &PortDef::Spec("19092:9092".to_string())).unwrap())
        .env("BROKER_ID", "1")
        .build();

        Environment::new(
            "production",
            vec![Ship::new("alpha", "10.0.0.1"), Ship::new("beta", "10.0.0.2")],
            vec![],
            vec![zookeeper, kafka],
            vec![zk, kafka_c],
        )
        .unwrap()
    }

    #[test]
    fn test_var_name_normalization() {
        assert_eq!(var_name("schema-registry"), "SCHEMA_REGISTRY");
        assert_eq!(var_name("web.front"), "WEB_FRONT");
        assert_eq!(var_name("db_1"), "DB_1");
    }

    #[test]
    fn test_base_variables() {
        let env = kafka_env();
        let kafka = env.container("kafka").unwrap();
        let vars = project(&env, kafka);

        assert_eq!(vars["ARMADA_ENVIRONMENT_NAME"], "production");
        assert_eq!(vars["DOCKER_IMAGE"], "acme/kafka");
        assert_eq!(vars["DOCKER_TAG"], "3");
        assert_eq!(vars["SERVICE_NAME"], "kafka");
        assert_eq!(vars["CONTAINER_NAME"], "kafka");
        assert_eq!(vars["CONTAINER_HOST_ADDRESS"], "10.0.0.2");
    }

    #[test]
    fn test_dependency_link_variables() {
        let env = kafka_env();
        let kafka = env.container("kafka").unwrap();
        let vars = project(&env, kafka);

        assert_eq!(vars["ZOOKEEPER_INSTANCES"], "zk");
        assert_eq!(vars["ZOOKEEPER_ZK_HOST"], "10.0.0.1");
        assert_eq!(vars["ZOOKEEPER_ZK_CLIENT_PORT"], "2181");
        assert_eq!(vars["ZOOKEEPER_ZK_CLIENT_INTERNAL_PORT"], "2181");
    }

    #[test]
    fn test_own_service_peers_included() {
        let env = kafka_env();
        let kafka = env.container("kafka").unwrap();
        let vars = project(&env, kafka);

        assert_eq!(vars["KAFKA_INSTANCES"], "kafka");
        assert_eq!(vars["KAFKA_KAFKA_HOST"], "10.0.0.2");
        assert_eq!(vars["KAFKA_KAFKA_BROKER_PORT"], "19092");
        assert_eq!(vars["KAFKA_KAFKA_BROKER_INTERNAL_PORT"], "9092");
    }

    #[test]
    fn test_dependency_does_not_see_dependent() {
        let env = kafka_env();
        let zk = env.container("zk").unwrap();
        let vars = project(&env, zk);
        assert!(!vars.contains_key("KAFKA_INSTANCES"));
    }

    #[test]
    fn test_declared_env_wins() {
        let env = kafka_env();
        let kafka = env.container("kafka").unwrap();
        let full = container_environment(&env, kafka);
        assert_eq!(full["BROKER_ID"], "1");

        // Projection is still underneath.
        assert_eq!(full["ZOOKEEPER_ZK_CLIENT_PORT"], "2181");
    }

    #[test]
    fn test_projection_is_deterministic() {
        let env = kafka_env();
        let kafka = env.container("kafka").unwrap();
        assert_eq!(project(&env, kafka), project(&env, kafka));
    }
}
