//! Per-kind container blueprints.
//!
//! A blueprint is everything needed to run one container of a stateful
//! resource: image, env, published ports, data volumes and trailing args.
//! Monitoring stacks expand to two blueprints (prometheus + grafana).

use std::collections::BTreeMap;

use crate::catalog::entity::{PortMapping, ResourceKind, StatefulResource};

const GRAFANA_IMAGE: &str = "grafana/grafana:11.1.0";

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerBlueprint {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<String>,
    pub args: Vec<String>,
}

pub fn default_version(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Database => "16",
        ResourceKind::Cache => "7",
        ResourceKind::Kafka => "3.7.0",
        ResourceKind::Monitoring => "v2.53.0",
        ResourceKind::ObjectStorage => "latest",
    }
}

pub fn default_port(kind: ResourceKind) -> u16 {
    match kind {
        ResourceKind::Database => 5432,
        ResourceKind::Cache => 6379,
        ResourceKind::Kafka => 9092,
        ResourceKind::Monitoring => 9090,
        ResourceKind::ObjectStorage => 9000,
    }
}

/// Default second published port, for the kinds that have one.
pub fn default_extra_port(kind: ResourceKind) -> Option<u16> {
    match kind {
        ResourceKind::Monitoring => Some(3000),
        ResourceKind::ObjectStorage => Some(9001),
        _ => None,
    }
}

/// Expands a catalog row into the container(s) it materializes as on
/// `node_host`.
pub fn blueprints_for(resource: &StatefulResource, node_host: &str) -> Vec<ContainerBlueprint> {
    let data_volume = format!("{}-data:{}", resource.container_name, data_mount(resource.kind));
    match resource.kind {
        ResourceKind::Database => vec![ContainerBlueprint {
            name: resource.container_name.clone(),
            image: format!("postgres:{}", resource.version),
            env: BTreeMap::from([
                ("POSTGRES_USER".to_string(), resource.name.clone()),
                ("POSTGRES_PASSWORD".to_string(), resource.secret.clone()),
                ("POSTGRES_DB".to_string(), resource.name.clone()),
            ]),
            ports: vec![PortMapping { host: resource.port, container: 5432 }],
            volumes: vec![data_volume],
            args: Vec::new(),
        }],
        ResourceKind::Cache => vec![ContainerBlueprint {
            name: resource.container_name.clone(),
            image: format!("redis:{}", resource.version),
            env: BTreeMap::new(),
            ports: vec![PortMapping { host: resource.port, container: 6379 }],
            volumes: vec![data_volume],
            args: vec![
                "redis-server".to_string(),
                "--requirepass".to_string(),
                resource.secret.clone(),
            ],
        }],
        ResourceKind::Kafka => vec![ContainerBlueprint {
            name: resource.container_name.clone(),
            image: format!("apache/kafka:{}", resource.version),
            env: BTreeMap::from([
                ("KAFKA_NODE_ID".to_string(), "1".to_string()),
                (
                    "KAFKA_PROCESS_ROLES".to_string(),
                    "broker,controller".to_string(),
                ),
                (
                    "KAFKA_LISTENERS".to_string(),
                    "PLAINTEXT://0.0.0.0:9092,CONTROLLER://0.0.0.0:9093".to_string(),
                ),
                (
                    "KAFKA_ADVERTISED_LISTENERS".to_string(),
                    format!("PLAINTEXT://{node_host}:{}", resource.port),
                ),
                (
                    "KAFKA_CONTROLLER_LISTENER_NAMES".to_string(),
                    "CONTROLLER".to_string(),
                ),
                (
                    "KAFKA_CONTROLLER_QUORUM_VOTERS".to_string(),
                    "1@localhost:9093".to_string(),
                ),
                (
                    "KAFKA_OFFSETS_TOPIC_REPLICATION_FACTOR".to_string(),
                    "1".to_string(),
                ),
            ]),
            ports: vec![PortMapping { host: resource.port, container: 9092 }],
            volumes: vec![data_volume],
            args: Vec::new(),
        }],
        ResourceKind::Monitoring => {
            let mut stack = vec![ContainerBlueprint {
                name: resource.container_name.clone(),
                image: format!("prom/prometheus:{}", resource.version),
                env: BTreeMap::new(),
                ports: vec![PortMapping { host: resource.port, container: 9090 }],
                volumes: vec![data_volume],
                args: Vec::new(),
            }];
            if let Some(grafana_port) = resource.extra_port {
                stack.push(ContainerBlueprint {
                    name: format!("{}-grafana", resource.container_name),
                    image: GRAFANA_IMAGE.to_string(),
                    env: BTreeMap::from([(
                        "GF_SECURITY_ADMIN_PASSWORD".to_string(),
                        resource.secret.clone(),
                    )]),
                    ports: vec![PortMapping { host: grafana_port, container: 3000 }],
                    volumes: vec![format!(
                        "{}-grafana-data:/var/lib/grafana",
                        resource.container_name
                    )],
                    args: Vec::new(),
                });
            }
            stack
        }
        ResourceKind::ObjectStorage => {
            let mut ports = vec![PortMapping { host: resource.port, container: 9000 }];
            let mut args = vec!["server".to_string(), "/data".to_string()];
            if let Some(console_port) = resource.extra_port {
                ports.push(PortMapping { host: console_port, container: 9001 });
                args.push("--console-address".to_string());
                args.push(":9001".to_string());
            }
            vec![ContainerBlueprint {
                name: resource.container_name.clone(),
                image: format!("minio/minio:{}", resource.version),
                env: BTreeMap::from([
                    ("MINIO_ROOT_USER".to_string(), resource.name.clone()),
                    ("MINIO_ROOT_PASSWORD".to_string(), resource.secret.clone()),
                ]),
                ports,
                volumes: vec![data_volume],
                args,
            }]
        }
    }
}

fn data_mount(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Database => "/var/lib/postgresql/data",
        ResourceKind::Cache => "/data",
        ResourceKind::Kafka => "/var/lib/kafka/data",
        ResourceKind::Monitoring => "/prometheus",
        ResourceKind::ObjectStorage => "/data",
    }
}
