//! Cross-resource environment wiring.
//!
//! Every resource linked to a service contributes a deterministic env var
//! derived from its name (`<UPPER_SNAKE_NAME>_URL`, or the
//! `_PROMETHEUS_URL`/`_GRAFANA_URL` pair for monitoring stacks). When
//! exactly one resource of a kind is linked, a well-known alias is injected
//! as well, unless the user already set that variable themselves.

use std::collections::BTreeMap;

use crate::catalog::entity::{ResourceKind, Service, StatefulResource};
use crate::catalog::Catalog;
use crate::utils::naming::upper_snake;

use super::EngineError;

pub const DATABASE_ALIAS: &str = "DATABASE_URL";
pub const CACHE_ALIAS: &str = "CACHE_URL";
pub const KAFKA_ALIAS: &str = "KAFKA_BROKERS";
pub const PROMETHEUS_ALIAS: &str = "PROMETHEUS_URL";
pub const GRAFANA_ALIAS: &str = "GRAFANA_URL";

/// Resolves the service's linked resources into the env map handed to the
/// container: the user's own variables plus the derived connection strings.
pub fn resolve_env(catalog: &Catalog, service: &Service) -> Result<BTreeMap<String, String>, EngineError> {
    let mut env = service.env.clone();

    inject(catalog, service, &service.database_ids, DATABASE_ALIAS, &mut env)?;
    inject(catalog, service, &service.cache_ids, CACHE_ALIAS, &mut env)?;
    inject(catalog, service, &service.kafka_ids, KAFKA_ALIAS, &mut env)?;
    inject_monitorings(catalog, service, &mut env)?;

    Ok(env)
}

fn linked_resources(
    catalog: &Catalog,
    service: &Service,
    ids: &[String],
) -> Result<Vec<(StatefulResource, String)>, EngineError> {
    let mut resources = Vec::new();
    for id in ids {
        let Some(resource) = catalog.get_resource_for_user(id, &service.user_id)? else {
            // A deleted link is not fatal; the deployment proceeds without it.
            continue;
        };
        let host = catalog
            .get_node_any(&resource.node_id)?
            .map(|node| node.host)
            .unwrap_or_else(|| "127.0.0.1".to_string());
        resources.push((resource, host));
    }
    Ok(resources)
}

fn connection_string(resource: &StatefulResource, host: &str) -> String {
    match resource.kind {
        ResourceKind::Database => format!(
            "postgres://{name}:{pass}@{host}:{port}/{name}",
            name = resource.name,
            pass = resource.secret,
            port = resource.port,
        ),
        ResourceKind::Cache => format!(
            "redis://:{pass}@{host}:{port}",
            pass = resource.secret,
            port = resource.port,
        ),
        ResourceKind::Kafka => format!("{host}:{port}", port = resource.port),
        // Monitoring and object storage are handled by their own shapes.
        ResourceKind::Monitoring | ResourceKind::ObjectStorage => {
            format!("http://{host}:{port}", port = resource.port)
        }
    }
}

fn inject(
    catalog: &Catalog,
    service: &Service,
    ids: &[String],
    alias: &str,
    env: &mut BTreeMap<String, String>,
) -> Result<(), EngineError> {
    let resources = linked_resources(catalog, service, ids)?;
    for (resource, host) in &resources {
        let url = connection_string(resource, host);
        env.insert(format!("{}_URL", upper_snake(&resource.name)), url);
    }
    if let [(resource, host)] = resources.as_slice() {
        if !service.env.contains_key(alias) {
            env.insert(alias.to_string(), connection_string(resource, host));
        }
    }
    Ok(())
}

fn inject_monitorings(
    catalog: &Catalog,
    service: &Service,
    env: &mut BTreeMap<String, String>,
) -> Result<(), EngineError> {
    let resources = linked_resources(catalog, service, &service.monitoring_ids)?;
    for (resource, host) in &resources {
        let prefix = upper_snake(&resource.name);
        env.insert(
            format!("{prefix}_PROMETHEUS_URL"),
            format!("http://{host}:{}", resource.port),
        );
        if let Some(grafana_port) = resource.extra_port {
            env.insert(
                format!("{prefix}_GRAFANA_URL"),
                format!("http://{host}:{grafana_port}"),
            );
        }
    }
    if let [(resource, host)] = resources.as_slice() {
        if !service.env.contains_key(PROMETHEUS_ALIAS) {
            env.insert(
                PROMETHEUS_ALIAS.to_string(),
                format!("http://{host}:{}", resource.port),
            );
        }
        if let (Some(grafana_port), false) = (
            resource.extra_port,
            service.env.contains_key(GRAFANA_ALIAS),
        ) {
            env.insert(
                GRAFANA_ALIAS.to_string(),
                format!("http://{host}:{grafana_port}"),
            );
        }
    }
    Ok(())
}

/// Env file body: `KEY=VALUE` lines in map order, so repeated renders of
/// the same service are byte-identical.
pub fn render_env_file(env: &BTreeMap<String, String>) -> String {
    let mut body = String::new();
    for (key, value) in env {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }
    body
}
