//! Node registration, inspection and lifecycle endpoints.

use std::net::ToSocketAddrs;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::catalog::entity::{Node, NodeStatus};
use crate::cloud::provider::InstanceSpec;
use crate::docker::commands::{network_create, stop_and_remove};
use crate::docker::traefik::{traefik_run_command, TRAEFIK_CONTAINER, TRAEFIK_NETWORK};
use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::AppState;
use crate::runner::RunnerError;

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub private_key: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_region: Option<String>,
    #[serde(default)]
    pub provider_instance_id: Option<String>,
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("`{field}` is required")));
    }
    Ok(())
}

/// Whether the host names or resolves to a loopback address. Best effort:
/// unresolvable hosts are treated as non-local and fail later at dial time.
fn resolves_to_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return ip.is_loopback();
    }
    (host, 22u16)
        .to_socket_addrs()
        .map(|mut addrs| addrs.any(|addr| addr.ip().is_loopback()))
        .unwrap_or(false)
}

pub async fn create(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<CreateNodeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    require("name", &body.name)?;
    require("host", &body.host)?;
    require("username", &body.username)?;
    require("private_key", &body.private_key)?;
    if !auth.is_root && resolves_to_loopback(&body.host) {
        return Err(ApiError::Forbidden(
            "registering the orchestrator host is root-only".to_string(),
        ));
    }

    let node = state.catalog.insert_node(Node {
        id: String::new(),
        user_id: Some(auth.user.id),
        name: body.name,
        host: body.host,
        port: body.port.unwrap_or(22),
        username: body.username,
        private_key: body.private_key,
        status: NodeStatus::Unknown,
        is_local: false,
        traefik_enabled: false,
        provider: body.provider,
        provider_region: body.provider_region,
        provider_instance_id: body.provider_instance_id,
        created_at: Utc::now(),
    })?;
    Ok(HttpResponse::Created().json(node))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionNodeRequest {
    pub name: String,
    pub provider: String,
    pub region: String,
    pub server_type: String,
    pub image: String,
    pub username: String,
    pub private_key: String,
    pub ssh_public_key: String,
}

/// Provisions a fresh instance through the user's cloud provider and
/// registers it as a node.
pub async fn provision(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<ProvisionNodeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    require("name", &body.name)?;
    require("provider", &body.provider)?;
    require("region", &body.region)?;
    require("username", &body.username)?;
    require("private_key", &body.private_key)?;

    let provider = state
        .providers
        .provider_for_user(&auth.user.id, &body.provider)?;
    let spec = InstanceSpec {
        name: body.name.clone(),
        region: body.region.clone(),
        server_type: body.server_type.clone(),
        image: body.image.clone(),
        ssh_public_key: body.ssh_public_key.clone(),
    };
    let instance = web::block(move || provider.provision_instance(&spec)).await??;

    let node = state.catalog.insert_node(Node {
        id: String::new(),
        user_id: Some(auth.user.id),
        name: body.name,
        host: instance.host,
        port: 22,
        username: body.username,
        private_key: body.private_key,
        status: NodeStatus::Unknown,
        is_local: false,
        traefik_enabled: false,
        provider: Some(body.provider),
        provider_region: Some(body.region),
        provider_instance_id: Some(instance.instance_id),
        created_at: Utc::now(),
    })?;
    Ok(HttpResponse::Created().json(node))
}

pub async fn list(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    let nodes = state.catalog.list_nodes(&auth.user.id, auth.is_root)?;
    Ok(HttpResponse::Ok().json(nodes))
}

pub async fn get(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let node = state
        .catalog
        .get_node_for_user(&path, &auth.user.id, auth.is_root)?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(node))
}

pub async fn delete(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let node = state
        .catalog
        .get_node_for_user(&path, &auth.user.id, auth.is_root)?
        .ok_or(ApiError::NotFound)?;
    if node.user_id.is_none() {
        return Err(ApiError::Forbidden(
            "the management node cannot be deleted".to_string(),
        ));
    }
    state.catalog.delete_node(&node.id, &auth.user.id)?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn ping(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let node = state
        .catalog
        .get_node_for_user(&path, &auth.user.id, auth.is_root)?
        .ok_or(ApiError::NotFound)?;

    let runners = state.runners.clone();
    let probe_node = node.clone();
    let result = web::block(move || runners.runner_for(&probe_node).ping()).await?;
    let status = match result {
        Ok(()) => NodeStatus::Online,
        Err(_) => NodeStatus::Offline,
    };
    state.catalog.update_node_status(&node.id, status)?;
    Ok(HttpResponse::Ok().json(json!({ "status": status })))
}

/// Boots (or replaces) the reverse proxy on the node and flags it as
/// proxy-enabled so deployments with a domain get routed.
pub async fn setup_traefik(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let node = state
        .catalog
        .get_node_for_user(&path, &auth.user.id, auth.is_root)?
        .ok_or(ApiError::NotFound)?;

    let runners = state.runners.clone();
    let target = node.clone();
    web::block(move || {
        let runner = runners.runner_for(&target);
        runner.run(&network_create(TRAEFIK_NETWORK))?;
        runner.run(&format!("{} || true", stop_and_remove(TRAEFIK_CONTAINER)))?;
        runner.run(&traefik_run_command())?;
        Ok::<_, RunnerError>(())
    })
    .await??;

    state.catalog.set_node_traefik_enabled(&node.id, true)?;
    let refreshed = state
        .catalog
        .get_node_for_user(&node.id, &auth.user.id, auth.is_root)?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(refreshed))
}
