//! Service CRUD.

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;

use crate::catalog::entity::{is_valid_service_name, PortMapping, Service};
use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    pub docker_image: String,
    #[serde(default)]
    pub build_path: Option<String>,
    #[serde(default)]
    pub env_vars: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub ports: Option<Vec<String>>,
    #[serde(default)]
    pub volumes: Option<Vec<String>>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub github_repo: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub databases: Option<Vec<String>>,
    #[serde(default)]
    pub caches: Option<Vec<String>>,
    #[serde(default)]
    pub kafkas: Option<Vec<String>>,
    #[serde(default)]
    pub monitorings: Option<Vec<String>>,
}

fn parse_ports(raw: &[String]) -> Result<Vec<PortMapping>, ApiError> {
    let mut ports = Vec::with_capacity(raw.len());
    for entry in raw {
        let mapping: PortMapping = entry
            .parse()
            .map_err(|err: String| ApiError::Validation(err))?;
        if mapping.host == 0 || mapping.container == 0 {
            return Err(ApiError::Validation(format!(
                "port 0 is not valid in mapping `{entry}`"
            )));
        }
        ports.push(mapping);
    }
    Ok(ports)
}

fn validate(request: &ServiceRequest) -> Result<(), ApiError> {
    if !is_valid_service_name(&request.name) {
        return Err(ApiError::Validation(
            "service name must match ^[A-Za-z0-9_-]+$".to_string(),
        ));
    }
    if request.docker_image.trim().is_empty() {
        return Err(ApiError::Validation("`docker_image` is required".to_string()));
    }
    Ok(())
}

fn apply(request: ServiceRequest, mut service: Service) -> Result<Service, ApiError> {
    service.name = request.name;
    service.image = request.docker_image;
    service.build_path = request.build_path;
    if let Some(env) = request.env_vars {
        service.env = env;
    }
    if let Some(ports) = request.ports {
        service.ports = parse_ports(&ports)?;
    }
    if let Some(volumes) = request.volumes {
        service.volumes = volumes;
    }
    service.command = request.command;
    service.github_repo = request.github_repo;
    service.domain = request.domain;
    if let Some(databases) = request.databases {
        service.database_ids = databases;
    }
    if let Some(caches) = request.caches {
        service.cache_ids = caches;
    }
    if let Some(kafkas) = request.kafkas {
        service.kafka_ids = kafkas;
    }
    if let Some(monitorings) = request.monitorings {
        service.monitoring_ids = monitorings;
    }
    Ok(service)
}

pub async fn create(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<ServiceRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    validate(&request)?;

    let blank = Service {
        id: String::new(),
        user_id: auth.user.id.clone(),
        name: String::new(),
        image: String::new(),
        build_path: None,
        env: BTreeMap::new(),
        ports: Vec::new(),
        volumes: Vec::new(),
        command: None,
        github_repo: None,
        domain: None,
        database_ids: Vec::new(),
        cache_ids: Vec::new(),
        kafka_ids: Vec::new(),
        monitoring_ids: Vec::new(),
        created_at: Utc::now(),
    };
    let service = state.catalog.insert_service(apply(request, blank)?)?;
    Ok(HttpResponse::Created().json(service))
}

pub async fn update(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<ServiceRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    validate(&request)?;

    let existing = state
        .catalog
        .get_service_for_user(&path, &auth.user.id)?
        .ok_or(ApiError::NotFound)?;
    let updated = apply(request, existing)?;
    state.catalog.update_service(&updated)?;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn list(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.catalog.list_services(&auth.user.id)?))
}

pub async fn get(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let service = state
        .catalog
        .get_service_for_user(&path, &auth.user.id)?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(service))
}

pub async fn delete(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    if !state.catalog.delete_service(&path, &auth.user.id)? {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}
