//! Stateful resource endpoints. One set of handlers serves all five
//! kinds; the path segment picks the kind.

use actix_web::{web, HttpResponse};

use crate::catalog::entity::ResourceKind;
use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::responses::ResourceFailureBody;
use crate::http::AppState;
use crate::resources::{CreateResourceOutcome, CreateResourceRequest};

/// Path pattern matching the resource collections.
pub const KIND_SEGMENT: &str =
    "/{kind:databases|caches|kafkas|monitorings|object-storages}";

fn kind_from_segment(segment: &str) -> Result<ResourceKind, ApiError> {
    match segment {
        "databases" => Ok(ResourceKind::Database),
        "caches" => Ok(ResourceKind::Cache),
        "kafkas" => Ok(ResourceKind::Kafka),
        "monitorings" => Ok(ResourceKind::Monitoring),
        "object-storages" => Ok(ResourceKind::ObjectStorage),
        _ => Err(ApiError::NotFound),
    }
}

pub async fn create(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<CreateResourceRequest>,
) -> Result<HttpResponse, ApiError> {
    let kind = kind_from_segment(&path)?;
    let provisioner = state.provisioner.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    let request = body.into_inner();

    let outcome =
        web::block(move || provisioner.create(&user_id, is_root, kind, request)).await??;
    match outcome {
        CreateResourceOutcome::Created(resource) => Ok(HttpResponse::Created().json(resource)),
        CreateResourceOutcome::Failed {
            resource,
            error,
            output,
        } => Ok(HttpResponse::Ok().json(ResourceFailureBody {
            resource,
            error,
            output,
        })),
    }
}

pub async fn list(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let kind = kind_from_segment(&path)?;
    Ok(HttpResponse::Ok().json(state.catalog.list_resources(&auth.user.id, kind)?))
}

pub async fn get(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (segment, id) = path.into_inner();
    let kind = kind_from_segment(&segment)?;
    let resource = state
        .catalog
        .get_resource_for_user(&id, &auth.user.id)?
        .filter(|resource| resource.kind == kind)
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(resource))
}

pub async fn delete(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (segment, id) = path.into_inner();
    let kind = kind_from_segment(&segment)?;
    let provisioner = state.provisioner.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    web::block(move || provisioner.delete(&user_id, is_root, kind, &id)).await??;
    Ok(HttpResponse::NoContent().finish())
}
