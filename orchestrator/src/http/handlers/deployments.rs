//! Deployment endpoints, thin over the engine.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::deployment::DeployOutcome;
use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::responses::DeployFailureBody;
use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub service_id: String,
    pub node_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: u32,
}

fn default_tail() -> u32 {
    200
}

pub async fn create(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<CreateDeploymentRequest>,
) -> Result<HttpResponse, ApiError> {
    let engine = state.engine.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    let request = body.into_inner();

    let outcome = web::block(move || {
        engine.create(&user_id, is_root, &request.service_id, &request.node_id)
    })
    .await??;

    match outcome {
        DeployOutcome::Started(deployment) => Ok(HttpResponse::Created().json(deployment)),
        // Container-runtime failures come back 200 with the captured
        // output; the catalog row is already `failed`.
        DeployOutcome::Failed {
            deployment,
            error,
            output,
        } => Ok(HttpResponse::Ok().json(DeployFailureBody {
            deployment,
            error,
            output,
        })),
    }
}

pub async fn list(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.catalog.list_deployments(&auth.user.id)?))
}

pub async fn get(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let deployment = state
        .catalog
        .get_deployment_for_user(&path, &auth.user.id)?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(deployment))
}

pub async fn delete(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let engine = state.engine.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    let id = path.into_inner();
    web::block(move || engine.delete(&user_id, is_root, &id)).await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn restart(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let engine = state.engine.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    let id = path.into_inner();
    let deployment = web::block(move || engine.restart(&user_id, is_root, &id)).await??;
    Ok(HttpResponse::Ok().json(deployment))
}

pub async fn logs(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    query: web::Query<LogsQuery>,
) -> Result<HttpResponse, ApiError> {
    let engine = state.engine.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    let id = path.into_inner();
    let tail = query.tail;
    let logs = web::block(move || engine.logs(&user_id, is_root, &id, tail)).await??;
    Ok(HttpResponse::Ok().json(json!({ "logs": logs })))
}
