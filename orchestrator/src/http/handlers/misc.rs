use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::AppState;

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn me(auth: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(json!({
        "user": auth.user,
        "is_root": auth.is_root,
    })))
}

pub async fn stats(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.catalog.count_entities(&auth.user.id)?))
}
