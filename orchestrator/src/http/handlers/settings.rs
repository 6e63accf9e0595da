//! Per-user settings. Secret-class values are masked on the way out and
//! mask echoes are ignored on the way in.

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::catalog::settings::{is_secret_setting, WEBHOOK_TOKEN_KEY};
use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::responses::mask_settings;
use crate::http::AppState;

fn settings_body(
    state: &AppState,
    auth: &AuthUser,
) -> Result<serde_json::Value, ApiError> {
    let settings = state.catalog.list_settings(&auth.user.id)?;
    let webhook_url = match (&state.config.app_url, settings.get(WEBHOOK_TOKEN_KEY)) {
        (Some(app_url), Some(token)) => app_url
            .join(&format!("api/webhooks/github/{token}"))
            .ok()
            .map(String::from),
        _ => None,
    };
    Ok(json!({
        "settings": mask_settings(settings),
        "webhook_url": webhook_url,
    }))
}

pub async fn get(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(settings_body(&state, &auth)?))
}

pub async fn update(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<BTreeMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    for (key, value) in body.into_inner() {
        // The webhook token is system-issued and immutable.
        if key == WEBHOOK_TOKEN_KEY {
            continue;
        }
        // Clients echo the mask back for untouched secret fields.
        if is_secret_setting(&key) && value == "configured" {
            continue;
        }
        state.catalog.set_setting(&auth.user.id, &key, &value)?;
    }
    Ok(HttpResponse::Ok().json(settings_body(&state, &auth)?))
}
