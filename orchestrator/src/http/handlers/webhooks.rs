//! Public, HMAC-verified webhook endpoint.

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::http::error::ApiError;
use crate::http::responses::RedeployedBody;
use crate::http::AppState;
use crate::webhook::WebhookOutcome;

const EVENT_HEADER: &str = "X-GitHub-Event";
const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

pub async fn github(
    state: web::Data<AppState>,
    path: web::Path<String>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let event = request
        .headers()
        .get(EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    let redeployer = state.redeployer.clone();
    let token = path.into_inner();
    let outcome = web::block(move || {
        redeployer.handle(&token, &event, signature.as_deref(), &body)
    })
    .await??;

    match outcome {
        WebhookOutcome::Ignored => Ok(HttpResponse::Ok().json(json!({ "status": "ignored" }))),
        WebhookOutcome::Redeployed { redeployed, repo } => {
            Ok(HttpResponse::Ok().json(RedeployedBody { redeployed, repo }))
        }
    }
}
