//! Route table and server lifecycle.

use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use tracing::info;

use crate::utils::shutdown::ShutdownBroadcaster;

use super::handlers::{
    deployments, misc, nodes, resources, services, settings, volumes, webhooks,
};
use super::AppState;

pub const DEFAULT_WORKERS: usize = 4;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/healthz").route(web::get().to(misc::healthz)))
        .service(
            web::resource("/api/webhooks/github/{token}")
                .route(web::post().to(webhooks::github)),
        )
        .service(
            web::scope("/api")
                .service(web::resource("/me").route(web::get().to(misc::me)))
                .service(web::resource("/stats").route(web::get().to(misc::stats)))
                .service(
                    web::resource("/settings")
                        .route(web::get().to(settings::get))
                        .route(web::put().to(settings::update)),
                )
                .service(
                    web::resource("/nodes")
                        .route(web::get().to(nodes::list))
                        .route(web::post().to(nodes::create)),
                )
                .service(
                    web::resource("/nodes/provision").route(web::post().to(nodes::provision)),
                )
                .service(
                    web::resource("/nodes/{id}")
                        .route(web::get().to(nodes::get))
                        .route(web::delete().to(nodes::delete)),
                )
                .service(web::resource("/nodes/{id}/ping").route(web::post().to(nodes::ping)))
                .service(
                    web::resource("/nodes/{id}/setup-traefik")
                        .route(web::post().to(nodes::setup_traefik)),
                )
                .service(
                    web::resource("/nodes/{id}/volumes/migrate")
                        .route(web::post().to(volumes::migrate)),
                )
                .service(
                    web::resource("/nodes/{id}/volumes/rollback")
                        .route(web::post().to(volumes::rollback)),
                )
                .service(
                    web::resource("/nodes/{id}/volumes/bak")
                        .route(web::delete().to(volumes::delete_backup)),
                )
                .service(
                    web::resource("/nodes/{id}/volumes/migration")
                        .route(web::get().to(volumes::status)),
                )
                .service(
                    web::resource("/services")
                        .route(web::get().to(services::list))
                        .route(web::post().to(services::create)),
                )
                .service(
                    web::resource("/services/{id}")
                        .route(web::get().to(services::get))
                        .route(web::put().to(services::update))
                        .route(web::delete().to(services::delete)),
                )
                .service(
                    web::resource("/deployments")
                        .route(web::get().to(deployments::list))
                        .route(web::post().to(deployments::create)),
                )
                .service(
                    web::resource("/deployments/{id}")
                        .route(web::get().to(deployments::get))
                        .route(web::delete().to(deployments::delete)),
                )
                .service(
                    web::resource("/deployments/{id}/restart")
                        .route(web::post().to(deployments::restart)),
                )
                .service(
                    web::resource("/deployments/{id}/logs")
                        .route(web::get().to(deployments::logs)),
                )
                .service(
                    web::resource(resources::KIND_SEGMENT)
                        .route(web::get().to(resources::list))
                        .route(web::post().to(resources::create)),
                )
                .service(
                    web::resource(format!("{}/{{id}}", resources::KIND_SEGMENT))
                        .route(web::get().to(resources::get))
                        .route(web::delete().to(resources::delete)),
                ),
        );
}

/// Runs the HTTP server until the shutdown broadcast fires; a stopper
/// thread bridges the crossbeam signal into actix's graceful stop.
pub async fn serve(
    state: web::Data<AppState>,
    host: &str,
    port: u16,
    workers: usize,
    shutdown: &ShutdownBroadcaster,
) -> std::io::Result<()> {
    info!("starting HTTP server at http://{host}:{port}");
    let server: Server = HttpServer::new(move || {
        App::new().app_data(state.clone()).configure(routes)
    })
    .bind((host, port))?
    .workers(workers)
    .run();

    let handle = server.handle();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        // Park on the blocking pool until the broadcast fires, then stop
        // the server gracefully.
        let _ = tokio::task::spawn_blocking(move || {
            while !signal.is_cancelled(Duration::from_secs(3600)) {}
        })
        .await;
        handle.stop(true).await;
    });

    server.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::settings::{WEBHOOK_SECRET_KEY, WEBHOOK_TOKEN_KEY};
    use crate::catalog::test_support::empty_catalog;
    use crate::catalog::Catalog;
    use crate::cloud::registry::ProviderRegistry;
    use crate::deployment::DeploymentEngine;
    use crate::http::auth::issue_token;
    use crate::http::{AppState, BoundaryConfig};
    use crate::migration::VolumeMigrator;
    use crate::resources::ResourceProvisioner;
    use crate::runner::factory::{MockRunnerSource, RunnerSource};
    use crate::utils::shutdown::ShutdownBroadcaster;
    use crate::webhook::{signature::sign, WebhookRedeployer};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    const JWT_SECRET: &str = "test-jwt-secret";

    fn test_state() -> web::Data<AppState> {
        let catalog = Arc::new(empty_catalog());
        let runners: Arc<dyn RunnerSource> = Arc::new(MockRunnerSource::new());
        let engine = Arc::new(DeploymentEngine::new(catalog.clone(), runners.clone()));
        let providers = Arc::new(ProviderRegistry::new(
            catalog.clone(),
            std::time::Duration::from_secs(300),
        ));
        web::Data::new(AppState {
            catalog: catalog.clone(),
            engine: engine.clone(),
            provisioner: Arc::new(ResourceProvisioner::new(catalog.clone(), runners.clone())),
            migrator: Arc::new(VolumeMigrator::new(
                catalog.clone(),
                runners.clone(),
                providers.clone(),
                ShutdownBroadcaster::new(),
            )),
            redeployer: Arc::new(WebhookRedeployer::new(
                catalog.clone(),
                engine,
                runners.clone(),
                None,
            )),
            providers,
            runners,
            config: BoundaryConfig {
                jwt_secret: JWT_SECRET.to_string(),
                root_email: Some("root@example.com".to_string()),
                app_url: None,
            },
        })
    }

    fn bearer(email: &str) -> String {
        // Far-future expiry keeps the fixture valid.
        let token = issue_token(JWT_SECRET, &format!("github|{email}"), email, 4_102_444_800)
            .unwrap();
        format!("Bearer {token}")
    }

    fn catalog_of(state: &web::Data<AppState>) -> Arc<Catalog> {
        state.catalog.clone()
    }

    #[actix_web::test]
    async fn test_node_create_defaults_port_and_strips_private_key() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let request = test::TestRequest::post()
            .uri("/api/nodes")
            .insert_header(("Authorization", bearer("a@b.c")))
            .set_json(serde_json::json!({
                "name": "s", "host": "1.2.3.4", "username": "u", "private_key": "k"
            }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(StatusCode::CREATED, response.status());

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(22, body["port"]);
        assert!(body.get("private_key").is_none());
    }

    #[actix_web::test]
    async fn test_non_root_cannot_register_loopback_node() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let request = test::TestRequest::post()
            .uri("/api/nodes")
            .insert_header(("Authorization", bearer("a@b.c")))
            .set_json(serde_json::json!({
                "name": "s", "host": "127.0.0.1", "username": "u", "private_key": "k"
            }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(StatusCode::FORBIDDEN, response.status());
    }

    #[actix_web::test]
    async fn test_root_may_register_loopback_node() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let request = test::TestRequest::post()
            .uri("/api/nodes")
            .insert_header(("Authorization", bearer("root@example.com")))
            .set_json(serde_json::json!({
                "name": "s", "host": "127.0.0.1", "username": "u", "private_key": "k"
            }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(StatusCode::CREATED, response.status());
    }

    #[actix_web::test]
    async fn test_service_create_and_name_validation() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let created = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/services")
                .insert_header(("Authorization", bearer("a@b.c")))
                .set_json(serde_json::json!({ "name": "my-app", "docker_image": "nginx:latest" }))
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::CREATED, created.status());
        let body: serde_json::Value = test::read_body_json(created).await;
        assert_eq!("my-app", body["name"]);
        assert_eq!(serde_json::json!({}), body["env"]);
        assert_eq!(serde_json::json!([]), body["ports"]);

        let rejected = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/services")
                .insert_header(("Authorization", bearer("a@b.c")))
                .set_json(serde_json::json!({ "name": "bad name!", "docker_image": "x" }))
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, rejected.status());
    }

    #[actix_web::test]
    async fn test_settings_mask_secret_values() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let updated = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .insert_header(("Authorization", bearer("a@b.c")))
                .set_json(serde_json::json!({ "webhook_secret": "hunter2" }))
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::OK, updated.status());
        let body: serde_json::Value = test::read_body_json(updated).await;
        assert_eq!("configured", body["settings"][WEBHOOK_SECRET_KEY]);

        // The mask echo must not overwrite the stored secret.
        let echoed = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .insert_header(("Authorization", bearer("a@b.c")))
                .set_json(serde_json::json!({ "webhook_secret": "configured" }))
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::OK, echoed.status());
        let user = catalog_of(&state)
            .get_user_by_subject("github|a@b.c")
            .unwrap()
            .unwrap();
        assert_eq!(
            "hunter2",
            catalog_of(&state)
                .get_setting(&user.id, WEBHOOK_SECRET_KEY)
                .unwrap()
                .unwrap()
        );
    }

    #[actix_web::test]
    async fn test_webhook_signature_and_ignored_events() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        // Provision a user + secret through the auth path.
        test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .insert_header(("Authorization", bearer("a@b.c")))
                .set_json(serde_json::json!({ "webhook_secret": "s3cret" }))
                .to_request(),
        )
        .await;
        let user = catalog_of(&state)
            .get_user_by_subject("github|a@b.c")
            .unwrap()
            .unwrap();
        let token = catalog_of(&state)
            .get_setting(&user.id, WEBHOOK_TOKEN_KEY)
            .unwrap()
            .unwrap();

        let body = br#"{"action":"published","repository":{"full_name":"o/r"}}"#;

        let bad_signature = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/webhooks/github/{token}"))
                .insert_header(("X-GitHub-Event", "registry_package"))
                .insert_header(("X-Hub-Signature-256", sign("wrong", body)))
                .set_payload(body.to_vec())
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::UNAUTHORIZED, bad_signature.status());

        let ping = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/webhooks/github/{token}"))
                .insert_header(("X-GitHub-Event", "ping"))
                .insert_header(("X-Hub-Signature-256", sign("s3cret", body)))
                .set_payload(body.to_vec())
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::OK, ping.status());
        let ping_body: serde_json::Value = test::read_body_json(ping).await;
        assert_eq!("ignored", ping_body["status"]);

        // No deployments exist yet, so a valid publish redeploys zero.
        let published = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/webhooks/github/{token}"))
                .insert_header(("X-GitHub-Event", "registry_package"))
                .insert_header(("X-Hub-Signature-256", sign("s3cret", body)))
                .set_payload(body.to_vec())
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::OK, published.status());
        let published_body: serde_json::Value = test::read_body_json(published).await;
        assert_eq!(0, published_body["redeployed"]);
        assert_eq!("o/r", published_body["repo"]);

        let unknown_token = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/webhooks/github/not-a-token")
                .insert_header(("X-GitHub-Event", "registry_package"))
                .insert_header(("X-Hub-Signature-256", sign("s3cret", body)))
                .set_payload(body.to_vec())
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::NOT_FOUND, unknown_token.status());
    }

    #[actix_web::test]
    async fn test_healthz_is_public_and_api_requires_auth() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let health = test::call_service(
            &app,
            test::TestRequest::get().uri("/healthz").to_request(),
        )
        .await;
        assert_eq!(StatusCode::OK, health.status());

        let unauthenticated = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/nodes").to_request(),
        )
        .await;
        assert_eq!(StatusCode::UNAUTHORIZED, unauthenticated.status());
    }

    #[actix_web::test]
    async fn test_migration_status_is_owner_scoped() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let node = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/nodes")
                .insert_header(("Authorization", bearer("a@b.c")))
                .set_json(serde_json::json!({
                    "name": "s", "host": "1.2.3.4", "username": "u", "private_key": "k"
                }))
                .to_request(),
        )
        .await;
        let node: serde_json::Value = test::read_body_json(node).await;
        let node_id = node["id"].as_str().unwrap();

        // Another tenant cannot even see the node.
        let other = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/nodes/{node_id}/volumes/migration"))
                .insert_header(("Authorization", bearer("other@b.c")))
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::NOT_FOUND, other.status());

        // The owner sees "no migration yet".
        let owner = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/nodes/{node_id}/volumes/migration"))
                .insert_header(("Authorization", bearer("a@b.c")))
                .to_request(),
        )
        .await;
        assert_eq!(StatusCode::NOT_FOUND, owner.status());
    }
}
