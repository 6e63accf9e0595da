//! Reverse-proxy label sets and the traefik bootstrap command.
//!
//! Router and service labels are keyed by the container name so several
//! routers behind one proxy instance never collide.

use super::commands::RunCommand;

pub const TRAEFIK_NETWORK: &str = "traefik-net";
pub const TRAEFIK_CONTAINER: &str = "localisprod-traefik";
const TRAEFIK_IMAGE: &str = "traefik:v3.1";

/// Labels that expose one container under `domain` on `service_port`.
pub fn proxy_labels(container_name: &str, domain: &str, service_port: u16) -> Vec<(String, String)> {
    vec![
        ("traefik.enable".to_string(), "true".to_string()),
        (
            format!("traefik.http.routers.{container_name}.rule"),
            format!("Host(`{domain}`)"),
        ),
        (
            format!("traefik.http.services.{container_name}.loadbalancer.server.port"),
            service_port.to_string(),
        ),
    ]
}

/// The proxy container itself: docker-provider mode, bound to 80/443, with
/// containers opted in per label.
pub fn traefik_run_command() -> String {
    RunCommand::new(TRAEFIK_CONTAINER, TRAEFIK_IMAGE)
        .publish(&[
            "80:80".parse().expect("literal port mapping"),
            "443:443".parse().expect("literal port mapping"),
        ])
        .network(TRAEFIK_NETWORK)
        .volumes(&["/var/run/docker.sock:/var/run/docker.sock:ro".to_string()])
        .restart_policy("unless-stopped")
        .command("--providers.docker=true --providers.docker.exposedbydefault=false --entrypoints.web.address=:80 --entrypoints.websecure.address=:443")
        .build()
}
