//! Deployment lifecycle: create, restart, logs, delete, redeploy.
//!
//! `create` follows a strict order: ownership lookups, port pre-checks,
//! catalog reservation in `pending`, link resolution, optional registry
//! login, env-file materialization, the run itself, then cleanup. Every
//! persistent transition is written before the next external effect.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info_span, warn};

use crate::catalog::entity::{Deployment, Node, RunState, Service};
use crate::catalog::settings::{REGISTRY_TOKEN_KEY, REGISTRY_USERNAME_KEY};
use crate::catalog::Catalog;
use crate::docker::shell::quote;
use crate::docker::traefik::{self, TRAEFIK_NETWORK};
use crate::docker::commands::{self, RunCommand};
use crate::runner::factory::RunnerSource;
use crate::runner::{Runner, RunnerError};
use crate::utils::naming::{sanitize, short_hex};

use super::links;
use super::EngineError;

/// Derived container name: `localisprod-<safe-service-name>-<8hex>`.
pub fn derive_container_name(service_name: &str) -> String {
    format!("localisprod-{}-{}", sanitize(service_name), short_hex())
}

/// Per-container temp env file on the target, written 0600 and removed
/// after the run attempt.
pub fn env_file_path(container_name: &str) -> String {
    format!("/tmp/localisprod-env-{container_name}.env")
}

/// Registries that require a token login before pulling.
fn token_registry(image: &str) -> Option<&'static str> {
    image.starts_with("ghcr.io/").then_some("ghcr.io")
}

#[derive(Debug)]
pub enum DeployOutcome {
    Started(Deployment),
    /// The container runtime rejected the run; the catalog row is `failed`
    /// and the captured output is surfaced to the caller.
    Failed {
        deployment: Deployment,
        error: String,
        output: String,
    },
}

pub struct DeploymentEngine {
    catalog: Arc<Catalog>,
    runners: Arc<dyn RunnerSource>,
}

impl DeploymentEngine {
    pub fn new(catalog: Arc<Catalog>, runners: Arc<dyn RunnerSource>) -> Self {
        Self { catalog, runners }
    }

    pub fn create(
        &self,
        user_id: &str,
        is_root: bool,
        service_id: &str,
        node_id: &str,
    ) -> Result<DeployOutcome, EngineError> {
        let service = self
            .catalog
            .get_service_for_user(service_id, user_id)?
            .ok_or(EngineError::NotFound)?;
        let node = self
            .catalog
            .get_node_for_user(node_id, user_id, is_root)?
            .ok_or(EngineError::NotFound)?;
        if node.is_local && !is_root {
            return Err(EngineError::LocalNodeForbidden);
        }

        let span = info_span!("deployment", service = %service.name, node = %node.name);
        let _guard = span.enter();

        let runner = self.runners.runner_for(&node);
        for mapping in &service.ports {
            if mapping.host == 0 || mapping.container == 0 {
                return Err(EngineError::InvalidPort(mapping.host.min(mapping.container)));
            }
            // Catalog first, then the live listen set; the two checks are
            // not atomic, the probe only narrows the window.
            if self.catalog.is_port_used_on_node(&node.id, mapping.host)?
                || runner.is_port_in_use(mapping.host)?
            {
                return Err(EngineError::PortConflict {
                    port: mapping.host,
                    node: node.name.clone(),
                });
            }
        }

        let container_name = derive_container_name(&service.name);
        let deployment = self.catalog.insert_deployment(Deployment {
            id: String::new(),
            user_id: user_id.to_string(),
            service_id: service.id.clone(),
            node_id: node.id.clone(),
            container_name: container_name.clone(),
            container_id: None,
            status: RunState::Pending,
            created_at: Utc::now(),
            last_deployed_at: None,
        })?;

        match self.launch(runner.as_ref(), &service, &node, &container_name) {
            Ok(container_id) => {
                self.catalog
                    .set_deployment_started(&deployment.id, &container_id)?;
                let started = self
                    .catalog
                    .get_deployment_for_user(&deployment.id, user_id)?
                    .ok_or(EngineError::NotFound)?;
                Ok(DeployOutcome::Started(started))
            }
            Err(err) => {
                self.catalog
                    .update_deployment_status(&deployment.id, RunState::Failed)?;
                match err {
                    EngineError::Runner(RunnerError::Command { status, output }) => {
                        Ok(DeployOutcome::Failed {
                            deployment: Deployment {
                                status: RunState::Failed,
                                ..deployment
                            },
                            error: format!("container failed to start (exit status {status})"),
                            output,
                        })
                    }
                    other => Err(other),
                }
            }
        }
    }

    pub fn restart(
        &self,
        user_id: &str,
        is_root: bool,
        deployment_id: &str,
    ) -> Result<Deployment, EngineError> {
        let (deployment, node) = self.deployment_and_node(user_id, is_root, deployment_id)?;
        let runner = self.runners.runner_for(&node);
        runner.run(&commands::restart(&deployment.container_name))?;
        self.catalog
            .update_deployment_status(&deployment.id, RunState::Running)?;
        Ok(Deployment {
            status: RunState::Running,
            ..deployment
        })
    }

    pub fn logs(
        &self,
        user_id: &str,
        is_root: bool,
        deployment_id: &str,
        tail: u32,
    ) -> Result<String, EngineError> {
        let (deployment, node) = self.deployment_and_node(user_id, is_root, deployment_id)?;
        let runner = self.runners.runner_for(&node);
        Ok(runner.run(&commands::logs_tail(&deployment.container_name, tail))?)
    }

    /// Stop/remove errors are suppressed: the catalog row goes away even
    /// when the node is unreachable, trading orphaned containers for
    /// availability.
    pub fn delete(
        &self,
        user_id: &str,
        is_root: bool,
        deployment_id: &str,
    ) -> Result<(), EngineError> {
        let (deployment, node) = self.deployment_and_node(user_id, is_root, deployment_id)?;
        let runner = self.runners.runner_for(&node);
        if let Err(err) = runner.run(&commands::stop_and_remove(&deployment.container_name)) {
            warn!(
                error = %err,
                container = %deployment.container_name,
                "could not stop container during delete; removing catalog row anyway"
            );
        }
        self.catalog.delete_deployment(&deployment.id, user_id)?;
        Ok(())
    }

    /// Replaces the running container under its existing name with the
    /// service's current image, ports, labels and network. Used by the
    /// webhook redeployer and the image-freshness reconciler; callers pull
    /// (and log in) beforehand.
    pub fn redeploy(
        &self,
        service: &Service,
        node: &Node,
        deployment: &Deployment,
    ) -> Result<(), EngineError> {
        let runner = self.runners.runner_for(node);
        let result = runner
            .run(&commands::stop_and_remove(&deployment.container_name))
            .map_err(EngineError::from)
            .and_then(|_| self.launch(runner.as_ref(), service, node, &deployment.container_name));
        match result {
            Ok(container_id) => {
                self.catalog
                    .set_deployment_started(&deployment.id, &container_id)?;
                Ok(())
            }
            Err(err) => {
                self.catalog
                    .update_deployment_status(&deployment.id, RunState::Failed)?;
                Err(err)
            }
        }
    }

    /// Logs in to the image's registry when the owner has credentials
    /// configured. Public to the crate for the webhook pull path.
    pub(crate) fn registry_login(
        &self,
        runner: &dyn Runner,
        user_id: &str,
        image: &str,
    ) -> Result<(), EngineError> {
        let Some(registry) = token_registry(image) else {
            return Ok(());
        };
        let username = self.catalog.get_setting(user_id, REGISTRY_USERNAME_KEY)?;
        let token = self.catalog.get_setting(user_id, REGISTRY_TOKEN_KEY)?;
        if let (Some(username), Some(token)) = (username, token) {
            runner.run_with_input(&commands::registry_login(registry, &username), &token)?;
        }
        Ok(())
    }

    fn launch(
        &self,
        runner: &dyn Runner,
        service: &Service,
        node: &Node,
        container_name: &str,
    ) -> Result<String, EngineError> {
        let env = links::resolve_env(&self.catalog, service)?;

        self.registry_login(runner, &service.user_id, &service.image)?;

        let env_path = env_file_path(container_name);
        runner.write_file(&env_path, &links::render_env_file(&env))?;

        let mut run = RunCommand::new(container_name, &service.image)
            .publish(&service.ports)
            .env_file(&env_path)
            .volumes(&service.volumes)
            .restart_policy("unless-stopped");
        if let (Some(domain), true) = (&service.domain, node.traefik_enabled) {
            if let Some(first) = service.ports.first() {
                runner.run(&commands::network_create(TRAEFIK_NETWORK))?;
                run = run
                    .network(TRAEFIK_NETWORK)
                    .labels(traefik::proxy_labels(container_name, domain, first.container));
            }
        }
        if let Some(command) = &service.command {
            run = run.command(command);
        }

        let result = runner.run(&run.build());
        // The env file holds secrets; remove it whether or not the run
        // succeeded.
        if let Err(err) = runner.run(&format!("rm -f {}", quote(&env_path))) {
            debug!(error = %err, "could not remove temporary env file");
        }

        let output = result?;
        Ok(output.lines().last().unwrap_or_default().trim().to_string())
    }

    fn deployment_and_node(
        &self,
        user_id: &str,
        is_root: bool,
        deployment_id: &str,
    ) -> Result<(Deployment, Node), EngineError> {
        let deployment = self
            .catalog
            .get_deployment_for_user(deployment_id, user_id)?
            .ok_or(EngineError::NotFound)?;
        let node = self
            .catalog
            .get_node_for_user(&deployment.node_id, user_id, is_root)?
            .ok_or(EngineError::NotFound)?;
        Ok((deployment, node))
    }
}
