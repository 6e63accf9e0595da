//! Background reconciliation of observed container/node state against the
//! catalog.
//!
//! Two cooperative loops run as named threads: an image-freshness check
//! that pulls and replaces running deployments when the registry has a
//! newer layer, and a health check that pings nodes and inspects the
//! containers of running deployments and stateful resources. Both observe
//! the process shutdown signal and exit cleanly.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::entity::{NodeStatus, RunState, StatefulResource};
use crate::catalog::Catalog;
use crate::deployment::DeploymentEngine;
use crate::docker::commands;
use crate::runner::factory::RunnerSource;
use crate::runner::RunnerError;
use crate::utils::background::BackgroundTask;
use crate::utils::shutdown::ShutdownBroadcaster;

/// Marker docker prints when a pull actually fetched a newer layer.
const NEWER_IMAGE_MARKER: &str = "Downloaded newer image";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub image_check_interval: Duration,
    pub health_check_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            image_check_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

pub struct Reconciler {
    catalog: Arc<Catalog>,
    engine: Arc<DeploymentEngine>,
    runners: Arc<dyn RunnerSource>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<Catalog>,
        engine: Arc<DeploymentEngine>,
        runners: Arc<dyn RunnerSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            catalog,
            engine,
            runners,
            config,
        }
    }

    /// Spawns both loops; they stop when `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: &ShutdownBroadcaster) -> Vec<BackgroundTask> {
        let image_interval = self.config.image_check_interval;
        let health_interval = self.config.health_check_interval;

        let image = {
            let reconciler = self.clone();
            BackgroundTask::spawn("image-check", shutdown.subscribe(), move |signal| loop {
                reconciler.check_images();
                if signal.is_cancelled(image_interval) {
                    break;
                }
            })
        };
        let health = BackgroundTask::spawn("health-check", shutdown.subscribe(), move |signal| {
            loop {
                self.check_health();
                if signal.is_cancelled(health_interval) {
                    break;
                }
            }
        });
        info!("reconciler loops started");
        vec![image, health]
    }

    /// Pulls the image of every running deployment and replaces the
    /// container when a newer layer was fetched. Any failure marks the
    /// deployment `failed`.
    pub fn check_images(&self) {
        let deployments = match self.catalog.list_all_running_deployments() {
            Ok(deployments) => deployments,
            Err(err) => {
                warn!(error = %err, "image check could not list deployments");
                return;
            }
        };

        for deployment in deployments {
            let context = match self.load_context(&deployment.service_id, &deployment.node_id) {
                Some(context) => context,
                None => continue,
            };
            let (service, node) = context;
            let runner = self.runners.runner_for(&node);

            let result = self
                .engine
                .registry_login(runner.as_ref(), &deployment.user_id, &service.image)
                .and_then(|_| Ok(runner.run(&commands::pull(&service.image))?))
                .and_then(|output| {
                    if output.contains(NEWER_IMAGE_MARKER) {
                        debug!(image = %service.image, container = %deployment.container_name,
                            "newer image available, replacing container");
                        self.engine.redeploy(&service, &node, &deployment)?;
                    }
                    Ok(())
                });
            if let Err(err) = result {
                warn!(error = %err, deployment = %deployment.id, "image check failed");
                let _ = self
                    .catalog
                    .update_deployment_status(&deployment.id, RunState::Failed);
            }
        }
    }

    /// Pings nodes and inspects running containers. Transport failures on
    /// inspection are transient and flip nothing; a ping failure marks the
    /// node `offline`.
    pub fn check_health(&self) {
        match self.catalog.list_all_nodes() {
            Ok(nodes) => {
                for node in nodes {
                    let runner = self.runners.runner_for(&node);
                    let status = match runner.ping() {
                        Ok(()) => NodeStatus::Online,
                        Err(err) => {
                            debug!(node = %node.name, error = %err, "node ping failed");
                            NodeStatus::Offline
                        }
                    };
                    if status != node.status {
                        let _ = self.catalog.update_node_status(&node.id, status);
                    }
                }
            }
            Err(err) => warn!(error = %err, "health check could not list nodes"),
        }

        match self.catalog.list_all_running_deployments() {
            Ok(deployments) => {
                for deployment in deployments {
                    if let Some(state) = self.observe_container(&deployment.node_id, &deployment.container_name)
                    {
                        if state != RunState::Running {
                            let _ = self
                                .catalog
                                .update_deployment_status(&deployment.id, state);
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "health check could not list deployments"),
        }

        match self.catalog.list_all_running_resources() {
            Ok(resources) => {
                for resource in resources {
                    self.observe_resource(&resource);
                }
            }
            Err(err) => warn!(error = %err, "health check could not list resources"),
        }
    }

    fn observe_resource(&self, resource: &StatefulResource) {
        if let Some(state) = self.observe_container(&resource.node_id, &resource.container_name) {
            if state != RunState::Running {
                let _ = self.catalog.update_resource_status(&resource.id, state);
            }
        }
    }

    /// `None` means "no observation" (node gone or transport failure);
    /// nothing is flipped in that case.
    fn observe_container(&self, node_id: &str, container_name: &str) -> Option<RunState> {
        let node = self.catalog.get_node_any(node_id).ok().flatten()?;
        let runner = self.runners.runner_for(&node);
        match runner.run(&commands::inspect_status(container_name)) {
            Ok(output) if output.trim() == "running" => Some(RunState::Running),
            Ok(_) => Some(RunState::Stopped),
            Err(RunnerError::Command { .. }) => Some(RunState::Stopped),
            Err(err) => {
                debug!(container = %container_name, error = %err,
                    "container inspection failed transiently");
                None
            }
        }
    }

    fn load_context(
        &self,
        service_id: &str,
        node_id: &str,
    ) -> Option<(crate::catalog::entity::Service, crate::catalog::entity::Node)> {
        let service = self.catalog.get_service_any(service_id).ok().flatten()?;
        let node = self.catalog.get_node_any(node_id).ok().flatten()?;
        Some((service, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entity::{Deployment, PortMapping, ResourceKind, Service};
    use crate::catalog::test_support::{empty_catalog, some_node, some_user};
    use crate::runner::factory::MockRunnerSource;
    use crate::runner::{MockRunner, Runner};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn reconciler_with(catalog: Arc<Catalog>, runner: MockRunner) -> Reconciler {
        let runner = Arc::new(runner);
        let mut source = MockRunnerSource::new();
        source
            .expect_runner_for()
            .returning(move |_| runner.clone() as Arc<dyn Runner>);
        let source: Arc<dyn RunnerSource> = Arc::new(source);
        let engine = Arc::new(DeploymentEngine::new(catalog.clone(), source.clone()));
        Reconciler::new(catalog, engine, source, ReconcilerConfig::default())
    }

    fn seed_running_deployment(catalog: &Arc<Catalog>) -> (String, Deployment) {
        let user = some_user(catalog, "u1");
        let node = some_node(catalog, &user, "web-1");
        let service = catalog
            .insert_service(Service {
                id: String::new(),
                user_id: user.id.clone(),
                name: "api".to_string(),
                image: "nginx:latest".to_string(),
                build_path: None,
                env: BTreeMap::new(),
                ports: Vec::<PortMapping>::new(),
                volumes: Vec::new(),
                command: None,
                github_repo: None,
                domain: None,
                database_ids: Vec::new(),
                cache_ids: Vec::new(),
                kafka_ids: Vec::new(),
                monitoring_ids: Vec::new(),
                created_at: Utc::now(),
            })
            .unwrap();
        let deployment = catalog
            .insert_deployment(Deployment {
                id: String::new(),
                user_id: user.id.clone(),
                service_id: service.id,
                node_id: node.id,
                container_name: "localisprod-api-00c0ffee".to_string(),
                container_id: Some("cid".to_string()),
                status: RunState::Running,
                created_at: Utc::now(),
                last_deployed_at: None,
            })
            .unwrap();
        (user.id, deployment)
    }

    #[test]
    fn test_ping_failure_marks_node_offline() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");

        let mut runner = MockRunner::new();
        runner
            .expect_ping()
            .returning(|| Err(RunnerError::Transport("dial tcp".to_string())));

        let reconciler = reconciler_with(catalog.clone(), runner);
        reconciler.check_health();

        assert_eq!(
            NodeStatus::Offline,
            catalog.get_node_any(&node.id).unwrap().unwrap().status
        );
    }

    #[test]
    fn test_non_running_container_is_marked_stopped() {
        let catalog = Arc::new(empty_catalog());
        let (user_id, deployment) = seed_running_deployment(&catalog);

        let mut runner = MockRunner::new();
        runner.expect_ping().returning(|| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker inspect"))
            .returning(|_| Ok("exited".to_string()));

        let reconciler = reconciler_with(catalog.clone(), runner);
        reconciler.check_health();

        assert_eq!(
            RunState::Stopped,
            catalog
                .get_deployment_for_user(&deployment.id, &user_id)
                .unwrap()
                .unwrap()
                .status
        );
    }

    #[test]
    fn test_transport_failure_flips_nothing() {
        let catalog = Arc::new(empty_catalog());
        let (user_id, deployment) = seed_running_deployment(&catalog);

        let mut runner = MockRunner::new();
        // The node answers pings but the inspect session drops.
        runner.expect_ping().returning(|| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker inspect"))
            .returning(|_| Err(RunnerError::Transport("session".to_string())));

        let reconciler = reconciler_with(catalog.clone(), runner);
        reconciler.check_health();

        assert_eq!(
            RunState::Running,
            catalog
                .get_deployment_for_user(&deployment.id, &user_id)
                .unwrap()
                .unwrap()
                .status
        );
    }

    #[test]
    fn test_stopped_resource_is_observed() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");
        let resource = catalog
            .insert_resource(crate::catalog::entity::StatefulResource {
                id: String::new(),
                user_id: user.id.clone(),
                kind: ResourceKind::Database,
                name: "db1".to_string(),
                version: "16".to_string(),
                node_id: node.id.clone(),
                port: 5432,
                extra_port: None,
                secret: "p".to_string(),
                container_name: "localisprod-database-db1-00c0ffee".to_string(),
                status: RunState::Running,
                created_at: Utc::now(),
                last_deployed_at: None,
            })
            .unwrap();

        let mut runner = MockRunner::new();
        runner.expect_ping().returning(|| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker inspect"))
            .returning(|_| {
                Err(RunnerError::Command {
                    status: 1,
                    output: "No such object".to_string(),
                })
            });

        let reconciler = reconciler_with(catalog.clone(), runner);
        reconciler.check_health();

        assert_eq!(
            RunState::Stopped,
            catalog
                .get_resource_for_user(&resource.id, &user.id)
                .unwrap()
                .unwrap()
                .status
        );
    }

    #[test]
    fn test_fresh_image_triggers_redeploy() {
        let catalog = Arc::new(empty_catalog());
        let (_, deployment) = seed_running_deployment(&catalog);

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|c| c == "docker pull 'nginx:latest'")
            .once()
            .returning(|_| Ok("Downloaded newer image for nginx:latest".to_string()));
        runner
            .expect_run()
            .withf(move |c| c.contains("docker stop 'localisprod-api-00c0ffee'"))
            .once()
            .returning(|_| Ok(String::new()));
        runner.expect_write_file().returning(|_, _| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker run -d"))
            .once()
            .returning(|_| Ok("new-cid".to_string()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("rm -f"))
            .returning(|_| Ok(String::new()));

        let reconciler = reconciler_with(catalog.clone(), runner);
        reconciler.check_images();

        let refreshed = catalog.list_all_running_deployments().unwrap();
        assert_eq!(Some("new-cid".to_string()), refreshed[0].container_id);
        assert_eq!(deployment.id, refreshed[0].id);
    }

    #[test]
    fn test_up_to_date_image_is_left_alone() {
        let catalog = Arc::new(empty_catalog());
        seed_running_deployment(&catalog);

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker pull"))
            .once()
            .returning(|_| Ok("Image is up to date for nginx:latest".to_string()));

        let reconciler = reconciler_with(catalog.clone(), runner);
        reconciler.check_images();

        assert_eq!(1, catalog.list_all_running_deployments().unwrap().len());
    }

    #[test]
    fn test_loops_observe_shutdown() {
        let catalog = Arc::new(empty_catalog());
        // The seeded management node is pinged on every health tick.
        let mut runner = MockRunner::new();
        runner.expect_ping().returning(|| Ok(()));
        let reconciler = Arc::new(reconciler_with(catalog, runner));
        let shutdown = ShutdownBroadcaster::new();

        let tasks = reconciler.start(&shutdown);
        shutdown.broadcast();
        for task in tasks {
            task.join();
        }
    }
}
