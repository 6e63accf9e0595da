//! Creates and removes stateful resources on nodes.
//!
//! Mirrors the deployment engine's create order: ownership lookups, port
//! pre-checks against both the catalog and the target's listen set, a
//! `pending` row, then the container run(s) with an 0600 env file that is
//! removed in every exit path.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info_span, warn};

use crate::catalog::entity::{
    is_valid_service_name, ResourceKind, RunState, StatefulResource,
};
use crate::catalog::Catalog;
use crate::deployment::engine::env_file_path;
use crate::deployment::links::render_env_file;
use crate::docker::commands::{self, RunCommand};
use crate::docker::shell::quote;
use crate::runner::factory::RunnerSource;
use crate::runner::{Runner, RunnerError};
use crate::utils::naming::{sanitize, short_hex};

use super::blueprint::{self, ContainerBlueprint};
use super::ResourceError;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateResourceRequest {
    pub name: String,
    pub version: Option<String>,
    pub node_id: String,
    pub port: Option<u16>,
    pub extra_port: Option<u16>,
    pub password: Option<String>,
}

#[derive(Debug)]
pub enum CreateResourceOutcome {
    Created(StatefulResource),
    Failed {
        resource: StatefulResource,
        error: String,
        output: String,
    },
}

pub struct ResourceProvisioner {
    catalog: Arc<Catalog>,
    runners: Arc<dyn RunnerSource>,
}

impl ResourceProvisioner {
    pub fn new(catalog: Arc<Catalog>, runners: Arc<dyn RunnerSource>) -> Self {
        Self { catalog, runners }
    }

    pub fn create(
        &self,
        user_id: &str,
        is_root: bool,
        kind: ResourceKind,
        request: CreateResourceRequest,
    ) -> Result<CreateResourceOutcome, ResourceError> {
        if !is_valid_service_name(&request.name) {
            return Err(ResourceError::InvalidName);
        }
        let node = self
            .catalog
            .get_node_for_user(&request.node_id, user_id, is_root)?
            .ok_or(ResourceError::NotFound)?;
        if node.is_local && !is_root {
            return Err(ResourceError::LocalNodeForbidden);
        }

        let span = info_span!("resource", kind = kind.as_str(), name = %request.name);
        let _guard = span.enter();

        let port = request.port.unwrap_or_else(|| blueprint::default_port(kind));
        let extra_port = request.extra_port.or_else(|| blueprint::default_extra_port(kind));

        let runner = self.runners.runner_for(&node);
        for candidate in std::iter::once(port).chain(extra_port) {
            if candidate == 0 {
                return Err(ResourceError::InvalidPort(candidate));
            }
            if self.catalog.is_port_used_on_node(&node.id, candidate)?
                || runner.is_port_in_use(candidate)?
            {
                return Err(ResourceError::PortConflict {
                    port: candidate,
                    node: node.name.clone(),
                });
            }
        }

        let secret = request.password.clone().unwrap_or_else(generated_secret);
        let resource = self.catalog.insert_resource(StatefulResource {
            id: String::new(),
            user_id: user_id.to_string(),
            kind,
            name: request.name.clone(),
            version: request
                .version
                .clone()
                .unwrap_or_else(|| blueprint::default_version(kind).to_string()),
            node_id: node.id.clone(),
            port,
            extra_port,
            secret,
            container_name: format!(
                "localisprod-{}-{}-{}",
                kind.as_str(),
                sanitize(&request.name),
                short_hex()
            ),
            status: RunState::Pending,
            created_at: Utc::now(),
            last_deployed_at: None,
        })?;

        let blueprints = blueprint::blueprints_for(&resource, &node.host);
        match self.run_blueprints(runner.as_ref(), &blueprints) {
            Ok(()) => {
                self.catalog.set_resource_started(&resource.id)?;
                let started = self
                    .catalog
                    .get_resource_for_user(&resource.id, user_id)?
                    .ok_or(ResourceError::NotFound)?;
                Ok(CreateResourceOutcome::Created(started))
            }
            Err(err) => {
                self.catalog
                    .update_resource_status(&resource.id, RunState::Failed)?;
                match err {
                    ResourceError::Runner(RunnerError::Command { status, output }) => {
                        Ok(CreateResourceOutcome::Failed {
                            resource: StatefulResource {
                                status: RunState::Failed,
                                ..resource
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

    fn run_blueprints(
        &self,
        runner: &dyn Runner,
        blueprints: &[ContainerBlueprint],
    ) -> Result<(), ResourceError> {
        for blueprint in blueprints {
            for volume in &blueprint.volumes {
                if let Some((volume_name, _)) = volume.split_once(':') {
                    runner.run(&commands::volume_create(volume_name))?;
                }
            }

            let mut run = RunCommand::new(&blueprint.name, &blueprint.image)
                .publish(&blueprint.ports)
                .volumes(&blueprint.volumes)
                .restart_policy("unless-stopped")
                .args(&blueprint.args);

            let env_path = (!blueprint.env.is_empty()).then(|| env_file_path(&blueprint.name));
            if let Some(env_path) = &env_path {
                runner.write_file(env_path, &render_env_file(&blueprint.env))?;
                run = run.env_file(env_path);
            }

            let result = runner.run(&run.build());
            if let Some(env_path) = &env_path {
                if let Err(err) = runner.run(&format!("rm -f {}", quote(env_path))) {
                    debug!(error = %err, "could not remove temporary env file");
                }
            }
            result?;
        }
        Ok(())
    }

    /// Stop/remove errors are suppressed, matching deployment delete.
    pub fn delete(
        &self,
        user_id: &str,
        is_root: bool,
        kind: ResourceKind,
        id: &str,
    ) -> Result<(), ResourceError> {
        let resource = self
            .catalog
            .get_resource_for_user(id, user_id)?
            .filter(|r| r.kind == kind)
            .ok_or(ResourceError::NotFound)?;
        let node = self
            .catalog
            .get_node_for_user(&resource.node_id, user_id, is_root)?
            .ok_or(ResourceError::NotFound)?;

        let runner = self.runners.runner_for(&node);
        for container in resource.container_names() {
            if let Err(err) = runner.run(&commands::stop_and_remove(&container)) {
                warn!(
                    error = %err,
                    container = %container,
                    "could not stop container during delete; removing catalog row anyway"
                );
            }
        }
        self.catalog.delete_resource(&resource.id, user_id)?;
        Ok(())
    }
}

fn generated_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{empty_catalog, some_node, some_user};
    use crate::runner::factory::MockRunnerSource;
    use crate::runner::MockRunner;
    use assert_matches::assert_matches;

    fn provisioner_with(catalog: Arc<Catalog>, runner: MockRunner) -> ResourceProvisioner {
        let runner = Arc::new(runner);
        let mut source = MockRunnerSource::new();
        source
            .expect_runner_for()
            .returning(move |_| runner.clone() as Arc<dyn Runner>);
        ResourceProvisioner::new(catalog, Arc::new(source))
    }

    fn request(name: &str, node_id: &str) -> CreateResourceRequest {
        CreateResourceRequest {
            name: name.to_string(),
            version: None,
            node_id: node_id.to_string(),
            port: None,
            extra_port: None,
            password: Some("p".to_string()),
        }
    }

    #[test]
    fn test_database_create_runs_container_and_records_row() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "n");

        let mut runner = MockRunner::new();
        runner.expect_is_port_in_use().returning(|_| Ok(false));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker volume create 'localisprod-database-db1-"))
            .returning(|_| Ok(String::new()));
        runner
            .expect_write_file()
            .withf(|_, contents| contents.contains("POSTGRES_PASSWORD=p\n"))
            .returning(|_, _| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker run -d --name 'localisprod-database-db1-"))
            .returning(|_| Ok("cid".to_string()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("rm -f"))
            .returning(|_| Ok(String::new()));

        let provisioner = provisioner_with(catalog.clone(), runner);
        let outcome = provisioner
            .create(&user.id, false, ResourceKind::Database, request("db1", &node.id))
            .unwrap();

        let resource = assert_matches!(outcome, CreateResourceOutcome::Created(r) => r);
        assert_eq!(RunState::Running, resource.status);
        assert_eq!(5432, resource.port);
        assert_eq!("16", resource.version);
    }

    #[test]
    fn test_port_conflict_rejects_before_insert() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "n");

        let mut runner = MockRunner::new();
        runner.expect_is_port_in_use().returning(|_| Ok(true));

        let provisioner = provisioner_with(catalog.clone(), runner);
        assert_matches!(
            provisioner.create(&user.id, false, ResourceKind::Cache, request("c1", &node.id)),
            Err(ResourceError::PortConflict { port: 6379, .. })
        );
        assert!(catalog
            .list_resources(&user.id, ResourceKind::Cache)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_bad_name_is_rejected() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "n");

        let provisioner = provisioner_with(catalog.clone(), MockRunner::new());
        assert_matches!(
            provisioner.create(
                &user.id,
                false,
                ResourceKind::Database,
                request("bad name!", &node.id)
            ),
            Err(ResourceError::InvalidName)
        );
    }

    #[test]
    fn test_monitoring_runs_both_containers() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "n");

        let mut runner = MockRunner::new();
        runner.expect_is_port_in_use().returning(|_| Ok(false));
        runner.expect_write_file().returning(|_, _| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker run -d --name 'localisprod-monitoring-mon-"))
            .times(2)
            .returning(|_| Ok("cid".to_string()));
        runner
            .expect_run()
            .withf(|c| !c.starts_with("docker run"))
            .returning(|_| Ok(String::new()));

        let provisioner = provisioner_with(catalog.clone(), runner);
        let outcome = provisioner
            .create(&user.id, false, ResourceKind::Monitoring, request("mon", &node.id))
            .unwrap();
        let resource = assert_matches!(outcome, CreateResourceOutcome::Created(r) => r);
        assert_eq!(Some(3000), resource.extra_port);
    }

    #[test]
    fn test_failed_container_marks_row_failed() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "n");

        let mut runner = MockRunner::new();
        runner.expect_is_port_in_use().returning(|_| Ok(false));
        runner.expect_write_file().returning(|_, _| Ok(()));
        runner
            .expect_run()
            .withf(|c| c.starts_with("docker run"))
            .returning(|_| {
                Err(RunnerError::Command {
                    status: 125,
                    output: "port is already allocated".to_string(),
                })
            });
        runner
            .expect_run()
            .withf(|c| !c.starts_with("docker run"))
            .returning(|_| Ok(String::new()));

        let provisioner = provisioner_with(catalog.clone(), runner);
        let outcome = provisioner
            .create(&user.id, false, ResourceKind::Database, request("db1", &node.id))
            .unwrap();

        let resource = assert_matches!(outcome, CreateResourceOutcome::Failed { resource, .. } => resource);
        let stored = catalog
            .get_resource_for_user(&resource.id, &user.id)
            .unwrap()
            .unwrap();
        assert_eq!(RunState::Failed, stored.status);
    }

    #[test]
    fn test_delete_removes_all_containers_and_row() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "n");
        let resource = catalog
            .insert_resource(StatefulResource {
                id: String::new(),
                user_id: user.id.clone(),
                kind: ResourceKind::Monitoring,
                name: "mon".to_string(),
                version: "v2.53.0".to_string(),
                node_id: node.id.clone(),
                port: 9090,
                extra_port: Some(3000),
                secret: "p".to_string(),
                container_name: "localisprod-monitoring-mon-00c0ffee".to_string(),
                status: RunState::Running,
                created_at: Utc::now(),
                last_deployed_at: None,
            })
            .unwrap();

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|c| c.contains("docker stop"))
            .times(2)
            .returning(|_| Ok(String::new()));

        let provisioner = provisioner_with(catalog.clone(), runner);
        provisioner
            .delete(&user.id, false, ResourceKind::Monitoring, &resource.id)
            .unwrap();
        assert!(catalog
            .get_resource_for_user(&resource.id, &user.id)
            .unwrap()
            .is_none());
    }
}
