//! Deployment rows and the node-level port bookkeeping built on them.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::entity::{new_entity_id, Deployment, RunState};
use super::{parse_enum, Catalog, CatalogError};

const DEPLOYMENT_COLUMNS: &str = "id, user_id, service_id, node_id, container_name, \
     container_id, status, created_at, last_deployed_at";

fn row_to_deployment(row: &Row<'_>) -> rusqlite::Result<Deployment> {
    Ok(Deployment {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        service_id: row.get("service_id")?,
        node_id: row.get("node_id")?,
        container_name: row.get("container_name")?,
        container_id: row.get("container_id")?,
        status: parse_enum::<RunState>(row.get("status")?)?,
        created_at: row.get("created_at")?,
        last_deployed_at: row.get("last_deployed_at")?,
    })
}

impl Catalog {
    pub fn insert_deployment(&self, mut deployment: Deployment) -> Result<Deployment, CatalogError> {
        if deployment.id.is_empty() {
            deployment.id = new_entity_id();
        }
        self.lock().execute(
            &format!(
                "INSERT INTO deployments ({DEPLOYMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                deployment.id,
                deployment.user_id,
                deployment.service_id,
                deployment.node_id,
                deployment.container_name,
                deployment.container_id,
                deployment.status.as_str(),
                deployment.created_at,
                deployment.last_deployed_at,
            ],
        )?;
        Ok(deployment)
    }

    pub fn get_deployment_for_user(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Deployment>, CatalogError> {
        Ok(self
            .lock()
            .query_row(
                &format!(
                    "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                     WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                row_to_deployment,
            )
            .optional()?)
    }

    pub fn list_deployments(&self, user_id: &str) -> Result<Vec<Deployment>, CatalogError> {
        self.query_deployments(
            &format!(
                "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                 WHERE user_id = ?1 ORDER BY created_at"
            ),
            params![user_id],
        )
    }

    /// Running deployments of one service; the caller already owns the
    /// service row, so no extra user scoping is needed.
    pub fn list_running_deployments_for_service(
        &self,
        service_id: &str,
    ) -> Result<Vec<Deployment>, CatalogError> {
        self.query_deployments(
            &format!(
                "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                 WHERE service_id = ?1 AND status = 'running' ORDER BY created_at"
            ),
            params![service_id],
        )
    }

    /// Cross-user read used only by the reconciler.
    pub fn list_all_running_deployments(&self) -> Result<Vec<Deployment>, CatalogError> {
        self.query_deployments(
            &format!(
                "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                 WHERE status = 'running' ORDER BY created_at"
            ),
            rusqlite::params![],
        )
    }

    pub fn update_deployment_status(
        &self,
        id: &str,
        status: RunState,
    ) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE deployments SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    /// Records a successful container start.
    pub fn set_deployment_started(
        &self,
        id: &str,
        container_id: &str,
    ) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE deployments
             SET status = 'running', container_id = ?2, last_deployed_at = ?3
             WHERE id = ?1",
            params![id, container_id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn delete_deployment(&self, id: &str, user_id: &str) -> Result<bool, CatalogError> {
        let affected = self.lock().execute(
            "DELETE FROM deployments WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(affected > 0)
    }

    /// Whether any live deployment or stateful resource on the node already
    /// claims `port` on the host side. Best effort: the caller combines this
    /// with a live probe of the target's listen set.
    pub fn is_port_used_on_node(&self, node_id: &str, port: u16) -> Result<bool, CatalogError> {
        // Collect first, then resolve services: the connection mutex is not
        // reentrant.
        let service_ids: Vec<String> = {
            let conn = self.lock();
            let mut statement = conn.prepare(
                "SELECT DISTINCT service_id FROM deployments
                 WHERE node_id = ?1 AND status IN ('pending', 'running')",
            )?;
            let rows = statement.query_map(params![node_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for service_id in service_ids {
            if let Some(service) = self.get_service_any(&service_id)? {
                if service.ports.iter().any(|p| p.host == port) {
                    return Ok(true);
                }
            }
        }

        let resource_claims: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM stateful_resources
             WHERE node_id = ?1 AND status IN ('pending', 'running')
               AND (port = ?2 OR extra_port = ?2)",
            params![node_id, port],
            |row| row.get(0),
        )?;
        Ok(resource_claims > 0)
    }

    /// Every container name the catalog expects to exist on the node, used
    /// by the volume migrator to stop and restart workloads.
    pub fn list_container_names_on_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let mut names: Vec<String> = {
            let conn = self.lock();
            let mut statement = conn.prepare(
                "SELECT container_name FROM deployments
                 WHERE node_id = ?1 AND status IN ('pending', 'running', 'stopped')",
            )?;
            let rows = statement.query_map(params![node_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for resource in self.list_resources_on_node(node_id)? {
            names.extend(resource.container_names());
        }
        Ok(names)
    }

    fn query_deployments(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Deployment>, CatalogError> {
        let conn = self.lock();
        let mut statement = conn.prepare(sql)?;
        let rows = statement.query_map(params, row_to_deployment)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
