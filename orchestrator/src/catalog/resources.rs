//! Stateful resource rows (databases, caches, brokers, monitoring stacks,
//! object storages). One table, discriminated by kind; secrets are sealed
//! at rest.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::entity::{new_entity_id, ResourceKind, RunState, StatefulResource};
use super::{parse_enum, Catalog, CatalogError};

const RESOURCE_COLUMNS: &str = "id, user_id, kind, name, version, node_id, port, extra_port, \
     secret, container_name, status, created_at, last_deployed_at";

fn row_to_resource(row: &Row<'_>) -> rusqlite::Result<StatefulResource> {
    Ok(StatefulResource {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        kind: parse_enum::<ResourceKind>(row.get("kind")?)?,
        name: row.get("name")?,
        version: row.get("version")?,
        node_id: row.get("node_id")?,
        port: row.get("port")?,
        extra_port: row.get("extra_port")?,
        secret: row.get("secret")?,
        container_name: row.get("container_name")?,
        status: parse_enum::<RunState>(row.get("status")?)?,
        created_at: row.get("created_at")?,
        last_deployed_at: row.get("last_deployed_at")?,
    })
}

impl StatefulResource {
    /// All container names this row materializes as. Monitoring stacks run
    /// a grafana companion next to prometheus.
    pub fn container_names(&self) -> Vec<String> {
        match self.kind {
            ResourceKind::Monitoring => vec![
                self.container_name.clone(),
                format!("{}-grafana", self.container_name),
            ],
            _ => vec![self.container_name.clone()],
        }
    }
}

impl Catalog {
    fn open_resource(&self, mut resource: StatefulResource) -> Result<StatefulResource, CatalogError> {
        resource.secret = self.cipher().decrypt(&resource.secret)?;
        Ok(resource)
    }

    pub fn insert_resource(
        &self,
        mut resource: StatefulResource,
    ) -> Result<StatefulResource, CatalogError> {
        if resource.id.is_empty() {
            resource.id = new_entity_id();
        }
        let sealed = self.cipher().encrypt(&resource.secret)?;
        self.lock().execute(
            &format!(
                "INSERT INTO stateful_resources ({RESOURCE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                resource.id,
                resource.user_id,
                resource.kind.as_str(),
                resource.name,
                resource.version,
                resource.node_id,
                resource.port,
                resource.extra_port,
                sealed,
                resource.container_name,
                resource.status.as_str(),
                resource.created_at,
                resource.last_deployed_at,
            ],
        )?;
        Ok(resource)
    }

    pub fn get_resource_for_user(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<StatefulResource>, CatalogError> {
        let resource = self
            .lock()
            .query_row(
                &format!(
                    "SELECT {RESOURCE_COLUMNS} FROM stateful_resources
                     WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                row_to_resource,
            )
            .optional()?;
        resource.map(|r| self.open_resource(r)).transpose()
    }

    pub fn list_resources(
        &self,
        user_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<StatefulResource>, CatalogError> {
        self.query_resources(
            &format!(
                "SELECT {RESOURCE_COLUMNS} FROM stateful_resources
                 WHERE user_id = ?1 AND kind = ?2 ORDER BY created_at"
            ),
            params![user_id, kind.as_str()],
        )
    }

    /// Cross-user read used only by the reconciler.
    pub fn list_all_running_resources(&self) -> Result<Vec<StatefulResource>, CatalogError> {
        self.query_resources(
            &format!(
                "SELECT {RESOURCE_COLUMNS} FROM stateful_resources
                 WHERE status = 'running' ORDER BY created_at"
            ),
            rusqlite::params![],
        )
    }

    pub(crate) fn list_resources_on_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<StatefulResource>, CatalogError> {
        self.query_resources(
            &format!(
                "SELECT {RESOURCE_COLUMNS} FROM stateful_resources
                 WHERE node_id = ?1 AND status IN ('pending', 'running', 'stopped')
                 ORDER BY created_at"
            ),
            params![node_id],
        )
    }

    pub fn update_resource_status(&self, id: &str, status: RunState) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE stateful_resources SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn set_resource_started(&self, id: &str) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE stateful_resources
             SET status = 'running', last_deployed_at = ?2 WHERE id = ?1",
            params![id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn delete_resource(&self, id: &str, user_id: &str) -> Result<bool, CatalogError> {
        let affected = self.lock().execute(
            "DELETE FROM stateful_resources WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(affected > 0)
    }

    fn query_resources(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StatefulResource>, CatalogError> {
        let conn = self.lock();
        let mut statement = conn.prepare(sql)?;
        let rows = statement.query_map(params, row_to_resource)?;
        let raw: Vec<StatefulResource> = rows.collect::<rusqlite::Result<_>>()?;
        drop(statement);
        drop(conn);
        raw.into_iter().map(|r| self.open_resource(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{keyed_catalog, some_node, some_user};

    fn some_resource(user_id: &str, node_id: &str, kind: ResourceKind) -> StatefulResource {
        StatefulResource {
            id: String::new(),
            user_id: user_id.to_string(),
            kind,
            name: "db1".to_string(),
            version: "16".to_string(),
            node_id: node_id.to_string(),
            port: 5432,
            extra_port: None,
            secret: "p".to_string(),
            container_name: "localisprod-database-db1-00c0ffee".to_string(),
            status: RunState::Running,
            created_at: Utc::now(),
            last_deployed_at: None,
        }
    }

    #[test]
    fn test_secret_round_trips_through_cipher() {
        let catalog = keyed_catalog();
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");
        let resource = catalog
            .insert_resource(some_resource(&user.id, &node.id, ResourceKind::Database))
            .unwrap();

        let raw: String = catalog
            .lock()
            .query_row(
                "SELECT secret FROM stateful_resources WHERE id = ?1",
                params![resource.id],
                |row| row.get(0),
            )
            .unwrap();
        assert!(raw.starts_with("enc:v1:"));

        let read = catalog
            .get_resource_for_user(&resource.id, &user.id)
            .unwrap()
            .unwrap();
        assert_eq!("p", read.secret);
    }

    #[test]
    fn test_listing_scopes_by_user_and_kind() {
        let catalog = keyed_catalog();
        let owner = some_user(&catalog, "owner");
        let other = some_user(&catalog, "other");
        let node = some_node(&catalog, &owner, "web-1");

        catalog
            .insert_resource(some_resource(&owner.id, &node.id, ResourceKind::Database))
            .unwrap();

        assert_eq!(
            1,
            catalog
                .list_resources(&owner.id, ResourceKind::Database)
                .unwrap()
                .len()
        );
        assert!(catalog
            .list_resources(&owner.id, ResourceKind::Cache)
            .unwrap()
            .is_empty());
        assert!(catalog
            .list_resources(&other.id, ResourceKind::Database)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_monitoring_row_expands_to_both_containers() {
        let resource = StatefulResource {
            kind: ResourceKind::Monitoring,
            container_name: "localisprod-monitoring-m1-00c0ffee".to_string(),
            ..some_resource("u", "n", ResourceKind::Monitoring)
        };
        assert_eq!(
            vec![
                "localisprod-monitoring-m1-00c0ffee".to_string(),
                "localisprod-monitoring-m1-00c0ffee-grafana".to_string(),
            ],
            resource.container_names()
        );
    }

    #[test]
    fn test_status_flip_round_trip() {
        let catalog = keyed_catalog();
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");
        let resource = catalog
            .insert_resource(some_resource(&user.id, &node.id, ResourceKind::Cache))
            .unwrap();

        catalog
            .update_resource_status(&resource.id, RunState::Stopped)
            .unwrap();
        assert!(catalog.list_all_running_resources().unwrap().is_empty());

        catalog.set_resource_started(&resource.id).unwrap();
        let read = catalog
            .get_resource_for_user(&resource.id, &user.id)
            .unwrap()
            .unwrap();
        assert_eq!(RunState::Running, read.status);
        assert!(read.last_deployed_at.is_some());
    }
}
