//! Node rows.
//!
//! Key material is sealed before insert and opened on read. Ownership is
//! strict: `get_node_for_user` matches rows owned by the user and,
//! additionally for root, the system-owned management row.

use rusqlite::{params, OptionalExtension, Row};

use super::entity::{new_entity_id, Node, NodeStatus};
use super::{parse_enum, Catalog, CatalogError};

const NODE_COLUMNS: &str = "id, user_id, name, host, port, username, private_key, status, \
     is_local, traefik_enabled, provider, provider_region, provider_instance_id, created_at";

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        host: row.get("host")?,
        port: row.get("port")?,
        username: row.get("username")?,
        private_key: row.get("private_key")?,
        status: parse_enum::<NodeStatus>(row.get("status")?)?,
        is_local: row.get("is_local")?,
        traefik_enabled: row.get("traefik_enabled")?,
        provider: row.get("provider")?,
        provider_region: row.get("provider_region")?,
        provider_instance_id: row.get("provider_instance_id")?,
        created_at: row.get("created_at")?,
    })
}

impl Catalog {
    fn open_node(&self, mut node: Node) -> Result<Node, CatalogError> {
        node.private_key = self.cipher().decrypt(&node.private_key)?;
        Ok(node)
    }

    /// Inserts the node, assigning a fresh id, and returns the stored row.
    pub fn insert_node(&self, mut node: Node) -> Result<Node, CatalogError> {
        if node.id.is_empty() {
            node.id = new_entity_id();
        }
        let sealed_key = self.cipher().encrypt(&node.private_key)?;
        self.lock().execute(
            &format!(
                "INSERT INTO nodes ({NODE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                node.id,
                node.user_id,
                node.name,
                node.host,
                node.port,
                node.username,
                sealed_key,
                node.status.as_str(),
                node.is_local,
                node.traefik_enabled,
                node.provider,
                node.provider_region,
                node.provider_instance_id,
                node.created_at,
            ],
        )?;
        Ok(node)
    }

    /// Matches rows owned by `user_id`; the management row additionally
    /// matches when `is_root`.
    pub fn get_node_for_user(
        &self,
        id: &str,
        user_id: &str,
        is_root: bool,
    ) -> Result<Option<Node>, CatalogError> {
        let node = self
            .lock()
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE id = ?1 AND (user_id = ?2 OR (?3 AND user_id IS NULL))"
                ),
                params![id, user_id, is_root],
                row_to_node,
            )
            .optional()?;
        node.map(|n| self.open_node(n)).transpose()
    }

    pub fn list_nodes(&self, user_id: &str, is_root: bool) -> Result<Vec<Node>, CatalogError> {
        let conn = self.lock();
        let mut statement = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE user_id = ?1 OR (?2 AND user_id IS NULL)
             ORDER BY created_at"
        ))?;
        let rows = statement.query_map(params![user_id, is_root], row_to_node)?;
        collect_nodes(rows, |n| self.open_node(n))
    }

    /// Cross-user read used only by the reconciler.
    pub fn list_all_nodes(&self) -> Result<Vec<Node>, CatalogError> {
        let conn = self.lock();
        let mut statement =
            conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY created_at"))?;
        let rows = statement.query_map([], row_to_node)?;
        collect_nodes(rows, |n| self.open_node(n))
    }

    /// Unscoped read for internal paths that already hold an owned row
    /// referencing the node (reconciler, link resolution).
    pub(crate) fn get_node_any(&self, id: &str) -> Result<Option<Node>, CatalogError> {
        let node = self
            .lock()
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                params![id],
                row_to_node,
            )
            .optional()?;
        node.map(|n| self.open_node(n)).transpose()
    }

    pub fn update_node_status(&self, id: &str, status: NodeStatus) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE nodes SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn set_node_traefik_enabled(&self, id: &str, enabled: bool) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE nodes SET traefik_enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        Ok(())
    }

    /// Deletes an owned node. The management row has no owner and therefore
    /// never matches. Returns whether a row was removed.
    pub fn delete_node(&self, id: &str, user_id: &str) -> Result<bool, CatalogError> {
        let affected = self.lock().execute(
            "DELETE FROM nodes WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(affected > 0)
    }
}

fn collect_nodes<I, F>(rows: I, mut open: F) -> Result<Vec<Node>, CatalogError>
where
    I: Iterator<Item = rusqlite::Result<Node>>,
    F: FnMut(Node) -> Result<Node, CatalogError>,
{
    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(open(row?)?);
    }
    Ok(nodes)
}
