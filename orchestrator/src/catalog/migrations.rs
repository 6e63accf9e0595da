//! Node volume migration rows.
//!
//! At most one non-terminal migration may exist per node; the insert
//! enforces that inside the write transaction so racing requests cannot
//! both slip through.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::entity::{new_entity_id, MigrationStatus, NodeVolumeMigration};
use super::{parse_enum, Catalog, CatalogError};

const MIGRATION_COLUMNS: &str = "id, user_id, node_id, mount_path, size_gb, \
     provider_volume_id, device_path, status, error, created_at, updated_at";

const TERMINAL_STATES: &str = "('completed', 'rolled_back', 'failed')";

fn row_to_migration(row: &Row<'_>) -> rusqlite::Result<NodeVolumeMigration> {
    Ok(NodeVolumeMigration {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        node_id: row.get("node_id")?,
        mount_path: row.get("mount_path")?,
        size_gb: row.get("size_gb")?,
        provider_volume_id: row.get("provider_volume_id")?,
        device_path: row.get("device_path")?,
        status: parse_enum::<MigrationStatus>(row.get("status")?)?,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Catalog {
    /// Inserts a new migration in `pending`, rejecting with
    /// [`CatalogError::MigrationInProgress`] while the node still has a
    /// non-terminal one.
    pub fn insert_migration(
        &self,
        mut migration: NodeVolumeMigration,
    ) -> Result<NodeVolumeMigration, CatalogError> {
        if migration.id.is_empty() {
            migration.id = new_entity_id();
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let active: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM node_volume_migrations
                 WHERE node_id = ?1 AND status NOT IN {TERMINAL_STATES}"
            ),
            params![migration.node_id],
            |row| row.get(0),
        )?;
        if active > 0 {
            return Err(CatalogError::MigrationInProgress);
        }

        tx.execute(
            &format!(
                "INSERT INTO node_volume_migrations ({MIGRATION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                migration.id,
                migration.user_id,
                migration.node_id,
                migration.mount_path,
                migration.size_gb,
                migration.provider_volume_id,
                migration.device_path,
                migration.status.as_str(),
                migration.error,
                migration.created_at,
                migration.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(migration)
    }

    pub fn get_migration(&self, id: &str) -> Result<Option<NodeVolumeMigration>, CatalogError> {
        Ok(self
            .lock()
            .query_row(
                &format!("SELECT {MIGRATION_COLUMNS} FROM node_volume_migrations WHERE id = ?1"),
                params![id],
                row_to_migration,
            )
            .optional()?)
    }

    pub fn get_active_migration(
        &self,
        node_id: &str,
    ) -> Result<Option<NodeVolumeMigration>, CatalogError> {
        Ok(self
            .lock()
            .query_row(
                &format!(
                    "SELECT {MIGRATION_COLUMNS} FROM node_volume_migrations
                     WHERE node_id = ?1 AND status NOT IN {TERMINAL_STATES}
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![node_id],
                row_to_migration,
            )
            .optional()?)
    }

    pub fn get_latest_migration(
        &self,
        node_id: &str,
    ) -> Result<Option<NodeVolumeMigration>, CatalogError> {
        Ok(self
            .lock()
            .query_row(
                &format!(
                    "SELECT {MIGRATION_COLUMNS} FROM node_volume_migrations
                     WHERE node_id = ?1 ORDER BY created_at DESC LIMIT 1"
                ),
                params![node_id],
                row_to_migration,
            )
            .optional()?)
    }

    pub fn update_migration_status(
        &self,
        id: &str,
        status: MigrationStatus,
    ) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE node_volume_migrations SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now()],
        )?;
        Ok(())
    }

    pub fn set_migration_error(&self, id: &str, error: &str) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE node_volume_migrations SET error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, Utc::now()],
        )?;
        Ok(())
    }

    pub fn update_migration_provider_refs(
        &self,
        id: &str,
        provider_volume_id: Option<&str>,
        device_path: Option<&str>,
    ) -> Result<(), CatalogError> {
        self.lock().execute(
            "UPDATE node_volume_migrations
             SET provider_volume_id = ?2, device_path = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, provider_volume_id, device_path, Utc::now()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{empty_catalog, some_node, some_user};

    fn some_migration(user_id: &str, node_id: &str) -> NodeVolumeMigration {
        NodeVolumeMigration {
            id: String::new(),
            user_id: user_id.to_string(),
            node_id: node_id.to_string(),
            mount_path: "/mnt/localisprod-data".to_string(),
            size_gb: 50,
            provider_volume_id: None,
            device_path: None,
            status: MigrationStatus::Pending,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_one_non_terminal_migration_per_node() {
        let catalog = empty_catalog();
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");

        let first = catalog
            .insert_migration(some_migration(&user.id, &node.id))
            .unwrap();
        catalog
            .update_migration_status(&first.id, MigrationStatus::Mounted)
            .unwrap();

        assert!(matches!(
            catalog.insert_migration(some_migration(&user.id, &node.id)),
            Err(CatalogError::MigrationInProgress)
        ));

        // Terminal state frees the node for a new attempt.
        catalog
            .update_migration_status(&first.id, MigrationStatus::Completed)
            .unwrap();
        catalog
            .insert_migration(some_migration(&user.id, &node.id))
            .unwrap();
    }

    #[test]
    fn test_active_and_latest_lookups() {
        let catalog = empty_catalog();
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");

        assert!(catalog.get_active_migration(&node.id).unwrap().is_none());

        let migration = catalog
            .insert_migration(some_migration(&user.id, &node.id))
            .unwrap();
        assert_eq!(
            migration.id,
            catalog.get_active_migration(&node.id).unwrap().unwrap().id
        );

        catalog
            .update_migration_status(&migration.id, MigrationStatus::Failed)
            .unwrap();
        assert!(catalog.get_active_migration(&node.id).unwrap().is_none());
        assert_eq!(
            migration.id,
            catalog.get_latest_migration(&node.id).unwrap().unwrap().id
        );
    }

    #[test]
    fn test_provider_refs_round_trip() {
        let catalog = empty_catalog();
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");
        let migration = catalog
            .insert_migration(some_migration(&user.id, &node.id))
            .unwrap();

        catalog
            .update_migration_provider_refs(
                &migration.id,
                Some("vol-42"),
                Some("/dev/disk/by-id/scsi-0Volume_vol-42"),
            )
            .unwrap();

        let read = catalog.get_migration(&migration.id).unwrap().unwrap();
        assert_eq!(Some("vol-42".to_string()), read.provider_volume_id);
        assert_eq!(
            Some("/dev/disk/by-id/scsi-0Volume_vol-42".to_string()),
            read.device_path
        );
    }
}
