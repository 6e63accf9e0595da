//! Per-tenant entity counts, surfaced on the stats endpoint.

use rusqlite::params;
use serde::Serialize;

use super::{Catalog, CatalogError};

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct EntityCounts {
    pub nodes: i64,
    pub services: i64,
    pub deployments: i64,
    pub running_deployments: i64,
    pub databases: i64,
    pub caches: i64,
    pub kafkas: i64,
    pub monitorings: i64,
    pub object_storages: i64,
}

impl Catalog {
    pub fn count_entities(&self, user_id: &str) -> Result<EntityCounts, CatalogError> {
        let conn = self.lock();
        let count = |sql: &str| -> Result<i64, CatalogError> {
            Ok(conn.query_row(sql, params![user_id], |row| row.get(0))?)
        };
        let kind_count = |kind: &str| -> Result<i64, CatalogError> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM stateful_resources WHERE user_id = ?1 AND kind = ?2",
                params![user_id, kind],
                |row| row.get(0),
            )?)
        };

        Ok(EntityCounts {
            nodes: count("SELECT COUNT(*) FROM nodes WHERE user_id = ?1")?,
            services: count("SELECT COUNT(*) FROM services WHERE user_id = ?1")?,
            deployments: count("SELECT COUNT(*) FROM deployments WHERE user_id = ?1")?,
            running_deployments: count(
                "SELECT COUNT(*) FROM deployments WHERE user_id = ?1 AND status = 'running'",
            )?,
            databases: kind_count("database")?,
            caches: kind_count("cache")?,
            kafkas: kind_count("kafka")?,
            monitorings: kind_count("monitoring")?,
            object_storages: kind_count("object_storage")?,
        })
    }
}
