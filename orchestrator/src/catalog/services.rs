//! Service rows.
//!
//! The env map is stored as JSON and sealed through the cipher before
//! insert; ports, volumes and linked-resource id lists are stored as JSON
//! strings. Service names are unique per user, enforced by the schema.

use std::collections::BTreeMap;

use rusqlite::{params, ErrorCode, OptionalExtension, Row};

use super::entity::{new_entity_id, PortMapping, Service};
use super::{Catalog, CatalogError};

const SERVICE_COLUMNS: &str = "id, user_id, name, image, build_path, env, ports, volumes, \
     command, github_repo, domain, database_ids, cache_ids, kafka_ids, monitoring_ids, created_at";

/// Service row as stored: JSON columns still serialized, env still sealed.
struct RawService {
    service: Service,
    env: String,
    ports: String,
    volumes: String,
    database_ids: String,
    cache_ids: String,
    kafka_ids: String,
    monitoring_ids: String,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawService> {
    Ok(RawService {
        service: Service {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            image: row.get("image")?,
            build_path: row.get("build_path")?,
            env: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            command: row.get("command")?,
            github_repo: row.get("github_repo")?,
            domain: row.get("domain")?,
            database_ids: Vec::new(),
            cache_ids: Vec::new(),
            kafka_ids: Vec::new(),
            monitoring_ids: Vec::new(),
            created_at: row.get("created_at")?,
        },
        env: row.get("env")?,
        ports: row.get("ports")?,
        volumes: row.get("volumes")?,
        database_ids: row.get("database_ids")?,
        cache_ids: row.get("cache_ids")?,
        kafka_ids: row.get("kafka_ids")?,
        monitoring_ids: row.get("monitoring_ids")?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl Catalog {
    fn open_service(&self, raw: RawService) -> Result<Service, CatalogError> {
        let mut service = raw.service;
        let env_json = self.cipher().decrypt(&raw.env)?;
        service.env = serde_json::from_str(&env_json)?;
        service.ports = serde_json::from_str::<Vec<PortMapping>>(&raw.ports)?;
        service.volumes = serde_json::from_str(&raw.volumes)?;
        service.database_ids = serde_json::from_str(&raw.database_ids)?;
        service.cache_ids = serde_json::from_str(&raw.cache_ids)?;
        service.kafka_ids = serde_json::from_str(&raw.kafka_ids)?;
        service.monitoring_ids = serde_json::from_str(&raw.monitoring_ids)?;
        Ok(service)
    }

    pub fn insert_service(&self, mut service: Service) -> Result<Service, CatalogError> {
        if service.id.is_empty() {
            service.id = new_entity_id();
        }
        let sealed_env = self.cipher().encrypt(&serde_json::to_string(&service.env)?)?;
        let result = self.lock().execute(
            &format!(
                "INSERT INTO services ({SERVICE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                service.id,
                service.user_id,
                service.name,
                service.image,
                service.build_path,
                sealed_env,
                serde_json::to_string(&service.ports)?,
                serde_json::to_string(&service.volumes)?,
                service.command,
                service.github_repo,
                service.domain,
                serde_json::to_string(&service.database_ids)?,
                serde_json::to_string(&service.cache_ids)?,
                serde_json::to_string(&service.kafka_ids)?,
                serde_json::to_string(&service.monitoring_ids)?,
                service.created_at,
            ],
        );
        match result {
            Ok(_) => Ok(service),
            Err(err) if is_unique_violation(&err) => Err(CatalogError::DuplicateServiceName),
            Err(err) => Err(err.into()),
        }
    }

    /// Full-row update; the name stays subject to per-user uniqueness.
    pub fn update_service(&self, service: &Service) -> Result<(), CatalogError> {
        let sealed_env = self.cipher().encrypt(&serde_json::to_string(&service.env)?)?;
        let result = self.lock().execute(
            "UPDATE services SET
                name = ?3, image = ?4, build_path = ?5, env = ?6, ports = ?7,
                volumes = ?8, command = ?9, github_repo = ?10, domain = ?11,
                database_ids = ?12, cache_ids = ?13, kafka_ids = ?14,
                monitoring_ids = ?15
             WHERE id = ?1 AND user_id = ?2",
            params![
                service.id,
                service.user_id,
                service.name,
                service.image,
                service.build_path,
                sealed_env,
                serde_json::to_string(&service.ports)?,
                serde_json::to_string(&service.volumes)?,
                service.command,
                service.github_repo,
                service.domain,
                serde_json::to_string(&service.database_ids)?,
                serde_json::to_string(&service.cache_ids)?,
                serde_json::to_string(&service.kafka_ids)?,
                serde_json::to_string(&service.monitoring_ids)?,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(CatalogError::DuplicateServiceName),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_service_for_user(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Service>, CatalogError> {
        let raw = self
            .lock()
            .query_row(
                &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                row_to_raw,
            )
            .optional()?;
        raw.map(|r| self.open_service(r)).transpose()
    }

    pub(crate) fn get_service_any(&self, id: &str) -> Result<Option<Service>, CatalogError> {
        let raw = self
            .lock()
            .query_row(
                &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
                params![id],
                row_to_raw,
            )
            .optional()?;
        raw.map(|r| self.open_service(r)).transpose()
    }

    pub fn list_services(&self, user_id: &str) -> Result<Vec<Service>, CatalogError> {
        self.query_services(
            &format!(
                "SELECT {SERVICE_COLUMNS} FROM services WHERE user_id = ?1 ORDER BY created_at"
            ),
            params![user_id],
        )
    }

    /// Indexed lookup used by the webhook path.
    pub fn list_services_by_user_and_repo(
        &self,
        user_id: &str,
        repo_full_name: &str,
    ) -> Result<Vec<Service>, CatalogError> {
        self.query_services(
            &format!(
                "SELECT {SERVICE_COLUMNS} FROM services
                 WHERE user_id = ?1 AND github_repo = ?2 ORDER BY created_at"
            ),
            params![user_id, repo_full_name],
        )
    }

    fn query_services(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Service>, CatalogError> {
        let conn = self.lock();
        let mut statement = conn.prepare(sql)?;
        let rows = statement.query_map(params, row_to_raw)?;
        let mut services = Vec::new();
        for row in rows {
            services.push(self.open_service(row?)?);
        }
        Ok(services)
    }

    pub fn delete_service(&self, id: &str, user_id: &str) -> Result<bool, CatalogError> {
        let affected = self.lock().execute(
            "DELETE FROM services WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{empty_catalog, keyed_catalog, some_user};
    use chrono::Utc;

    fn some_service(user_id: &str, name: &str) -> Service {
        Service {
            id: String::new(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            image: "nginx:latest".to_string(),
            build_path: None,
            env: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            command: None,
            github_repo: None,
            domain: None,
            database_ids: Vec::new(),
            cache_ids: Vec::new(),
            kafka_ids: Vec::new(),
            monitoring_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_service_stores_empty_collections() {
        let catalog = empty_catalog();
        let user = some_user(&catalog, "u1");
        let service = catalog
            .insert_service(some_service(&user.id, "my-app"))
            .unwrap();

        let (env, ports): (String, String) = catalog
            .lock()
            .query_row(
                "SELECT env, ports FROM services WHERE id = ?1",
                params![service.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!("{}", env);
        assert_eq!("[]", ports);
    }

    #[test]
    fn test_env_round_trips_through_cipher() {
        let catalog = keyed_catalog();
        let user = some_user(&catalog, "u1");
        let mut service = some_service(&user.id, "my-app");
        service.env.insert("SECRET".into(), "value'with quote".into());
        let service = catalog.insert_service(service).unwrap();

        let raw_env: String = catalog
            .lock()
            .query_row(
                "SELECT env FROM services WHERE id = ?1",
                params![service.id],
                |row| row.get(0),
            )
            .unwrap();
        assert!(raw_env.starts_with("enc:v1:"));

        let read = catalog
            .get_service_for_user(&service.id, &user.id)
            .unwrap()
            .unwrap();
        assert_eq!(service.env, read.env);
    }

    #[test]
    fn test_name_unique_per_user_not_across_users() {
        let catalog = empty_catalog();
        let first = some_user(&catalog, "u1");
        let second = some_user(&catalog, "u2");

        catalog
            .insert_service(some_service(&first.id, "api"))
            .unwrap();
        assert!(matches!(
            catalog.insert_service(some_service(&first.id, "api")),
            Err(CatalogError::DuplicateServiceName)
        ));
        catalog
            .insert_service(some_service(&second.id, "api"))
            .unwrap();
    }

    #[test]
    fn test_repo_lookup_is_tenant_scoped() {
        let catalog = empty_catalog();
        let owner = some_user(&catalog, "owner");
        let other = some_user(&catalog, "other");

        let mut service = some_service(&owner.id, "api");
        service.github_repo = Some("o/r".into());
        catalog.insert_service(service).unwrap();

        assert_eq!(
            1,
            catalog
                .list_services_by_user_and_repo(&owner.id, "o/r")
                .unwrap()
                .len()
        );
        assert!(catalog
            .list_services_by_user_and_repo(&other.id, "o/r")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_update_round_trip() {
        let catalog = empty_catalog();
        let user = some_user(&catalog, "u1");
        let mut service = catalog
            .insert_service(some_service(&user.id, "api"))
            .unwrap();

        service.ports = vec!["8080:80".parse().unwrap()];
        service.domain = Some("api.example.com".into());
        catalog.update_service(&service).unwrap();

        let read = catalog
            .get_service_for_user(&service.id, &user.id)
            .unwrap()
            .unwrap();
        assert_eq!(service.ports, read.ports);
        assert_eq!(service.domain, read.domain);
    }
}
