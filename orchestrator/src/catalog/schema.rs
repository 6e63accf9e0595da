//! Embedded schema with idempotent, additive migrations.
//!
//! Every statement here can run against any previously shipped catalog
//! file: tables are created `IF NOT EXISTS` and later columns are added
//! through [`add_column`], which ignores the duplicate-column error. Old
//! rows keep the column defaults.

use chrono::Utc;
use rusqlite::Connection;

use super::entity::MANAGEMENT_NODE_ID;
use super::CatalogError;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    subject     TEXT NOT NULL UNIQUE,
    email       TEXT NOT NULL,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_settings (
    user_id     TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (user_id, key)
);

CREATE INDEX IF NOT EXISTS idx_user_settings_key_value
    ON user_settings (key, value);

CREATE TABLE IF NOT EXISTS nodes (
    id              TEXT PRIMARY KEY,
    user_id         TEXT,
    name            TEXT NOT NULL,
    host            TEXT NOT NULL,
    port            INTEGER NOT NULL DEFAULT 22,
    username        TEXT NOT NULL,
    private_key     TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'unknown',
    is_local        INTEGER NOT NULL DEFAULT 0,
    traefik_enabled INTEGER NOT NULL DEFAULT 0,
    provider        TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS services (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    name            TEXT NOT NULL,
    image           TEXT NOT NULL,
    build_path      TEXT,
    env             TEXT NOT NULL DEFAULT '{}',
    ports           TEXT NOT NULL DEFAULT '[]',
    volumes         TEXT NOT NULL DEFAULT '[]',
    command         TEXT,
    github_repo     TEXT,
    domain          TEXT,
    database_ids    TEXT NOT NULL DEFAULT '[]',
    cache_ids       TEXT NOT NULL DEFAULT '[]',
    kafka_ids       TEXT NOT NULL DEFAULT '[]',
    monitoring_ids  TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL,
    UNIQUE (user_id, name)
);

CREATE INDEX IF NOT EXISTS idx_services_user_repo
    ON services (user_id, github_repo);

CREATE TABLE IF NOT EXISTS deployments (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    service_id        TEXT NOT NULL,
    node_id           TEXT NOT NULL,
    container_name    TEXT NOT NULL,
    container_id      TEXT,
    status            TEXT NOT NULL DEFAULT 'pending',
    created_at        TEXT NOT NULL,
    last_deployed_at  TEXT
);

CREATE INDEX IF NOT EXISTS idx_deployments_node ON deployments (node_id);

CREATE TABLE IF NOT EXISTS stateful_resources (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    kind              TEXT NOT NULL,
    name              TEXT NOT NULL,
    version           TEXT NOT NULL,
    node_id           TEXT NOT NULL,
    port              INTEGER NOT NULL,
    extra_port        INTEGER,
    secret            TEXT NOT NULL,
    container_name    TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending',
    created_at        TEXT NOT NULL,
    last_deployed_at  TEXT
);

CREATE INDEX IF NOT EXISTS idx_resources_node ON stateful_resources (node_id);

CREATE TABLE IF NOT EXISTS node_volume_migrations (
    id                  TEXT PRIMARY KEY,
    user_id             TEXT NOT NULL,
    node_id             TEXT NOT NULL,
    mount_path          TEXT NOT NULL,
    provider_volume_id  TEXT,
    device_path         TEXT,
    status              TEXT NOT NULL DEFAULT 'pending',
    error               TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_migrations_node
    ON node_volume_migrations (node_id);
";

pub fn migrate(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(CREATE_TABLES)?;

    // Columns added after the initial schema shipped.
    add_column(conn, "nodes", "provider_region TEXT")?;
    add_column(conn, "nodes", "provider_instance_id TEXT")?;
    add_column(
        conn,
        "node_volume_migrations",
        "size_gb INTEGER NOT NULL DEFAULT 50",
    )?;

    Ok(())
}

/// `ALTER TABLE … ADD COLUMN …` that tolerates the column already existing,
/// which is what makes re-running [`migrate`] safe.
fn add_column(conn: &Connection, table: &str, declaration: &str) -> Result<(), CatalogError> {
    let statement = format!("ALTER TABLE {table} ADD COLUMN {declaration}");
    match conn.execute(&statement, []) {
        Ok(_) => Ok(()),
        Err(err) if err.to_string().contains("duplicate column name") => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// The orchestrator's own host. Owned by no user; visible to root only.
pub fn seed_management_node(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT OR IGNORE INTO nodes
            (id, user_id, name, host, port, username, private_key, status,
             is_local, traefik_enabled, created_at)
         VALUES (?1, NULL, ?1, '127.0.0.1', 22, '', '', 'online', 1, 0, ?2)",
        rusqlite::params![MANAGEMENT_NODE_ID, Utc::now()],
    )?;
    Ok(())
}
