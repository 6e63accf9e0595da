//! Per-user settings: a (user, key) → value map.
//!
//! Secret-class values are sealed through the cipher before insert and
//! opened on read. The webhook token is deliberately not secret-class: it
//! is an identifier and has to stay queryable for inbound webhook lookups.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};

use super::entity::User;
use super::{Catalog, CatalogError};

/// Identifies a user for inbound webhooks; provisioned on first contact.
pub const WEBHOOK_TOKEN_KEY: &str = "webhook_token";
/// HMAC secret the user configured on their repository webhooks.
pub const WEBHOOK_SECRET_KEY: &str = "webhook_secret";
/// Registry credentials for token-authenticated image pulls.
pub const REGISTRY_USERNAME_KEY: &str = "registry_username";
pub const REGISTRY_TOKEN_KEY: &str = "registry_token";

/// Settings key holding a cloud provider API token, e.g. `hetzner_api_token`.
pub fn provider_token_key(provider: &str) -> String {
    format!("{provider}_api_token")
}

/// Secret-class settings are sealed at rest and masked in responses.
pub fn is_secret_setting(key: &str) -> bool {
    key == WEBHOOK_SECRET_KEY || key == REGISTRY_TOKEN_KEY || key.ends_with("_api_token")
}

impl Catalog {
    pub fn set_setting(&self, user_id: &str, key: &str, value: &str) -> Result<(), CatalogError> {
        let stored = if is_secret_setting(key) {
            self.cipher().encrypt(value)?
        } else {
            value.to_string()
        };
        self.lock().execute(
            "INSERT INTO user_settings (user_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, key) DO UPDATE SET value = excluded.value",
            params![user_id, key, stored],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, user_id: &str, key: &str) -> Result<Option<String>, CatalogError> {
        let stored: Option<String> = self
            .lock()
            .query_row(
                "SELECT value FROM user_settings WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(value) if is_secret_setting(key) => Ok(Some(self.cipher().decrypt(&value)?)),
            other => Ok(other),
        }
    }

    pub fn list_settings(&self, user_id: &str) -> Result<BTreeMap<String, String>, CatalogError> {
        let conn = self.lock();
        let mut statement =
            conn.prepare("SELECT key, value FROM user_settings WHERE user_id = ?1")?;
        let rows = statement.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut settings = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            let value = if is_secret_setting(&key) {
                self.cipher().decrypt(&value)?
            } else {
                value
            };
            settings.insert(key, value);
        }
        Ok(settings)
    }

    /// Indexed reverse lookup used by the inbound webhook path.
    pub fn find_user_by_webhook_token(&self, token: &str) -> Result<Option<User>, CatalogError> {
        let user_id: Option<String> = self
            .lock()
            .query_row(
                "SELECT user_id FROM user_settings WHERE key = ?1 AND value = ?2",
                params![WEBHOOK_TOKEN_KEY, token],
                |row| row.get(0),
            )
            .optional()?;
        match user_id {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }
}
