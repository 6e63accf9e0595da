//! User rows and their settings-backed provisioning.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, OptionalExtension, Row};

use super::entity::{new_entity_id, User};
use super::settings::WEBHOOK_TOKEN_KEY;
use super::{Catalog, CatalogError};

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        subject: row.get("subject")?,
        email: row.get("email")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

const USER_COLUMNS: &str = "id, subject, email, name, created_at";

impl Catalog {
    /// Returns the user for an external subject, creating the row on first
    /// authenticated contact. A fresh user is always provisioned with a
    /// random webhook token in settings.
    pub fn upsert_user(
        &self,
        subject: &str,
        email: &str,
        name: &str,
    ) -> Result<User, CatalogError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE subject = ?1"),
                params![subject],
                row_to_user,
            )
            .optional()?;
        if let Some(user) = existing {
            tx.execute(
                "UPDATE users SET email = ?2, name = ?3 WHERE id = ?1",
                params![user.id, email, name],
            )?;
            tx.commit()?;
            return Ok(User {
                email: email.to_string(),
                name: name.to_string(),
                ..user
            });
        }

        let user = User {
            id: new_entity_id(),
            subject: subject.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO users (id, subject, email, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.id, user.subject, user.email, user.name, user.created_at],
        )?;

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        tx.execute(
            "INSERT INTO user_settings (user_id, key, value) VALUES (?1, ?2, ?3)",
            params![user.id, WEBHOOK_TOKEN_KEY, token],
        )?;

        tx.commit()?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>, CatalogError> {
        Ok(self
            .lock()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>, CatalogError> {
        Ok(self
            .lock()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE subject = ?1"),
                params![subject],
                row_to_user,
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::empty_catalog;

    #[test]
    fn test_first_contact_provisions_webhook_token() {
        let catalog = empty_catalog();
        let user = catalog.upsert_user("github|1", "a@b.c", "Alex").unwrap();

        let token = catalog
            .get_setting(&user.id, WEBHOOK_TOKEN_KEY)
            .unwrap()
            .expect("token provisioned on first contact");
        assert_eq!(32, token.len());

        // Second contact keeps the same user and token.
        let again = catalog.upsert_user("github|1", "a@b.c", "Alex").unwrap();
        assert_eq!(user.id, again.id);
        assert_eq!(
            token,
            catalog.get_setting(&user.id, WEBHOOK_TOKEN_KEY).unwrap().unwrap()
        );
    }

    #[test]
    fn test_upsert_refreshes_profile_fields() {
        let catalog = empty_catalog();
        let user = catalog.upsert_user("github|1", "old@b.c", "Old").unwrap();
        let updated = catalog.upsert_user("github|1", "new@b.c", "New").unwrap();

        assert_eq!(user.id, updated.id);
        assert_eq!("new@b.c", updated.email);
        assert_eq!(
            "new@b.c",
            catalog.get_user(&user.id).unwrap().unwrap().email
        );
    }

    #[test]
    fn test_get_missing_user_is_none() {
        let catalog = empty_catalog();
        assert!(catalog.get_user("nope").unwrap().is_none());
    }
}
