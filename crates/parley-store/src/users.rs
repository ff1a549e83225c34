use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::UserId;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::User;
use crate::rows::{parse, parse_ts, ts};

impl Database {
    pub fn insert_user(&self, display_name: &str) -> Result<User> {
        let user = User {
            id: UserId::new(),
            display_name: display_name.trim().to_string(),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![
                user.id.to_string(),
                user.display_name,
                ts(&user.created_at)
            ],
        )?;
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let created_at: String = row.get(2)?;
                    Ok(User {
                        id: parse(0, &id)?,
                        display_name: row.get(1)?,
                        created_at: parse_ts(2, &created_at)?,
                    })
                },
            )
            .map_err(not_found(format!("user {id}")))
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    #[test]
    fn insert_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let user = db.insert_user("  ada ").unwrap();

        assert_eq!(user.display_name, "ada");
        assert_eq!(db.get_user(user.id).unwrap(), user);
        assert!(db.user_exists(user.id).unwrap());
        assert!(!db.user_exists(UserId::new()).unwrap());
    }

    #[test]
    fn unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound(_))
        ));
    }
}
