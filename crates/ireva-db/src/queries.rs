use crate::Database;
use crate::models::{NotificationRow, PushSubscriptionRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, is_admin) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, username, password_hash, is_admin as i64],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// All user ids, for admin broadcast without an explicit recipient list.
    pub fn list_user_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM users")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
        message: &str,
        link: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, title, message, link)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, user_id, title, message, link],
            )?;
            Ok(())
        })
    }

    pub fn list_notifications(&self, user_id: &str, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, message, link, is_read, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        title: row.get(2)?,
                        message: row.get(3)?,
                        link: row.get(4)?,
                        is_read: row.get::<_, i64>(5)? != 0,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn unread_notification_count(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Flip is_read for one of the recipient's own notifications.
    /// Returns false if no such row (wrong id, or not this user's).
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )?;
            Ok(affected > 0)
        })
    }

    // -- Push subscriptions --

    /// Register a device token. Re-registering the same token is a no-op,
    /// so clients can call this on every startup.
    pub fn upsert_push_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO push_subscriptions (user_id, token) VALUES (?1, ?2)",
                rusqlite::params![user_id, token],
            )?;
            Ok(())
        })
    }

    pub fn delete_push_token(&self, user_id: &str, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM push_subscriptions WHERE user_id = ?1 AND token = ?2",
                rusqlite::params![user_id, token],
            )?;
            Ok(affected > 0)
        })
    }

    /// Prune a token the provider reported invalid, whoever it belongs to.
    pub fn delete_push_token_everywhere(&self, token: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM push_subscriptions WHERE token = ?1",
                [token],
            )?;
            Ok(affected)
        })
    }

    pub fn push_tokens_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT token FROM push_subscriptions WHERE user_id = ?1 ORDER BY rowid",
            )?;
            let tokens = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(tokens)
        })
    }

    pub fn push_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, token, created_at FROM push_subscriptions
                 WHERE user_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PushSubscriptionRow {
                        user_id: row.get(0)?,
                        token: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is always a compile-time constant here
    let sql = format!(
        "SELECT id, username, password, is_admin, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_admin: row.get::<_, i64>(3)? != 0,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn db_with_user(user_id: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(user_id, &format!("user-{user_id}"), "hash", false)
            .unwrap();
        db
    }

    #[test]
    fn notification_starts_unread_and_flips_only_on_mark() {
        let db = db_with_user("u1");
        db.insert_notification("n1", "u1", "Deposit", "Funds received", None)
            .unwrap();

        let rows = db.list_notifications("u1", 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_read);
        assert_eq!(db.unread_notification_count("u1").unwrap(), 1);

        assert!(db.mark_notification_read("n1", "u1").unwrap());
        let rows = db.list_notifications("u1", 50).unwrap();
        assert!(rows[0].is_read);
        assert_eq!(db.unread_notification_count("u1").unwrap(), 0);
    }

    #[test]
    fn mark_read_is_scoped_to_the_recipient() {
        let db = db_with_user("u1");
        db.create_user("u2", "user-u2", "hash", false).unwrap();
        db.insert_notification("n1", "u1", "KYC", "Approved", Some("/kyc"))
            .unwrap();

        // u2 cannot flip u1's notification
        assert!(!db.mark_notification_read("n1", "u2").unwrap());
        assert_eq!(db.unread_notification_count("u1").unwrap(), 1);
    }

    #[test]
    fn push_token_register_is_idempotent() {
        let db = db_with_user("u1");
        db.upsert_push_token("u1", "tok-a").unwrap();
        db.upsert_push_token("u1", "tok-a").unwrap();
        db.upsert_push_token("u1", "tok-b").unwrap();

        let tokens = db.push_tokens_for_user("u1").unwrap();
        assert_eq!(tokens, vec!["tok-a".to_string(), "tok-b".to_string()]);
    }

    #[test]
    fn invalid_token_prune_removes_all_rows_for_that_token() {
        let db = db_with_user("u1");
        db.create_user("u2", "user-u2", "hash", false).unwrap();
        db.upsert_push_token("u1", "stale").unwrap();
        db.upsert_push_token("u2", "stale").unwrap();

        assert_eq!(db.delete_push_token_everywhere("stale").unwrap(), 2);
        assert!(db.push_tokens_for_user("u1").unwrap().is_empty());
        assert!(db.push_tokens_for_user("u2").unwrap().is_empty());
    }
}
