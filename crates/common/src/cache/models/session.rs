use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, warn};

use crate::cache::{CacheError, Database};

/// The locally persisted login session.
///
/// At most one row exists at a time, so `is_logged_in` is true whenever a
/// session is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub is_logged_in: bool,
}

impl Database {
    /// Get the current session, if any.
    pub async fn current_session(&self) -> Result<Option<AuthSession>, CacheError> {
        self.ensure_ready()?;

        let row = sqlx::query(
            r#"
            SELECT id, token, user_id, is_logged_in
            FROM auth_session
            WHERE is_logged_in = 1
            LIMIT 1
            "#,
        )
        .fetch_optional(&**self)
        .await?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    /// Replace any existing session with a new one, atomically.
    pub async fn save_session(&self, user_id: i64, token: &str) -> Result<AuthSession, CacheError> {
        self.ensure_ready()?;

        let mut tx = self.begin().await?;
        let written = async {
            sqlx::query("DELETE FROM auth_session")
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query(
                "INSERT INTO auth_session (user_id, token, is_logged_in) VALUES (?1, ?2, 1)",
            )
            .bind(user_id)
            .bind(token)
            .execute(&mut *tx)
            .await?;
            Ok::<_, sqlx::Error>(result.last_insert_rowid())
        }
        .await;

        match written {
            Ok(id) => {
                tx.commit().await?;
                info!(user_id, "session saved");
                Ok(AuthSession {
                    id,
                    token: token.to_string(),
                    user_id,
                    is_logged_in: true,
                })
            }
            Err(e) => {
                tx.rollback().await?;
                warn!(error = %e, "session save rolled back");
                Err(CacheError::TransactionAborted(e.to_string()))
            }
        }
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<AuthSession, CacheError> {
    Ok(AuthSession {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        user_id: row.try_get("user_id")?,
        is_logged_in: row.try_get::<i64, _>("is_logged_in")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTable;

    async fn setup() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_no_session_initially() {
        let db = setup().await;
        assert!(db.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_session_replaces_previous() {
        let db = setup().await;

        db.save_session(1, "first-token").await.unwrap();
        db.save_session(2, "second-token").await.unwrap();

        assert_eq!(db.count_rows(CacheTable::AuthSession).await.unwrap(), 1);

        let session = db.current_session().await.unwrap().unwrap();
        assert_eq!(session.user_id, 2);
        assert_eq!(session.token, "second-token");
        assert!(session.is_logged_in);
    }
}
