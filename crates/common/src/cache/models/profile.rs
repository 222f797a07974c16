use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};

use crate::cache::{CacheError, Database};

/// Mirrored user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub email: String,
}

impl Profile {
    pub(crate) async fn upsert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR REPLACE INTO profile (id, name, email) VALUES (?1, ?2, ?3)")
            .bind(self.id)
            .bind(&self.name)
            .bind(&self.email)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

impl Database {
    /// Get a cached profile by ID
    pub async fn get_profile(&self, id: i64) -> Result<Option<Profile>, CacheError> {
        self.ensure_ready()?;

        let row = sqlx::query("SELECT id, name, email FROM profile WHERE id = ?1")
            .bind(id)
            .fetch_optional(&**self)
            .await?;

        row.as_ref().map(row_to_profile).transpose()
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<Profile, CacheError> {
    Ok(Profile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
    })
}
