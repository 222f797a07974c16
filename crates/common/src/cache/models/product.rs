use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};

use crate::cache::{CacheError, Database};

/// Mirrored product row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub price: f64,
    pub category: String,
}

impl Product {
    /// Reject rows the server should never have sent.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.title.trim().is_empty() {
            return Err(CacheError::InvalidRow(format!(
                "product {} has an empty title",
                self.id
            )));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(CacheError::InvalidRow(format!(
                "product {} has invalid price {}",
                self.id, self.price
            )));
        }
        Ok(())
    }

    pub(crate) async fn upsert(&self, conn: &mut SqliteConnection) -> Result<(), CacheError> {
        self.validate()?;
        sqlx::query(
            "INSERT OR REPLACE INTO products (id, title, price, category) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(self.id)
        .bind(&self.title)
        .bind(self.price)
        .bind(&self.category)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

impl Database {
    /// List all cached products
    pub async fn list_products(&self) -> Result<Vec<Product>, CacheError> {
        self.ensure_ready()?;

        let rows = sqlx::query(
            r#"
            SELECT id, title, price, category
            FROM products
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    /// Get a cached product by ID
    pub async fn get_product(&self, id: i64) -> Result<Option<Product>, CacheError> {
        self.ensure_ready()?;

        let row = sqlx::query("SELECT id, title, price, category FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&**self)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, CacheError> {
    Ok(Product {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        price: row.try_get("price")?,
        category: row.try_get("category")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: i64, title: &str, price: f64) -> Product {
        Product {
            id,
            title: title.to_string(),
            price,
            category: "misc".to_string(),
        }
    }

    #[test]
    fn test_validate() {
        assert!(product(1, "Lamp", 10.0).validate().is_ok());
        assert!(product(1, "Free", 0.0).validate().is_ok());
        assert!(product(1, "  ", 10.0).validate().is_err());
        assert!(product(1, "Lamp", f64::NAN).validate().is_err());
        assert!(product(1, "Lamp", -1.0).validate().is_err());
    }
}
