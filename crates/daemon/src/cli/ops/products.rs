use std::fmt;

use clap::Args;
use comfy_table::Table;

use common::cache::{CacheError, Product};
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

/// List cached products
#[derive(Args, Debug, Clone)]
pub struct Products {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug)]
pub struct ProductsOutput {
    pub products: Vec<Product>,
    pub json: bool,
}

impl fmt::Display for ProductsOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.json {
            let raw = serde_json::to_string_pretty(&self.products).map_err(|_| fmt::Error)?;
            return write!(f, "{}", raw);
        }

        if self.products.is_empty() {
            return write!(f, "No cached products");
        }

        let mut table = Table::new();
        table.set_header(vec!["ID", "TITLE", "PRICE", "CATEGORY"]);
        for p in &self.products {
            table.add_row(vec![
                p.id.to_string(),
                p.title.clone(),
                format!("{:.2}", p.price),
                p.category.clone(),
            ]);
        }
        write!(f, "{table}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProductsError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Products {
    type Error = ProductsError;
    type Output = ProductsOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        Ok(ProductsOutput {
            products: services.cache.list_products().await?,
            json: self.json,
        })
    }
}
