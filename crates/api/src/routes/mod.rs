pub mod admin;
pub mod cart;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod products;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use store::query::DEFAULT_LIMIT;

use crate::error::ApiError;

/// `?page=&limit=` query parameters. Pages are 1-based.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub page: usize,
    pub limit: usize,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

fn parse_id<T: FromStr>(raw: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid ID format: {raw}")))
}
