//! Typed table access
//!
//! [`TableClient`] pairs a [`TableService`] with a [`Cache`] and exposes the
//! two operations consumers need: [`TableClient::fetch`] for filtered,
//! sorted, paginated reads and [`TableClient::mutate`] for writes with
//! optimistic cache updates and rollback.
//!
//! ```no_run
//! use atelier_core::access::{FetchOptions, TableClient};
//! use atelier_core::cache::MemoryCache;
//! use atelier_core::query::Sort;
//! use atelier_core::schema::Table;
//! use atelier_core::service::MemoryService;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! struct Brands;
//!
//! #[derive(Deserialize)]
//! struct Brand {
//!     id: i64,
//!     name: String,
//! }
//!
//! #[derive(Serialize)]
//! struct NewBrand {
//!     name: String,
//! }
//!
//! #[derive(Serialize, Default)]
//! struct BrandPatch {
//!     #[serde(skip_serializing_if = "Option::is_none")]
//!     id: Option<i64>,
//!     #[serde(skip_serializing_if = "Option::is_none")]
//!     name: Option<String>,
//! }
//!
//! impl Table for Brands {
//!     const NAME: &'static str = "brands";
//!     const PRIMARY_KEY: &'static [&'static str] = &["id"];
//!     type Row = Brand;
//!     type Insert = NewBrand;
//!     type Update = BrandPatch;
//! }
//!
//! # async fn run() -> atelier_core::AtelierResult<()> {
//! let client = TableClient::new(Arc::new(MemoryService::new()), Arc::new(MemoryCache::new()));
//! let page = client
//!     .fetch(FetchOptions::<Brands>::new().sort(Sort::asc("name")).paginate(1, 20))
//!     .await?;
//! for brand in page.into_vec() {
//!     println!("{} {}", brand.id, brand.name);
//! }
//! # Ok(())
//! # }
//! ```

mod fetch;
mod mutation;

pub use fetch::{FetchOptions, FetchResult, FilterFn, Rows};
pub use mutation::{
    Mutation, MutationAction, MutationContext, MutationOptions, MutationVariables,
    OptimisticFn, OptimisticUpdate, apply_optimistic,
};

use crate::cache::Cache;
use crate::service::TableService;
use std::sync::Arc;

#[derive(Clone)]
pub struct TableClient {
    service: Arc<dyn TableService>,
    cache: Arc<dyn Cache>,
}

impl TableClient {
    pub fn new(service: Arc<dyn TableService>, cache: Arc<dyn Cache>) -> Self {
        Self { service, cache }
    }

    pub fn service(&self) -> &Arc<dyn TableService> {
        &self.service
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }
}
