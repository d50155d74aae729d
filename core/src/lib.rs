//! Atelier - typed table access for the storefront
//!
//! Fetch and mutate tables through a [`service::TableService`], keeping a
//! client-side [`cache::Cache`] in step with optimistic updates.

pub mod access;
pub mod cache;
pub mod config;
pub mod error;
pub mod network;
pub mod query;
pub mod schema;
pub mod server;
pub mod service;

pub use config::Config;
pub use error::{AtelierError, AtelierResult};
