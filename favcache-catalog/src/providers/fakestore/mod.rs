//! FakeStore (`GET /products/{id}`) catalog integration.

pub mod client;
pub mod types;

pub use client::FakeStoreCatalogClient;
pub use types::{FakeStoreProduct, FakeStoreRating};
