//! Catalog provider implementations

pub mod fakestore;

pub use fakestore::FakeStoreCatalogClient;
