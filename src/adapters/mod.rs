//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the engine to external systems:
//! - `gateway` - remote billing gateway (HTTP, mock)
//! - `memory_store` - in-process entity store
//! - `catalog_file` - YAML product definitions

pub mod catalog_file;
pub mod gateway;
pub mod memory_store;

pub use catalog_file::{load_product_definitions, parse_product_definitions, CatalogFileError};
pub use gateway::{HttpGatewayClient, MethodCall, MockGateway, RetryPolicy};
pub use memory_store::InMemoryEntityStore;
