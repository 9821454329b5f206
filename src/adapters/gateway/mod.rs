//! Gateway client adapters.
//!
//! - `HttpGatewayClient` - JSON over HTTPS with bounded exponential retry
//! - `MockGateway` - scriptable in-process gateway for tests
//!
//! # Configuration
//!
//! Required environment variables:
//! - `BILLING__GATEWAY__API_KEY`: gateway secret API key
//! - `BILLING__GATEWAY__BASE_URL`: gateway API root

mod http_gateway;
mod mock_gateway;

pub use http_gateway::{HttpGatewayClient, RetryPolicy};
pub use mock_gateway::{MethodCall, MockGateway};
