//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `EntityStore` - generic persistent key/value store
//! - `GatewayClient` - outbound calls to the remote billing gateway
//! - `UserCallback` - hooks notified after committed state changes

mod entity_store;
mod gateway_client;
mod user_callback;

pub use entity_store::{EntityStore, Entry, StoreError};
pub use gateway_client::{
    CancelReceipt, CancelRequest, ChargeLine, ChargeReceipt, ChargeRequest, CreateProductRequest,
    GatewayClient, GatewayError, GatewayErrorCode, RefundReceipt, RefundRequest, RemotePayment,
    RemoteProduct, RemoteSubscription,
};
pub use user_callback::{CallbackError, CallbackEvent, CallbackKind, EntityState, UserCallback};
