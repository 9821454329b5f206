//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps, the state machine trait and the
//! error taxonomy shared by every billing component.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{BillingError, ErrorKind, ValidationError};
pub use ids::{PaymentId, ProductId, SubscriptionId, UserId, KEY_SEPARATOR};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
