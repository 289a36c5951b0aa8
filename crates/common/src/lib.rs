//! Types shared by every crate in the inventory service.

pub mod backoff;
pub mod types;

pub use backoff::Backoff;
pub use types::{InvalidItemId, ItemId, OrderId};
