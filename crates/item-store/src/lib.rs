//! Item store client.
//!
//! The [`ItemStore`] trait is the only way the rest of the service touches
//! persisted inventory. Two backends are provided: [`InMemoryItemStore`] for
//! tests and local runs, and [`PostgresItemStore`] for production.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{ItemId, OrderId};
pub use error::{Result, StoreError};
pub use memory::{DEFAULT_PROCESSED_CAPACITY, InMemoryItemStore};
pub use model::{
    DecrementOutcome, FulfillmentReport, Item, ItemPatch, LineOutcome, LineStatus, NewItem,
    OrderLine, OrderRequest,
};
pub use postgres::PostgresItemStore;
pub use store::ItemStore;
