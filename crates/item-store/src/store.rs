use async_trait::async_trait;

use crate::{
    DecrementOutcome, FulfillmentReport, Item, ItemId, ItemPatch, NewItem, OrderRequest, Result,
};

/// Core trait for item store implementations.
///
/// The store is the durable backing of the catalog. Every call round-trips
/// to the backend; implementations keep no read cache. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Stores a new item under a freshly assigned identifier.
    ///
    /// Fails with `DuplicateName` if another item already has the same name.
    async fn insert(&self, item: NewItem) -> Result<Item>;

    /// Returns every item, oldest first.
    async fn list(&self) -> Result<Vec<Item>>;

    /// Retrieves an item by identifier.
    async fn get(&self, id: ItemId) -> Result<Option<Item>>;

    /// Applies a partial update in a single write.
    ///
    /// Returns None, without writing, if no item has the identifier.
    async fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<Item>>;

    /// Removes an item and returns its state prior to removal.
    async fn delete(&self, id: ItemId) -> Result<Option<Item>>;

    /// Atomically subtracts `quantity` units from the item named `name`,
    /// provided at least that many are available.
    ///
    /// Concurrent calls never drive stock below zero, and an `Insufficient`
    /// outcome leaves stock unchanged.
    async fn decrement(&self, name: &str, quantity: u32) -> Result<DecrementOutcome>;

    /// Applies every line of an order with the same conditional decrement as
    /// [`ItemStore::decrement`] and records the order as processed, as one
    /// atomic unit.
    ///
    /// If the order was processed before, nothing is decremented and the
    /// originally recorded outcome is returned with `duplicate` set.
    async fn fulfill_order(&self, order: &OrderRequest) -> Result<FulfillmentReport>;
}
