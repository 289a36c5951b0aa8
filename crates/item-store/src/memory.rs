use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    DecrementOutcome, FulfillmentReport, Item, ItemId, ItemPatch, LineOutcome, LineStatus,
    NewItem, OrderId, OrderRequest, Result, StoreError, store::ItemStore,
};

/// Number of processed order ids remembered by default.
pub const DEFAULT_PROCESSED_CAPACITY: usize = 100_000;

/// Items are kept in insertion order, which `list` preserves.
struct State {
    items: Vec<Item>,
    processed: HashMap<OrderId, Vec<LineOutcome>>,
    /// Processed order ids, oldest first.
    processed_order: VecDeque<OrderId>,
    processed_capacity: usize,
}

impl State {
    fn with_capacity(processed_capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            processed: HashMap::new(),
            processed_order: VecDeque::new(),
            processed_capacity: processed_capacity.max(1),
        }
    }

    /// Records an order outcome, forgetting the oldest order once the
    /// capacity is reached.
    fn remember(&mut self, order_id: OrderId, lines: Vec<LineOutcome>) {
        while self.processed_order.len() >= self.processed_capacity {
            match self.processed_order.pop_front() {
                Some(oldest) => {
                    self.processed.remove(&oldest);
                }
                None => break,
            }
        }
        self.processed_order.push_back(order_id.clone());
        self.processed.insert(order_id, lines);
    }

    fn name_taken(&self, name: &str, except: Option<ItemId>) -> bool {
        self.items
            .iter()
            .any(|item| item.name == name && Some(item.id) != except)
    }

    fn decrement(&mut self, name: &str, quantity: u32) -> DecrementOutcome {
        let Some(item) = self.items.iter_mut().find(|item| item.name == name) else {
            return DecrementOutcome::NotFound;
        };
        if item.available_units < quantity {
            return DecrementOutcome::Insufficient {
                available: item.available_units,
            };
        }
        item.available_units -= quantity;
        item.updated_at = Utc::now();
        DecrementOutcome::Applied(item.clone())
    }
}

/// In-memory item store implementation for testing.
///
/// A single lock guards all state, so every operation, including a whole
/// order fulfilment, is atomic with respect to every other.
///
/// Only the most recent [`DEFAULT_PROCESSED_CAPACITY`] order ids are
/// remembered for duplicate detection; a redelivery of an older order is
/// applied again.
#[derive(Clone)]
pub struct InMemoryItemStore {
    state: Arc<RwLock<State>>,
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::with_processed_capacity(DEFAULT_PROCESSED_CAPACITY)
    }
}

impl InMemoryItemStore {
    /// Creates a new empty in-memory item store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store remembering at most `capacity` processed orders.
    pub fn with_processed_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::with_capacity(capacity))),
        }
    }

    /// Returns the number of items stored.
    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Returns the number of orders recorded as processed.
    pub async fn processed_order_count(&self) -> usize {
        self.state.read().await.processed.len()
    }

    /// Clears all items and processed orders.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.items.clear();
        state.processed.clear();
        state.processed_order.clear();
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn insert(&self, item: NewItem) -> Result<Item> {
        let mut state = self.state.write().await;
        if state.name_taken(&item.name, None) {
            return Err(StoreError::DuplicateName(item.name));
        }

        let item = Item::from_new(ItemId::new(), item, Utc::now());
        state.items.push(item.clone());
        Ok(item)
    }

    async fn list(&self) -> Result<Vec<Item>> {
        Ok(self.state.read().await.items.clone())
    }

    async fn get(&self, id: ItemId) -> Result<Option<Item>> {
        let state = self.state.read().await;
        Ok(state.items.iter().find(|item| item.id == id).cloned())
    }

    async fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<Item>> {
        let mut state = self.state.write().await;
        if !state.items.iter().any(|item| item.id == id) {
            return Ok(None);
        }
        if let Some(ref name) = patch.name
            && state.name_taken(name, Some(id))
        {
            return Err(StoreError::DuplicateName(name.clone()));
        }

        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return Ok(None);
        };
        item.apply_patch(patch, Utc::now());
        Ok(Some(item.clone()))
    }

    async fn delete(&self, id: ItemId) -> Result<Option<Item>> {
        let mut state = self.state.write().await;
        let position = state.items.iter().position(|item| item.id == id);
        Ok(position.map(|index| state.items.remove(index)))
    }

    async fn decrement(&self, name: &str, quantity: u32) -> Result<DecrementOutcome> {
        Ok(self.state.write().await.decrement(name, quantity))
    }

    async fn fulfill_order(&self, order: &OrderRequest) -> Result<FulfillmentReport> {
        let mut state = self.state.write().await;

        if let Some(lines) = state.processed.get(&order.order_id) {
            return Ok(FulfillmentReport {
                order_id: order.order_id.clone(),
                duplicate: true,
                lines: lines.clone(),
            });
        }

        let lines: Vec<LineOutcome> = order
            .lines
            .iter()
            .map(|line| {
                let outcome = state.decrement(&line.name, line.quantity);
                LineOutcome {
                    name: line.name.clone(),
                    quantity: line.quantity,
                    status: LineStatus::from(&outcome),
                }
            })
            .collect();

        state.remember(order.order_id.clone(), lines.clone());

        Ok(FulfillmentReport {
            order_id: order.order_id.clone(),
            duplicate: false,
            lines,
        })
    }
}
