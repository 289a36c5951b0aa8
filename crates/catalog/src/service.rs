//! Catalog service providing the item CRUD API and stock decrements.

use std::future::Future;

use common::ItemId;
use item_store::{
    DecrementOutcome, FulfillmentReport, Item, ItemPatch, ItemStore, NewItem, OrderRequest,
};

use crate::error::{CatalogError, Result};
use crate::policy::StorePolicy;

/// Whether a store call may be repeated after an ambiguous failure.
///
/// A timed-out write may still have committed, so only calls whose repetition
/// cannot change the outcome are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Allowed,
    Never,
}

/// Service owning every read and mutation of catalog items.
///
/// The store is injected at construction, so tests can hand in an
/// [`item_store::InMemoryItemStore`] or a purpose-built double.
pub struct CatalogService<S: ItemStore> {
    store: S,
    policy: StorePolicy,
}

impl<S: ItemStore> CatalogService<S> {
    /// Creates a catalog service with the default store policy.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, StorePolicy::default())
    }

    /// Creates a catalog service with an explicit timeout/retry policy.
    pub fn with_policy(store: S, policy: StorePolicy) -> Self {
        Self { store, policy }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    /// Stores a new item and returns it with its assigned identifier.
    ///
    /// Server-managed attributes (`id`, timestamps) supplied by the caller
    /// are dropped.
    #[tracing::instrument(skip(self, item), fields(name = %item.name))]
    pub async fn create(&self, item: NewItem) -> Result<Item> {
        metrics::counter!("catalog_operations_total", "operation" => "create").increment(1);
        let item = item.sanitized();
        let name = validate_name(&item.name)?;
        let item = NewItem { name, ..item };

        let created = self
            .call("insert", Retry::Never, || self.store.insert(item.clone()))
            .await?;
        tracing::info!(item_id = %created.id, "item created");
        Ok(created)
    }

    /// Returns every item in the catalog.
    ///
    /// There is no pagination; the whole catalog is returned.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Item>> {
        metrics::counter!("catalog_operations_total", "operation" => "list").increment(1);
        self.call("list", Retry::Allowed, || self.store.list()).await
    }

    /// Loads an item by identifier.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str) -> Result<Item> {
        metrics::counter!("catalog_operations_total", "operation" => "get").increment(1);
        let item_id = parse_id(id)?;
        self.call("get", Retry::Allowed, || self.store.get(item_id))
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Applies a partial update and returns the updated item.
    ///
    /// An empty patch performs no write and returns the current item.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_by_id(&self, id: &str, patch: ItemPatch) -> Result<Item> {
        metrics::counter!("catalog_operations_total", "operation" => "update").increment(1);
        let item_id = parse_id(id)?;

        let mut patch = patch.sanitized();
        if let Some(name) = patch.name.take() {
            patch.name = Some(validate_name(&name)?);
        }

        if patch.is_empty() {
            return self.get_by_id(id).await;
        }

        let updated = self
            .call("update", Retry::Allowed, || {
                self.store.update(item_id, patch.clone())
            })
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        tracing::info!(item_id = %updated.id, "item updated");
        Ok(updated)
    }

    /// Deletes an item and returns its state prior to deletion.
    #[tracing::instrument(skip(self))]
    pub async fn delete_by_id(&self, id: &str) -> Result<Item> {
        metrics::counter!("catalog_operations_total", "operation" => "delete").increment(1);
        let item_id = parse_id(id)?;

        let deleted = self
            .call("delete", Retry::Never, || self.store.delete(item_id))
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        tracing::info!(item_id = %deleted.id, "item deleted");
        Ok(deleted)
    }

    /// Takes `quantity` units of the item named `name`.
    ///
    /// The store applies the decrement as one conditional update, so
    /// concurrent callers can never drive stock negative. A decrement that
    /// does not fit fails with `InsufficientStock` and writes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn decrement_stock(&self, name: &str, quantity: u32) -> Result<Item> {
        metrics::counter!("catalog_operations_total", "operation" => "decrement").increment(1);
        if quantity == 0 {
            return Err(CatalogError::Validation(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let outcome = self
            .call("decrement", Retry::Never, || {
                self.store.decrement(name, quantity)
            })
            .await?;

        match outcome {
            DecrementOutcome::Applied(item) => {
                metrics::counter!("inventory_decrements_total", "outcome" => "applied")
                    .increment(1);
                tracing::debug!(remaining = item.available_units, "stock decremented");
                Ok(item)
            }
            DecrementOutcome::Insufficient { available } => {
                metrics::counter!("inventory_decrements_total", "outcome" => "insufficient")
                    .increment(1);
                Err(CatalogError::InsufficientStock {
                    name: name.to_string(),
                    requested: quantity,
                    available,
                })
            }
            DecrementOutcome::NotFound => {
                metrics::counter!("inventory_decrements_total", "outcome" => "not_found")
                    .increment(1);
                Err(CatalogError::NotFound(name.to_string()))
            }
        }
    }

    /// Applies every line of an order exactly once.
    ///
    /// Lines that cannot be fulfilled are reported per line and do not stop
    /// later lines. Repeating the same order identifier is detected by the
    /// store and decrements nothing, which is what makes this call safe to
    /// retry and safe under at-least-once delivery.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id, lines = order.lines.len()))]
    pub async fn fulfill_order(&self, order: &OrderRequest) -> Result<FulfillmentReport> {
        validate_order(order)?;

        let report = self
            .call("fulfill_order", Retry::Allowed, || {
                self.store.fulfill_order(order)
            })
            .await?;

        if report.duplicate {
            metrics::counter!("orders_fulfilled_total", "outcome" => "duplicate").increment(1);
            tracing::info!("order already applied, skipping");
            return Ok(report);
        }

        for line in &report.lines {
            metrics::counter!("inventory_decrements_total", "outcome" => line.status.as_str())
                .increment(1);
        }
        let outcome = if report.is_complete() {
            "complete"
        } else {
            "partial"
        };
        metrics::counter!("orders_fulfilled_total", "outcome" => outcome).increment(1);

        Ok(report)
    }

    /// Runs a store call under the policy's timeout, retrying transient
    /// failures with backoff when `retry` allows it.
    async fn call<T, F, Fut>(&self, operation: &'static str, retry: Retry, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = item_store::Result<T>>,
    {
        let attempts = match retry {
            Retry::Allowed => self.policy.max_attempts.max(1),
            Retry::Never => 1,
        };
        let started = std::time::Instant::now();
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(self.policy.timeout, f()).await {
                Ok(result) => result.map_err(CatalogError::from),
                Err(_) => Err(CatalogError::Timeout { operation }),
            };

            match result {
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.policy.backoff.delay(attempt);
                    attempt += 1;
                    tracing::warn!(operation, attempt, ?delay, error = %err, "retrying store call");
                    metrics::counter!("catalog_store_retries_total", "operation" => operation)
                        .increment(1);
                    tokio::time::sleep(delay).await;
                }
                other => {
                    metrics::histogram!("catalog_store_call_seconds", "operation" => operation)
                        .record(started.elapsed().as_secs_f64());
                    if let Err(ref err) = other
                        && err.is_retryable()
                    {
                        tracing::error!(operation, attempts = attempt + 1, error = %err, "store call failed");
                    }
                    return other;
                }
            }
        }
    }
}

fn parse_id(id: &str) -> Result<ItemId> {
    ItemId::parse(id).map_err(|e| CatalogError::InvalidId(e.input))
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Validation(
            "Item name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_order(order: &OrderRequest) -> Result<()> {
    if order.order_id.is_blank() {
        return Err(CatalogError::Validation(
            "Order id must not be empty".to_string(),
        ));
    }
    if order.lines.is_empty() {
        return Err(CatalogError::Validation(format!(
            "Order {} has no items",
            order.order_id
        )));
    }
    for line in &order.lines {
        if line.name.trim().is_empty() {
            return Err(CatalogError::Validation(format!(
                "Order {} has an item without a name",
                order.order_id
            )));
        }
        if line.quantity == 0 {
            return Err(CatalogError::Validation(format!(
                "Order {} requests zero units of '{}'",
                order.order_id, line.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use item_store::{InMemoryItemStore, LineStatus, OrderLine, StoreError};

    use super::*;

    fn fast_policy() -> StorePolicy {
        StorePolicy::new(Duration::from_millis(100), 3).with_backoff(common::Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
        ))
    }

    /// Store double that fails the first `failures` calls with a transient error,
    /// or hangs past any timeout when `hang` is set.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: InMemoryItemStore,
        failures: Arc<AtomicU32>,
        calls: Arc<AtomicU32>,
        hang: bool,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                failures: Arc::new(AtomicU32::new(times)),
                ..Self::default()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn gate(&self) -> item_store::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ItemStore for FlakyStore {
        async fn insert(&self, item: NewItem) -> item_store::Result<Item> {
            self.gate().await?;
            self.inner.insert(item).await
        }

        async fn list(&self) -> item_store::Result<Vec<Item>> {
            self.gate().await?;
            self.inner.list().await
        }

        async fn get(&self, id: ItemId) -> item_store::Result<Option<Item>> {
            self.gate().await?;
            self.inner.get(id).await
        }

        async fn update(&self, id: ItemId, patch: ItemPatch) -> item_store::Result<Option<Item>> {
            self.gate().await?;
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: ItemId) -> item_store::Result<Option<Item>> {
            self.gate().await?;
            self.inner.delete(id).await
        }

        async fn decrement(
            &self,
            name: &str,
            quantity: u32,
        ) -> item_store::Result<DecrementOutcome> {
            self.gate().await?;
            self.inner.decrement(name, quantity).await
        }

        async fn fulfill_order(
            &self,
            order: &OrderRequest,
        ) -> item_store::Result<FulfillmentReport> {
            self.gate().await?;
            self.inner.fulfill_order(order).await
        }
    }

    async fn service_with(items: &[(&str, u32)]) -> CatalogService<InMemoryItemStore> {
        let service = CatalogService::with_policy(InMemoryItemStore::new(), fast_policy());
        for (name, units) in items {
            service.create(NewItem::new(*name, *units)).await.unwrap();
        }
        service
    }

    #[tokio::test]
    async fn test_create_trims_and_assigns_id() {
        let service = service_with(&[]).await;
        let item = service.create(NewItem::new("  Widget ", 4)).await.unwrap();

        assert_eq!(item.name, "Widget");
        let loaded = service.get_by_id(&item.id.to_string()).await.unwrap();
        assert_eq!(loaded, item);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let service = service_with(&[]).await;
        let err = service.create(NewItem::new("   ", 1)).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(service.store().item_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let service = service_with(&[("Widget", 1)]).await;
        let err = service.create(NewItem::new("Widget", 1)).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_get_invalid_and_missing_ids() {
        let service = service_with(&[]).await;

        let err = service.get_by_id("not-an-id").await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidId(id) if id == "not-an-id"));

        let err = service
            .get_by_id(&ItemId::new().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_missing_item_is_not_found() {
        let service = service_with(&[("Widget", 1)]).await;
        let err = service
            .update_by_id(&ItemId::new().to_string(), ItemPatch::new().available_units(9))
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::NotFound(_)));
        assert_eq!(service.list().await.unwrap()[0].available_units, 1);
    }

    #[tokio::test]
    async fn test_update_invalid_id() {
        let service = service_with(&[]).await;
        let err = service
            .update_by_id("xyz", ItemPatch::new().name("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidId(_)));
    }

    #[tokio::test]
    async fn test_update_rejects_blank_name() {
        let service = service_with(&[("Widget", 1)]).await;
        let id = service.list().await.unwrap()[0].id.to_string();
        let err = service
            .update_by_id(&id, ItemPatch::new().name(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_partial_fields() {
        let service = service_with(&[]).await;
        let item = service
            .create(NewItem::new("Widget", 5).with_attribute("price", 10))
            .await
            .unwrap();

        let updated = service
            .update_by_id(&item.id.to_string(), ItemPatch::new().attribute("price", 12))
            .await
            .unwrap();

        assert_eq!(updated.name, "Widget");
        assert_eq!(updated.available_units, 5);
        assert_eq!(updated.attributes["price"], 12);
    }

    #[tokio::test]
    async fn test_empty_patch_returns_current_item() {
        let service = service_with(&[("Widget", 5)]).await;
        let item = service.list().await.unwrap().remove(0);

        let unchanged = service
            .update_by_id(&item.id.to_string(), ItemPatch::new())
            .await
            .unwrap();
        assert_eq!(unchanged, item);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let service = service_with(&[("Widget", 5)]).await;
        let item = service.list().await.unwrap().remove(0);
        let id = item.id.to_string();

        let deleted = service.delete_by_id(&id).await.unwrap();
        assert_eq!(deleted, item);

        assert!(matches!(
            service.get_by_id(&id).await.unwrap_err(),
            CatalogError::NotFound(_)
        ));
        assert!(matches!(
            service.delete_by_id(&id).await.unwrap_err(),
            CatalogError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_decrement_stock() {
        let service = service_with(&[("Widget", 5)]).await;

        let item = service.decrement_stock("Widget", 3).await.unwrap();
        assert_eq!(item.available_units, 2);

        let err = service.decrement_stock("Widget", 3).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(service.list().await.unwrap()[0].available_units, 2);

        let err = service.decrement_stock("Gadget", 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(name) if name == "Gadget"));
    }

    #[tokio::test]
    async fn test_decrement_zero_is_rejected() {
        let service = service_with(&[("Widget", 5)]).await;
        let err = service.decrement_stock("Widget", 0).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_fulfill_order_validation() {
        let service = service_with(&[("Widget", 5)]).await;

        let empty = OrderRequest::new("1", vec![]);
        assert!(matches!(
            service.fulfill_order(&empty).await.unwrap_err(),
            CatalogError::Validation(_)
        ));

        let zero = OrderRequest::new("2", vec![OrderLine::new("Widget", 0)]);
        assert!(matches!(
            service.fulfill_order(&zero).await.unwrap_err(),
            CatalogError::Validation(_)
        ));

        let blank = OrderRequest::new(" ", vec![OrderLine::new("Widget", 1)]);
        assert!(matches!(
            service.fulfill_order(&blank).await.unwrap_err(),
            CatalogError::Validation(_)
        ));
        assert_eq!(service.store().processed_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_fulfill_order_partial() {
        let service = service_with(&[("Widget", 5)]).await;
        let order = OrderRequest::new(
            "7",
            vec![OrderLine::new("Gizmo", 1), OrderLine::new("Widget", 2)],
        );

        let report = service.fulfill_order(&order).await.unwrap();
        assert_eq!(report.lines[0].status, LineStatus::NotFound);
        assert_eq!(report.lines[1].status, LineStatus::Fulfilled { remaining: 3 });
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = FlakyStore::failing(2);
        let service = CatalogService::with_policy(store.clone(), fast_policy());

        let items = service.list().await.unwrap();
        assert!(items.is_empty());
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = FlakyStore::failing(10);
        let service = CatalogService::with_policy(store.clone(), fast_policy());

        let err = service.list().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_decrement_is_not_retried() {
        let store = FlakyStore::failing(1);
        let service = CatalogService::with_policy(store.clone(), fast_policy());

        let err = service.decrement_stock("Widget", 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::Store(_)));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_calls_time_out() {
        let store = FlakyStore::hanging();
        let service = CatalogService::with_policy(
            store.clone(),
            StorePolicy::new(Duration::from_millis(50), 2),
        );

        let err = service.get_by_id(&ItemId::new().to_string()).await.unwrap_err();
        assert!(matches!(err, CatalogError::Timeout { operation: "get" }));
        assert_eq!(store.calls(), 2);
    }

    #[derive(Default)]
    struct CountingRecorder {
        counters: std::sync::Mutex<std::collections::HashMap<String, Arc<std::sync::atomic::AtomicU64>>>,
    }

    impl CountingRecorder {
        fn count(&self, name: &str, operation: &str) -> u64 {
            let key = format!("{name}{{operation={operation}}}");
            self.counters
                .lock()
                .unwrap()
                .get(&key)
                .map_or(0, |c| c.load(Ordering::SeqCst))
        }
    }

    impl metrics::Recorder for CountingRecorder {
        fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
        fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
        fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

        fn register_counter(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
            let labels: Vec<String> = key
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            let id = format!("{}{{{}}}", key.name(), labels.join(","));
            let counter = self.counters.lock().unwrap().entry(id).or_default().clone();
            metrics::Counter::from_arc(counter)
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }

        fn register_histogram(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_decrement_counts_as_catalog_operation() {
        let recorder = CountingRecorder::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let service = service_with(&[("Widget", 5)]).await;
                service.decrement_stock("Widget", 2).await.unwrap();
                service.decrement_stock("Widget", 9).await.unwrap_err();
            })
        });

        assert_eq!(recorder.count("catalog_operations_total", "decrement"), 2);
        assert_eq!(recorder.count("catalog_operations_total", "create"), 1);
    }
}
