//! Transport-independent handling of a single order message.

use std::sync::Arc;

use catalog::CatalogService;
use item_store::{FulfillmentReport, ItemStore, LineStatus};

use crate::message::OrderMessage;

/// What the transport should do with a message once processing finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Fully processed, including orders that were only partially fulfilled
    /// and orders already applied by an earlier delivery.
    Ack(FulfillmentReport),
    /// A transient failure; deliver the message again later.
    Retry(String),
    /// The message can never be processed; move it to the dead-letter queue.
    DeadLetter(String),
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack(_) => "ack",
            Disposition::Retry(_) => "retry",
            Disposition::DeadLetter(_) => "dead_letter",
        }
    }
}

/// Decodes order messages and applies them through the catalog.
pub struct OrderProcessor<S: ItemStore> {
    catalog: Arc<CatalogService<S>>,
}

impl<S: ItemStore> Clone for OrderProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<S: ItemStore> OrderProcessor<S> {
    pub fn new(catalog: Arc<CatalogService<S>>) -> Self {
        Self { catalog }
    }

    /// Processes one raw payload. Never panics and never fails; every
    /// outcome is expressed as a [`Disposition`].
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let disposition = self.apply(payload).await;
        metrics::counter!("order_messages_total", "disposition" => disposition.as_str())
            .increment(1);
        disposition
    }

    async fn apply(&self, payload: &[u8]) -> Disposition {
        let request = match OrderMessage::decode(payload).and_then(OrderMessage::into_request) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting order message");
                return Disposition::DeadLetter(err.to_string());
            }
        };

        match self.catalog.fulfill_order(&request).await {
            Ok(report) => {
                for line in report.failed_lines() {
                    match line.status {
                        LineStatus::InsufficientStock { available } => tracing::warn!(
                            order_id = %report.order_id,
                            item = %line.name,
                            requested = line.quantity,
                            available,
                            "order line not fulfilled: insufficient stock"
                        ),
                        _ => tracing::warn!(
                            order_id = %report.order_id,
                            item = %line.name,
                            requested = line.quantity,
                            "order line not fulfilled: unknown item"
                        ),
                    }
                }
                tracing::info!(
                    order_id = %report.order_id,
                    duplicate = report.duplicate,
                    fulfilled = report.fulfilled_count(),
                    failed = report.failed_count(),
                    "order processed"
                );
                Disposition::Ack(report)
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(order_id = %request.order_id, error = %err, "order deferred");
                Disposition::Retry(err.to_string())
            }
            Err(err) => {
                tracing::error!(order_id = %request.order_id, error = %err, "order rejected");
                Disposition::DeadLetter(err.to_string())
            }
        }
    }
}
