//! NATS JetStream transport for order messages.

use async_nats::jetstream::{self, AckKind, consumer::pull};
use futures_util::StreamExt;
use item_store::ItemStore;
use tokio::sync::watch;

use crate::config::ConsumerConfig;
use crate::error::ConsumerError;
use crate::processor::{Disposition, OrderProcessor};
use crate::state::ConsumerState;

const REASON_HEADER: &str = "Inventory-Dlq-Reason";
const SOURCE_HEADER: &str = "Inventory-Dlq-Subject";

/// Durable pull consumer feeding order messages to an [`OrderProcessor`].
///
/// Messages are handled one at a time and acknowledged only after they
/// have been fully applied. Lost connections are re-established with
/// exponential backoff until shutdown is signalled.
pub struct OrderConsumer<S: ItemStore> {
    config: ConsumerConfig,
    processor: OrderProcessor<S>,
    state: watch::Sender<ConsumerState>,
}

impl<S: ItemStore> OrderConsumer<S> {
    pub fn new(config: ConsumerConfig, processor: OrderProcessor<S>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Connecting);
        Self {
            config,
            processor,
            state,
        }
    }

    /// Subscribes to state changes.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Runs until `shutdown` becomes `true` or its sender is dropped.
    ///
    /// A message being processed when shutdown arrives is abandoned
    /// unacknowledged and will be redelivered.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut failures = 0u32;

        while !*shutdown.borrow() {
            self.set_state(ConsumerState::Connecting);

            let outcome = tokio::select! {
                outcome = self.session(&mut failures) => outcome,
                _ = shutdown.changed() => break,
            };
            if let Err(err) = outcome {
                tracing::warn!(error = %err, "order subscription lost");
            }

            self.set_state(ConsumerState::Connecting);
            metrics::counter!("order_consumer_reconnects_total").increment(1);
            let delay = self.config.reconnect.delay(failures);
            failures = failures.saturating_add(1);
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting to queue");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.set_state(ConsumerState::Stopped);
        tracing::info!("order consumer stopped");
    }

    /// Connects, subscribes and consumes until the subscription fails.
    async fn session(&self, failures: &mut u32) -> Result<(), ConsumerError> {
        let (jetstream, mut messages) = self.connect().await?;
        *failures = 0;
        self.set_state(ConsumerState::Subscribed);
        tracing::info!(
            stream = %self.config.stream,
            consumer = %self.config.consumer_name,
            "consuming orders"
        );

        while let Some(next) = messages.next().await {
            let message = next.map_err(ConsumerError::transport)?;
            self.set_state(ConsumerState::Processing);
            let disposition = self.processor.process(&message.payload).await;
            let next_state = self.settle(&jetstream, &message, disposition).await;
            self.set_state(next_state);
            self.set_state(ConsumerState::Subscribed);
        }

        Err(ConsumerError::StreamClosed)
    }

    async fn connect(&self) -> Result<(jetstream::Context, pull::Stream), ConsumerError> {
        let client = async_nats::connect(self.config.nats_url.as_str())
            .await
            .map_err(ConsumerError::transport)?;
        tracing::info!(url = %self.config.nats_url, "connected to NATS");

        let jetstream = jetstream::new(client);

        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.dlq_stream.clone(),
                subjects: vec![self.config.dlq_subject.clone()],
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(ConsumerError::transport)?;

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.stream.clone(),
                subjects: vec![self.config.subject.clone()],
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(ConsumerError::transport)?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.consumer_name,
                pull::Config {
                    durable_name: Some(self.config.consumer_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    max_deliver: self.config.max_deliver,
                    filter_subject: self.config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(ConsumerError::transport)?;

        let messages = consumer
            .messages()
            .await
            .map_err(ConsumerError::transport)?;

        Ok((jetstream, messages))
    }

    /// Acknowledges, redelivers or dead-letters a processed message and
    /// returns the resulting state.
    async fn settle(
        &self,
        jetstream: &jetstream::Context,
        message: &jetstream::Message,
        disposition: Disposition,
    ) -> ConsumerState {
        let delivered = message.info().map(|info| info.delivered).unwrap_or(1);
        let settlement = plan_settlement(&disposition, delivered, self.config.max_deliver);

        let settlement = match settlement {
            Settlement::DeadLetter(reason) => {
                if matches!(disposition, Disposition::Retry(_)) {
                    tracing::warn!(delivered, "order message exhausted its deliveries");
                }
                let published = self.publish_dead_letter(jetstream, message, &reason).await;
                if let Err(ref err) = published {
                    tracing::error!(error = %err, "failed to publish to dead-letter subject");
                } else {
                    metrics::counter!("order_messages_dead_lettered_total").increment(1);
                    tracing::warn!(
                        subject = %self.config.dlq_subject,
                        reason = %reason,
                        "order message dead-lettered"
                    );
                }
                after_dead_letter(published.is_ok())
            }
            other => other,
        };

        match settlement {
            Settlement::Ack => {
                if let Err(err) = message.ack().await {
                    tracing::error!(error = %err, "failed to acknowledge order message");
                }
            }
            Settlement::Redeliver => {
                if let Err(err) = message
                    .ack_with(AckKind::Nak(Some(self.config.retry_delay)))
                    .await
                {
                    tracing::error!(error = %err, "failed to NAK order message");
                }
            }
            Settlement::DeadLetter(_) => {}
        }

        match disposition {
            Disposition::Ack(_) => ConsumerState::Acknowledged,
            _ => ConsumerState::Rejected,
        }
    }

    /// Publishes the payload to the dead-letter subject with the reason and
    /// source subject as headers, waiting for the stream to store it.
    async fn publish_dead_letter(
        &self,
        jetstream: &jetstream::Context,
        message: &jetstream::Message,
        reason: &str,
    ) -> Result<(), ConsumerError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(REASON_HEADER, header_value(reason).as_str());
        headers.insert(SOURCE_HEADER, message.subject.as_str());

        jetstream
            .publish_with_headers(
                self.config.dlq_subject.clone(),
                headers,
                message.payload.clone(),
            )
            .await
            .map_err(ConsumerError::transport)?
            .await
            .map_err(ConsumerError::transport)?;
        Ok(())
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "consumer state changed");
        }
    }
}

/// What to do with a message on the queue once it has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Ack,
    /// NAK with the configured delay.
    Redeliver,
    /// Publish to the dead-letter subject with this reason.
    DeadLetter(String),
}

/// Decides how to settle a message that has been delivered `delivered`
/// times, given the consumer's `max_deliver`.
fn plan_settlement(disposition: &Disposition, delivered: i64, max_deliver: i64) -> Settlement {
    match disposition {
        Disposition::Ack(_) => Settlement::Ack,
        Disposition::Retry(reason) if deliveries_exhausted(delivered, max_deliver) => {
            Settlement::DeadLetter(format!("gave up after {delivered} deliveries: {reason}"))
        }
        Disposition::Retry(_) => Settlement::Redeliver,
        Disposition::DeadLetter(reason) => Settlement::DeadLetter(reason.clone()),
    }
}

/// The server stops redelivering once `max_deliver` is reached, so the last
/// delivery is the final chance to keep the message.
fn deliveries_exhausted(delivered: i64, max_deliver: i64) -> bool {
    delivered >= max_deliver
}

/// A dead-lettered message is acknowledged only once the dead-letter stream
/// has stored it; otherwise it goes back for redelivery.
fn after_dead_letter(published: bool) -> Settlement {
    if published {
        Settlement::Ack
    } else {
        Settlement::Redeliver
    }
}

/// Header values must be a single line.
fn header_value(reason: &str) -> String {
    reason
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
