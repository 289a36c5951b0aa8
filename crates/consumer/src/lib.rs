//! Order event consumer.
//!
//! Orders arrive on a queue with at-least-once delivery. Each message is
//! decoded into an [`OrderMessage`], turned into an order request, and
//! applied through the catalog service, which decrements stock at most once
//! per order identifier. A message is acknowledged only after it has been
//! fully processed.
//!
//! [`OrderProcessor`] holds the transport-independent logic;
//! [`OrderConsumer`] binds it to a NATS JetStream durable pull consumer.

pub mod config;
pub mod error;
pub mod message;
pub mod nats;
pub mod processor;
pub mod state;

pub use config::ConsumerConfig;
pub use error::{ConsumerError, MessageError};
pub use message::{OrderItem, OrderMessage};
pub use nats::OrderConsumer;
pub use processor::{Disposition, OrderProcessor};
pub use state::ConsumerState;
