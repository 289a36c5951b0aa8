//! Wire format of order messages.
//!
//! Two layouts are accepted. The current one lists items with explicit
//! quantities:
//!
//! ```json
//! {"id": "o-1", "userId": "u-7", "items": [{"name": "Widget", "quantity": 2}],
//!  "phoneNumber": "555-0100", "totalPrice": "19.90"}
//! ```
//!
//! The legacy layout names each unit once in a comma-separated string:
//!
//! ```json
//! {"Id": 1, "UserId": "u-7", "OrderItems": "Widget,Widget,Gadget",
//!  "PhoneNumber": "555-0100", "TotalPrice": "19.90"}
//! ```

use std::str::FromStr;

use common::OrderId;
use item_store::{OrderLine, OrderRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::error::MessageError;

/// One requested item with an explicit quantity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderItem {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Quantity")]
    pub quantity: u32,
}

/// An order event as delivered by the queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    #[serde(alias = "Id", deserialize_with = "order_id_from_any")]
    pub id: OrderId,
    #[serde(default, alias = "UserId")]
    pub user_id: Option<String>,
    #[serde(default, alias = "Items")]
    pub items: Vec<OrderItem>,
    /// Legacy comma-separated item names, one unit per occurrence.
    #[serde(default, alias = "OrderItems")]
    pub order_items: Option<String>,
    #[serde(default, alias = "PhoneNumber")]
    pub phone_number: Option<String>,
    #[serde(default, alias = "TotalPrice", deserialize_with = "price_from_any")]
    pub total_price: Option<Decimal>,
}

impl OrderMessage {
    /// Decodes a raw queue payload.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Returns the requested lines, merging repeated names in first-seen order.
    ///
    /// Explicit `items` win over the legacy `OrderItems` string. Fails if a
    /// merged quantity does not fit in a `u32`.
    pub fn lines(&self) -> Result<Vec<OrderLine>, MessageError> {
        let mut lines: Vec<OrderLine> = Vec::new();
        let mut add = |name: &str, quantity: u32| -> Result<(), MessageError> {
            let name = name.trim();
            if name.is_empty() {
                return Ok(());
            }
            match lines.iter_mut().find(|l| l.name == name) {
                Some(line) => {
                    line.quantity = line.quantity.checked_add(quantity).ok_or_else(|| {
                        MessageError::Invalid(format!(
                            "order {} requests too many units of '{name}'",
                            self.id
                        ))
                    })?;
                }
                None => lines.push(OrderLine::new(name, quantity)),
            }
            Ok(())
        };

        if !self.items.is_empty() {
            for item in &self.items {
                add(&item.name, item.quantity)?;
            }
        } else if let Some(ref names) = self.order_items {
            for name in names.split(',') {
                add(name, 1)?;
            }
        }

        Ok(lines)
    }

    /// Converts the message into an order request keyed by the order id.
    pub fn into_request(self) -> Result<OrderRequest, MessageError> {
        if self.id.is_blank() {
            return Err(MessageError::Invalid("order id is empty".to_string()));
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(MessageError::Invalid(format!(
                "order {} requests zero units of '{}'",
                self.id, item.name
            )));
        }

        let lines = self.lines()?;
        if lines.is_empty() {
            return Err(MessageError::Invalid(format!(
                "order {} lists no items",
                self.id
            )));
        }

        Ok(OrderRequest::new(self.id, lines))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Number(serde_json::Number),
}

fn order_id_from_any<'de, D>(deserializer: D) -> Result<OrderId, D::Error>
where
    D: Deserializer<'de>,
{
    match RawScalar::deserialize(deserializer)? {
        RawScalar::Text(s) => Ok(OrderId::new(s.trim())),
        RawScalar::Number(n) => Ok(OrderId::new(n.to_string())),
    }
}

fn price_from_any<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<RawScalar>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(RawScalar::Text(s)) if s.trim().is_empty() => return Ok(None),
        Some(RawScalar::Text(s)) => s.trim().to_string(),
        Some(RawScalar::Number(n)) => n.to_string(),
    };

    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid total price '{raw}': {e}")))
}
