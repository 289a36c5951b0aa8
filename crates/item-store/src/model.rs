//! Item and order data model shared by every store backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ItemId, OrderId};

/// Attribute keys owned by the store; clients cannot set them as passthrough attributes.
const RESERVED_KEYS: [&str; 5] = ["id", "_id", "name", "createdAt", "updatedAt"];

fn strip_reserved(attributes: &mut Map<String, Value>) {
    for key in RESERVED_KEYS {
        attributes.remove(key);
    }
}

/// A catalog item.
///
/// Anything beyond name and stock (price, description, ...) is kept as an
/// opaque attribute map and flattened into the JSON representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub available_units: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Item {
    /// Builds a freshly stored item from its creation request.
    pub fn from_new(id: ItemId, new: NewItem, now: DateTime<Utc>) -> Self {
        let new = new.sanitized();
        Self {
            id,
            name: new.name,
            available_units: new.available_units,
            created_at: now,
            updated_at: now,
            attributes: new.attributes,
        }
    }

    /// Applies a partial update in place. Attributes are merged key by key.
    pub fn apply_patch(&mut self, patch: ItemPatch, now: DateTime<Utc>) {
        let patch = patch.sanitized();
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(units) = patch.available_units {
            self.available_units = units;
        }
        self.attributes.extend(patch.attributes);
        self.updated_at = now;
    }
}

/// Request to create an item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub available_units: u32,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl NewItem {
    pub fn new(name: impl Into<String>, available_units: u32) -> Self {
        Self {
            name: name.into(),
            available_units,
            attributes: Map::new(),
        }
    }

    /// Adds a passthrough attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the request with store-owned keys removed from its attributes.
    pub fn sanitized(mut self) -> Self {
        strip_reserved(&mut self.attributes);
        self
    }
}

/// Partial update of an item. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_units: Option<u32>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ItemPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn available_units(mut self, units: u32) -> Self {
        self.available_units = Some(units);
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the patch with store-owned keys removed from its attributes.
    pub fn sanitized(mut self) -> Self {
        strip_reserved(&mut self.attributes);
        self
    }

    /// Returns true if applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.available_units.is_none() && self.attributes.is_empty()
    }
}

/// Tagged result of a conditional stock decrement.
#[derive(Debug, Clone, PartialEq)]
pub enum DecrementOutcome {
    /// Stock was decremented; carries the item after the update.
    Applied(Item),
    /// Not enough stock. Nothing was written.
    Insufficient { available: u32 },
    /// No item has the requested name.
    NotFound,
}

/// One line of an order: an item name and how many units to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub name: String,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity,
        }
    }
}

/// A set of stock decrements applied atomically under one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub lines: Vec<OrderLine>,
}

impl OrderRequest {
    pub fn new(order_id: impl Into<OrderId>, lines: Vec<OrderLine>) -> Self {
        Self {
            order_id: order_id.into(),
            lines,
        }
    }

    /// Total number of units requested across all lines.
    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// What happened to a single order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LineStatus {
    Fulfilled { remaining: u32 },
    InsufficientStock { available: u32 },
    NotFound,
}

impl LineStatus {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, LineStatus::Fulfilled { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Fulfilled { .. } => "fulfilled",
            LineStatus::InsufficientStock { .. } => "insufficient_stock",
            LineStatus::NotFound => "not_found",
        }
    }
}

impl From<&DecrementOutcome> for LineStatus {
    fn from(outcome: &DecrementOutcome) -> Self {
        match outcome {
            DecrementOutcome::Applied(item) => LineStatus::Fulfilled {
                remaining: item.available_units,
            },
            DecrementOutcome::Insufficient { available } => LineStatus::InsufficientStock {
                available: *available,
            },
            DecrementOutcome::NotFound => LineStatus::NotFound,
        }
    }
}

/// Outcome of one order line, as recorded with the processed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOutcome {
    pub name: String,
    pub quantity: u32,
    #[serde(flatten)]
    pub status: LineStatus,
}

/// Result of applying an order.
///
/// Partial fulfilment is explicit: every line carries its own status, and a
/// failed line never prevents later lines from being applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentReport {
    pub order_id: OrderId,
    /// True when the order had already been applied; no stock was touched.
    pub duplicate: bool,
    pub lines: Vec<LineOutcome>,
}

impl FulfillmentReport {
    pub fn fulfilled_count(&self) -> usize {
        self.lines.iter().filter(|l| l.status.is_fulfilled()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.lines.len() - self.fulfilled_count()
    }

    /// Returns true if every line was fulfilled.
    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn failed_lines(&self) -> impl Iterator<Item = &LineOutcome> {
        self.lines.iter().filter(|l| !l.status.is_fulfilled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_json_flattens_attributes() {
        let new = NewItem::new("Widget", 5).with_attribute("price", 9.5);
        let item = Item::from_new(ItemId::new(), new, Utc::now());

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["name"], "Widget");
        assert_eq!(value["availableUnits"], 5);
        assert_eq!(value["price"], 9.5);
        assert!(value.get("attributes").is_none());
    }

    #[test]
    fn new_item_collects_unknown_keys_as_attributes() {
        let new: NewItem = serde_json::from_value(json!({
            "name": "Widget",
            "availableUnits": 3,
            "description": "blue",
            "id": "ignored"
        }))
        .unwrap();
        let new = new.sanitized();

        assert_eq!(new.available_units, 3);
        assert_eq!(new.attributes.get("description"), Some(&json!("blue")));
        assert!(!new.attributes.contains_key("id"));
    }

    #[test]
    fn new_item_rejects_negative_units() {
        let result: Result<NewItem, _> =
            serde_json::from_value(json!({"name": "Widget", "availableUnits": -1}));
        assert!(result.is_err());
    }

    #[test]
    fn apply_patch_merges_attributes() {
        let new = NewItem::new("Widget", 5)
            .with_attribute("price", 10)
            .with_attribute("description", "blue");
        let mut item = Item::from_new(ItemId::new(), new, Utc::now());

        item.apply_patch(
            ItemPatch::new().available_units(2).attribute("price", 12),
            Utc::now(),
        );

        assert_eq!(item.name, "Widget");
        assert_eq!(item.available_units, 2);
        assert_eq!(item.attributes["price"], json!(12));
        assert_eq!(item.attributes["description"], json!("blue"));
    }

    #[test]
    fn empty_patch_detection() {
        assert!(ItemPatch::new().is_empty());
        assert!(!ItemPatch::new().name("x").is_empty());
        let patch: ItemPatch = serde_json::from_value(json!({})).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn line_outcome_json_shape() {
        let outcome = LineOutcome {
            name: "Widget".into(),
            quantity: 2,
            status: LineStatus::InsufficientStock { available: 1 },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            value,
            json!({"name": "Widget", "quantity": 2, "status": "insufficient_stock", "available": 1})
        );
        let back: LineOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn report_counts() {
        let report = FulfillmentReport {
            order_id: OrderId::new("1"),
            duplicate: false,
            lines: vec![
                LineOutcome {
                    name: "a".into(),
                    quantity: 1,
                    status: LineStatus::Fulfilled { remaining: 0 },
                },
                LineOutcome {
                    name: "b".into(),
                    quantity: 1,
                    status: LineStatus::NotFound,
                },
            ],
        };
        assert_eq!(report.fulfilled_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_complete());
        assert_eq!(report.failed_lines().next().unwrap().name, "b");
    }
}
