use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Store-assigned identifier of a catalog item.
///
/// Wraps a UUID so item identifiers cannot be confused with order
/// identifiers or other UUID-based values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

/// Returned when a string is not a well-formed item identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid item id '{input}'")]
pub struct InvalidItemId {
    pub input: String,
}

impl ItemId {
    /// Creates a new random item ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an item ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses the textual form used in URLs.
    pub fn parse(input: &str) -> Result<Self, InvalidItemId> {
        Uuid::parse_str(input.trim())
            .map(Self)
            .map_err(|_| InvalidItemId {
                input: input.to_string(),
            })
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ItemId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ItemId> for Uuid {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// Identifier of an order message, used as the idempotency key when
/// applying stock decrements.
///
/// Orders are created by an upstream service, so the value is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Creates an order ID from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the order ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is blank.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_new_creates_unique_ids() {
        let id1 = ItemId::new();
        let id2 = ItemId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn item_id_parse_accepts_display_form() {
        let id = ItemId::new();
        let parsed = ItemId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn item_id_parse_rejects_garbage() {
        let err = ItemId::parse("64b7f0c2e1").unwrap_err();
        assert_eq!(err.input, "64b7f0c2e1");
        assert!(err.to_string().contains("64b7f0c2e1"));
    }

    #[test]
    fn item_id_serializes_as_plain_string() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&ItemId::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn order_id_blank_detection() {
        assert!(OrderId::new("  ").is_blank());
        assert!(!OrderId::new("42").is_blank());
    }
}
