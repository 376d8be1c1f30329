use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted node or blob: its serialized value plus the position it held
/// in an order-sensitive container, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
}

impl StoredRecord {
    /// A record with no order marker.
    pub fn new(value: Value) -> Self {
        Self { value, order: None }
    }

    /// A record carrying an order marker.
    pub fn with_order(value: Value, order: Option<usize>) -> Self {
        Self { value, order }
    }
}
