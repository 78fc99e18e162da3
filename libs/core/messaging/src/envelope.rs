//! Wire format of every message carried by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A domain payload wrapped with identity and provenance.
///
/// Serialized as JSON with camelCase keys:
///
/// ```json
/// {"id":"…","subject":"orders.created","data":{…},
///  "createdAt":"2025-01-01T00:00:00Z","createdBy":"billing"}
/// ```
///
/// `id` is the deduplication key and is also sent as the broker's
/// message-id header. `created_at` is informational only; ordering comes
/// from the stream sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope<T> {
    pub id: Uuid,
    pub subject: String,
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl<T> MessageEnvelope<T> {
    /// Build an envelope with a fresh random id.
    pub fn new(subject: impl Into<String>, data: T, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            data,
            created_at: Utc::now(),
            created_by: created_by.into(),
            metadata: None,
        }
    }

    /// Replace the id, e.g. to republish an existing message.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// The nil UUID is treated as "no id".
    pub fn has_id(&self) -> bool {
        !self.id.is_nil()
    }
}

/// Broker-side facts about one delivery, handed to handlers next to the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub subject: String,
    pub stream_sequence: u64,
    /// 1 on first delivery, incremented by every redelivery
    pub delivery_count: u64,
}

impl MessageInfo {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
