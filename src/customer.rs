use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::RolodexError;

/// One customer record. Stored as a single JSON document at
/// `customers/<id>.json`; the id determines the filename.
///
/// Profile fields are not schema-constrained, so anything beyond `id`
/// and `interactions` is captured verbatim in `profile` and written back
/// unchanged on the next save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl Customer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            interactions: Vec::new(),
            profile: Map::new(),
        }
    }

    /// Convenience for building a customer with profile fields.
    pub fn with_profile(id: &str, profile: Map<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            interactions: Vec::new(),
            profile,
        }
    }
}

/// A single interaction with a customer, embedded in the parent record.
/// Interactions are append-only; sequence order is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    /// Create an interaction stamped with the current instant. The id is
    /// the epoch-milliseconds of creation, matching the on-disk format.
    pub fn now(kind: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: now.timestamp_millis().to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            // Attachment linking is not wired through; always empty at creation.
            files: Vec::new(),
            timestamp: now,
        }
    }
}

/// Request payload for appending an interaction to an existing customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInteraction {
    pub customer_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// Validate a caller-supplied customer id before it becomes a filename.
/// Rejects anything that could escape the customers/ directory.
pub fn validate_id(id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(RolodexError::InvalidCustomerId("empty id".to_string()));
    }
    if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(RolodexError::InvalidCustomerId(id.to_string()));
    }
    Ok(())
}
