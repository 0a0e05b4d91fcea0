//! # Push Batch Wire Shape
//!
//! Local events grouped by operation for a push call.
//!
//! ## Message Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ChangeBatch (JSON)                              │
//! │                                                                         │
//! │  {                                                                      │
//! │    "insert": [ {eventId, repositoryName, recordId, operation, ...} ],  │
//! │    "update": [ {eventId, repositoryName, recordId, operation, ...} ],  │
//! │    "delete": [ "u1", "u7" ]                                            │
//! │  }                                                                      │
//! │                                                                         │
//! │  delete carries record ids only; order inside each group follows the  │
//! │  input (pending events arrive ascending by eventId).                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tessera_core::{RawEvent, SyncOperation};

/// Pending events grouped by operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub insert: Vec<RawEvent>,
    #[serde(default)]
    pub update: Vec<RawEvent>,
    #[serde(default)]
    pub delete: Vec<String>,
}

impl ChangeBatch {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a RawEvent>) -> Self {
        let mut batch = ChangeBatch::default();
        for event in events {
            match event.operation() {
                SyncOperation::Insert => batch.insert.push(event.clone()),
                SyncOperation::Update => batch.update.push(event.clone()),
                SyncOperation::Delete => batch.delete.push(event.record_id().to_string()),
            }
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.insert.len() + self.update.len() + self.delete.len()
    }
}
