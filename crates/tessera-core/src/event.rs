//! # Event Model
//!
//! The `Event<T>` envelope wraps a domain payload with synchronization
//! metadata. It is the unit of conflict resolution and of wire transfer.
//!
//! ## Event Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Event Lifecycle                                  │
//! │                                                                         │
//! │  LOCAL MUTATION                      REMOTE PULL                        │
//! │  repository.upsert(user)             client.pull_changes(batch)         │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  Event { status: pending,            Event { status: ok,                │
//! │          sequence: None }                    sequence: Some(n) }        │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  strategy pushes ──► confirm_pushed   conflict resolver picks winner   │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  status: ok | failed                  stored winner                     │
//! │                                                                         │
//! │  IMMUTABLE: event_id, sync_created_at                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! ```json
//! {
//!   "eventId": "018f...", "repositoryName": "user", "recordId": "u1",
//!   "operation": "update", "payload": { "id": "u1", "name": "Ann" },
//!   "syncStatus": "ok", "syncCreatedAt": 1700000000000, "serverSequence": 5
//! }
//! ```
//! `operation` also decodes from its ordinal (0, 1, 2). `syncCreatedAt`
//! also decodes from RFC 3339 but is always written as epoch millis.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::id::new_id;

// =============================================================================
// Sync Status
// =============================================================================

/// Synchronization state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Written locally, not yet accepted by the remote.
    #[default]
    Pending,
    /// The remote has this version.
    Ok,
    /// Last push attempt was rejected; retried on the next cycle.
    Failed,
}

impl SyncStatus {
    /// Stable string form used by storage adapters.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Ok => "ok",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "ok" => Ok(SyncStatus::Ok),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(CoreError::MalformedEvent(format!("unknown sync status '{other}'"))),
        }
    }
}

// =============================================================================
// Sync Operation
// =============================================================================

/// Kind of mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Insert,
    Update,
    Delete,
}

impl SyncOperation {
    /// Wire ordinal: insert = 0, update = 1, delete = 2.
    pub fn ordinal(&self) -> u8 {
        match self {
            SyncOperation::Insert => 0,
            SyncOperation::Update => 1,
            SyncOperation::Delete => 2,
        }
    }

    pub fn from_ordinal(ordinal: u64) -> CoreResult<Self> {
        match ordinal {
            0 => Ok(SyncOperation::Insert),
            1 => Ok(SyncOperation::Update),
            2 => Ok(SyncOperation::Delete),
            other => Err(CoreError::InvalidOperation(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Insert => "insert",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(SyncOperation::Insert),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(CoreError::InvalidOperation(other.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OperationRepr {
    Ordinal(u64),
    Name(String),
}

impl<'de> Deserialize<'de> for SyncOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match OperationRepr::deserialize(deserializer)? {
            OperationRepr::Ordinal(n) => SyncOperation::from_ordinal(n).map_err(de::Error::custom),
            OperationRepr::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}

// =============================================================================
// Wire Timestamps
// =============================================================================

/// `syncCreatedAt` codec: writes epoch millis, reads millis or RFC 3339.
pub mod wire_time {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    use crate::error::CoreError;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimeRepr {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(ts.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match TimeRepr::deserialize(deserializer)? {
            TimeRepr::Millis(ms) => from_millis(ms).map_err(de::Error::custom),
            TimeRepr::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Converts epoch millis into a UTC timestamp.
    pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, CoreError> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| CoreError::InvalidTimestamp(ms.to_string()))
    }

    /// Parses RFC 3339 text, or digits as epoch millis.
    pub fn parse(text: &str) -> Result<DateTime<Utc>, CoreError> {
        if let Ok(ms) = text.parse::<i64>() {
            return from_millis(ms);
        }
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CoreError::InvalidTimestamp(format!("{text}: {e}")))
    }
}

// =============================================================================
// Event
// =============================================================================

/// Event whose payload is still raw JSON (storage and wire form).
pub type RawEvent = Event<Value>;

/// Every field of an event, for building or restoring one explicitly.
///
/// Storage adapters use this to rehydrate rows; tests use it to craft
/// remote events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventParts<T> {
    pub event_id: String,
    pub repository_name: String,
    pub record_id: String,
    pub operation: SyncOperation,
    pub payload: Option<T>,
    pub sync_status: SyncStatus,
    pub sync_created_at: DateTime<Utc>,
    pub server_sequence: Option<i64>,
}

/// A sync-tracked wrapper around one domain record mutation.
///
/// `event_id` and `sync_created_at` are fixed at construction; there are no
/// setters for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<T> {
    event_id: String,
    repository_name: String,
    record_id: String,
    operation: SyncOperation,
    payload: Option<T>,
    #[serde(default)]
    sync_status: SyncStatus,
    #[serde(with = "wire_time")]
    sync_created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_sequence: Option<i64>,
}

impl<T> From<EventParts<T>> for Event<T> {
    fn from(parts: EventParts<T>) -> Self {
        Event {
            event_id: parts.event_id,
            repository_name: parts.repository_name,
            record_id: parts.record_id,
            operation: parts.operation,
            payload: parts.payload,
            sync_status: parts.sync_status,
            sync_created_at: parts.sync_created_at,
            server_sequence: parts.server_sequence,
        }
    }
}

impl<T> Event<T> {
    /// Stamps a new local, `pending` event with a fresh id and timestamp.
    pub fn new_local(
        repository_name: impl Into<String>,
        record_id: impl Into<String>,
        operation: SyncOperation,
        payload: Option<T>,
    ) -> Self {
        Event {
            event_id: new_id(),
            repository_name: repository_name.into(),
            record_id: record_id.into(),
            operation,
            payload,
            sync_status: SyncStatus::Pending,
            sync_created_at: Utc::now(),
            server_sequence: None,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn operation(&self) -> SyncOperation {
        self.operation
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    pub fn into_payload(self) -> Option<T> {
        self.payload
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    pub fn sync_created_at(&self) -> DateTime<Utc> {
        self.sync_created_at
    }

    pub fn server_sequence(&self) -> Option<i64> {
        self.server_sequence
    }

    /// `true` unless the remote has acknowledged this version.
    pub fn needs_sync(&self) -> bool {
        self.sync_status != SyncStatus::Ok
    }

    pub fn is_deleted(&self) -> bool {
        self.operation == SyncOperation::Delete
    }

    /// Returns the same event with a new sync status.
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    /// Returns the same event carrying a different payload.
    ///
    /// All metadata is kept, so payload and metadata stay in lockstep when a
    /// resolver merges two versions.
    pub fn with_payload<U>(self, payload: Option<U>) -> Event<U> {
        Event {
            event_id: self.event_id,
            repository_name: self.repository_name,
            record_id: self.record_id,
            operation: self.operation,
            payload,
            sync_status: self.sync_status,
            sync_created_at: self.sync_created_at,
            server_sequence: self.server_sequence,
        }
    }

    /// Converts the payload, keeping all metadata.
    pub fn try_map_payload<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Event<U>, E> {
        let Event {
            event_id,
            repository_name,
            record_id,
            operation,
            payload,
            sync_status,
            sync_created_at,
            server_sequence,
        } = self;

        let payload = payload.map(f).transpose()?;
        Ok(Event {
            event_id,
            repository_name,
            record_id,
            operation,
            payload,
            sync_status,
            sync_created_at,
            server_sequence,
        })
    }

    pub fn into_parts(self) -> EventParts<T> {
        EventParts {
            event_id: self.event_id,
            repository_name: self.repository_name,
            record_id: self.record_id,
            operation: self.operation,
            payload: self.payload,
            sync_status: self.sync_status,
            sync_created_at: self.sync_created_at,
            server_sequence: self.server_sequence,
        }
    }
}

impl RawEvent {
    /// Decodes one item of a pulled batch.
    ///
    /// ## Normalization
    /// - `repositoryName` missing → `repository`
    /// - `recordId` missing → `payload[id_field]` (string or number)
    /// - `syncStatus` is always forced to `ok`: the remote sent it
    pub fn decode_remote(raw: &Value, repository: &str, id_field: &str) -> CoreResult<RawEvent> {
        let object = raw
            .as_object()
            .ok_or_else(|| CoreError::MalformedEvent("event is not a JSON object".into()))?;

        let mut object: Map<String, Value> = object.clone();

        if !object.contains_key("repositoryName") {
            object.insert("repositoryName".into(), Value::String(repository.to_string()));
        }

        if !object.contains_key("recordId") {
            let id = object
                .get("payload")
                .and_then(|p| p.get(id_field))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or_else(|| {
                    CoreError::MalformedEvent(format!(
                        "missing recordId and payload.{id_field}"
                    ))
                })?;
            object.insert("recordId".into(), Value::String(id));
        }

        let event: RawEvent = serde_json::from_value(Value::Object(object))?;
        Ok(event.with_status(SyncStatus::Ok))
    }
}
