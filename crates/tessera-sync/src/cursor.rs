//! Sequence cursor: remembers the highest `serverSequence` pulled per
//! repository so the next fetch can ask only for newer events.
//!
//! ```text
//!   fetch(repo, {"afterSequence": 41}) ──► [.., seq 42, .., seq 57]
//!                                                               │
//!   config["tessera.cursor.<repo>"] = 57 ◄──── max_sequence ────┘
//! ```
//!
//! The cursor lives in the client's config port, so it follows the active
//! namespace and is wiped by `clear_all_data`.

use serde_json::{json, Value};
use tracing::debug;

use crate::client::SyncClient;
use crate::error::SyncResult;

const CURSOR_PREFIX: &str = "tessera.cursor.";

pub fn cursor_key(repository: &str) -> String {
    format!("{CURSOR_PREFIX}{repository}")
}

pub async fn last_sequence(client: &SyncClient, repository: &str) -> SyncResult<Option<i64>> {
    let value = client.get_config(&cursor_key(repository)).await?;
    Ok(value.and_then(|v| v.as_int()))
}

/// Stores `sequence` if it moves the cursor forward. Returns whether it did.
pub async fn save_last_sequence(
    client: &SyncClient,
    repository: &str,
    sequence: i64,
) -> SyncResult<bool> {
    if let Some(last) = last_sequence(client, repository).await? {
        if sequence <= last {
            return Ok(false);
        }
    }
    client.set_config(&cursor_key(repository), sequence).await?;
    debug!(repository = %repository, sequence, "Cursor advanced");
    Ok(true)
}

/// Highest `serverSequence` in a batch of wire items, if any carry one.
pub fn max_sequence(items: &[Value]) -> Option<i64> {
    items
        .iter()
        .filter_map(|item| match item.get("serverSequence")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .max()
}

pub fn sequence_filter(last: Option<i64>) -> Option<Value> {
    last.map(|sequence| json!({ "afterSequence": sequence }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use tessera_db::MemoryStorage;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Item {
        id: String,
    }

    #[test]
    fn test_max_sequence() {
        let items = vec![
            json!({"serverSequence": 3}),
            json!({"serverSequence": "12"}),
            json!({"recordId": "no-sequence"}),
            json!({"serverSequence": 7}),
        ];
        assert_eq!(max_sequence(&items), Some(12));
        assert_eq!(max_sequence(&[json!({})]), None);
    }

    #[test]
    fn test_sequence_filter() {
        assert_eq!(sequence_filter(None), None);
        assert_eq!(sequence_filter(Some(9)), Some(json!({"afterSequence": 9})));
    }

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let repo = Repository::<Item>::builder("item")
            .id(|i| i.id.clone())
            .build()
            .unwrap();
        let client = SyncClient::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .repository(Arc::new(repo))
            .build()
            .unwrap();
        client.initialize().await.unwrap();

        assert_eq!(last_sequence(&client, "item").await.unwrap(), None);
        assert!(save_last_sequence(&client, "item", 10).await.unwrap());
        assert!(!save_last_sequence(&client, "item", 4).await.unwrap());
        assert_eq!(last_sequence(&client, "item").await.unwrap(), Some(10));
        assert_eq!(cursor_key("item"), "tessera.cursor.item");
    }
}
