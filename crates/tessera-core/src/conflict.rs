//! # Conflict Resolution
//!
//! Deterministic last-write-wins between a local and a remote version of
//! the same record.
//!
//! ## Decision Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Last-Write-Wins Decision                             │
//! │                                                                         │
//! │  1. SERVER SEQUENCE                                                    │
//! │     both sequenced, different   → greater sequence wins                │
//! │     exactly one sequenced       → the sequenced event wins             │
//! │                                                                         │
//! │  2. CREATION TIME (equal or absent sequences)                          │
//! │     strictly later syncCreatedAt wins                                  │
//! │                                                                         │
//! │  3. FULL TIE                                                           │
//! │     remote wins                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Client clocks never override the server's order once an event carries a
//! sequence. Repeated resyncs of an identical event always land on the
//! remote copy, so replicas cannot drift apart on ties.

use crate::event::Event;

/// Which of the two compared events was preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Picks the winning side under last-write-wins.
///
/// Pure and total: the same pair always yields the same side.
pub fn winning_side<T>(local: &Event<T>, remote: &Event<T>) -> Side {
    match (local.server_sequence(), remote.server_sequence()) {
        (Some(l), Some(r)) if l != r => {
            if l > r {
                Side::Local
            } else {
                Side::Remote
            }
        }
        (Some(_), None) => Side::Local,
        (None, Some(_)) => Side::Remote,
        _ => {
            if local.sync_created_at() > remote.sync_created_at() {
                Side::Local
            } else {
                Side::Remote
            }
        }
    }
}

/// Returns a copy of the winning event.
pub fn last_write_wins<T: Clone>(local: &Event<T>, remote: &Event<T>) -> Event<T> {
    match winning_side(local, remote) {
        Side::Local => local.clone(),
        Side::Remote => remote.clone(),
    }
}

/// Outcome of a domain-specific resolver.
///
/// A repository's custom resolver decides on payloads only. `Merged` names
/// the side whose metadata (event id, timestamps, sequence, status) the
/// merged payload is written under.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    KeepLocal,
    TakeRemote,
    Merged { base: Side, payload: T },
}

impl<T> Resolution<T> {
    /// Default policy expressed as a resolution.
    pub fn last_write_wins(local: &Event<T>, remote: &Event<T>) -> Self {
        match winning_side(local, remote) {
            Side::Local => Resolution::KeepLocal,
            Side::Remote => Resolution::TakeRemote,
        }
    }

    /// Side whose metadata the stored result carries.
    pub fn base(&self) -> Side {
        match self {
            Resolution::KeepLocal => Side::Local,
            Resolution::TakeRemote => Side::Remote,
            Resolution::Merged { base, .. } => *base,
        }
    }

    /// Builds the winning event, rebuilding metadata from the base side.
    pub fn apply(self, local: Event<T>, remote: Event<T>) -> Event<T> {
        match self {
            Resolution::KeepLocal => local,
            Resolution::TakeRemote => remote,
            Resolution::Merged { base: Side::Local, payload } => local.with_payload(Some(payload)),
            Resolution::Merged { base: Side::Remote, payload } => remote.with_payload(Some(payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventParts, SyncOperation, SyncStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    fn event(name: &str, created: DateTime<Utc>, seq: Option<i64>) -> Event<String> {
        Event::from(EventParts {
            event_id: crate::new_id(),
            repository_name: "user".into(),
            record_id: "u1".into(),
            operation: SyncOperation::Update,
            payload: Some(name.to_string()),
            sync_status: SyncStatus::Pending,
            sync_created_at: created,
            server_sequence: seq,
        })
    }

    #[test]
    fn test_greater_sequence_wins_regardless_of_time() {
        let t = at(1_000_000);
        let a = event("a", t, Some(9));
        let b = event("b", t + Duration::hours(1), Some(3));
        assert_eq!(last_write_wins(&a, &b), a);
        assert_eq!(last_write_wins(&b, &a), a);
    }

    #[test]
    fn test_equal_sequence_falls_back_to_time() {
        let t = at(1_000_000);
        let a = event("a", t, Some(4));
        let b = event("b", t + Duration::milliseconds(1), Some(4));
        assert_eq!(last_write_wins(&a, &b), b);
        assert_eq!(last_write_wins(&b, &a), b);
    }

    #[test]
    fn test_full_tie_prefers_remote() {
        let t = at(1_000_000);
        let a = event("a", t, Some(4));
        let b = event("b", t, Some(4));
        assert_eq!(last_write_wins(&a, &b), b);
        assert_eq!(last_write_wins(&b, &a), a);

        let c = event("c", t, None);
        let d = event("d", t, None);
        assert_eq!(winning_side(&c, &d), Side::Remote);
    }

    #[test]
    fn test_unsequenced_drafts_compare_by_time() {
        let t = at(1_000_000);
        let older = event("older", t, None);
        let newer = event("newer", t + Duration::seconds(1), None);
        assert_eq!(winning_side(&newer, &older), Side::Local);
        assert_eq!(winning_side(&older, &newer), Side::Remote);
    }

    #[test]
    fn test_sequenced_remote_beats_newer_local_draft() {
        let t0 = at(1_000_000);
        let local = event("Ann", t0 + Duration::seconds(30), None);
        let remote = event("Ann2", t0, Some(5));
        let winner = last_write_wins(&local, &remote);
        assert_eq!(winner.payload().map(String::as_str), Some("Ann2"));
    }

    #[test]
    fn test_merged_resolution_rebuilds_base_metadata() {
        let t = at(1_000_000);
        let local = event("local", t, None);
        let remote = event("remote", t, Some(2));
        let remote_id = remote.event_id().to_string();

        let merged = Resolution::Merged {
            base: Side::Remote,
            payload: "merged".to_string(),
        }
        .apply(local, remote);

        assert_eq!(merged.event_id(), remote_id);
        assert_eq!(merged.server_sequence(), Some(2));
        assert_eq!(merged.payload().map(String::as_str), Some("merged"));
    }
}
