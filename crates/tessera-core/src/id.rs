//! # Identifier Generator
//!
//! Time-ordered 128-bit identifiers in the UUIDv7 layout.
//!
//! ## Byte Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  byte  0  1  2  3  4  5 │ 6      7 │ 8      9 10 11 12 13 14 15        │
//! │        ─────────────────┼──────────┼──────────────────────────         │
//! │        unix millis (BE) │ 0111 rnd │ 10 rnd  random                    │
//! │        48 bits          │ ver + 12 │ var + 62 random bits              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ids generated in later milliseconds sort after earlier ones, both as
//! bytes and as their lowercase hyphenated text. Ordering inside a single
//! millisecond depends on the random bits and is unspecified.

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Generates a new 36-character hyphenated id for the current time.
///
/// Safe to call from any thread; never blocks on I/O beyond the OS
/// random source.
pub fn new_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    id_at(millis).hyphenated().to_string()
}

/// Generates an id stamped with the given Unix millisecond timestamp.
pub fn id_at(unix_millis: u64) -> Uuid {
    let mut random = [0u8; 10];
    OsRng.fill_bytes(&mut random);
    assemble(unix_millis, random)
}

/// Builds the 16 id bytes from a timestamp and 80 bits of randomness.
///
/// Six of the random bits are overwritten by the version and variant
/// markers, leaving 74 random bits.
pub fn assemble(unix_millis: u64, random: [u8; 10]) -> Uuid {
    let ts = unix_millis.to_be_bytes();
    let mut bytes = [0u8; 16];

    // 48-bit big-endian timestamp (low six bytes of the u64)
    bytes[..6].copy_from_slice(&ts[2..8]);
    bytes[6..].copy_from_slice(&random);

    bytes[6] = (bytes[6] & 0x0f) | 0x70;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Extracts the embedded creation time from an id string.
pub fn timestamp_of(id: &str) -> CoreResult<DateTime<Utc>> {
    let uuid = Uuid::parse_str(id).map_err(|e| CoreError::InvalidId(format!("{id}: {e}")))?;
    let bytes = uuid.as_bytes();

    let mut ts = [0u8; 8];
    ts[2..8].copy_from_slice(&bytes[..6]);
    let millis = u64::from_be_bytes(ts) as i64;

    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| CoreError::InvalidId(format!("{id}: timestamp out of range")))
}
