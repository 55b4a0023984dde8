//! Timestamp identifiers (TIDs).
//!
//! Record keys in the firehose are TIDs: 13 characters of base32-sortable
//! text where the first 11 encode microseconds since the Unix epoch and the
//! last 2 encode a clock id. Because the alphabet is in ASCII order, TIDs
//! sort lexicographically in time order.

use crate::error::{Error, Result};

/// The base32-sortable alphabet.
pub const ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Length of a TID record key.
pub const TID_LEN: usize = 13;

/// Number of trailing characters holding the clock id.
const CLOCK_ID_LEN: usize = 2;

/// Encode an integer as base32-sortable text.
///
/// Zero encodes to the empty string.
#[must_use]
pub fn encode(mut value: u64) -> String {
    let mut out = Vec::new();
    while value > 0 {
        out.push(ALPHABET[(value % 32) as usize]);
        value /= 32;
    }
    out.reverse();
    // Alphabet is ASCII
    String::from_utf8(out).unwrap_or_default()
}

/// Decode base32-sortable text into an integer.
///
/// # Errors
///
/// Returns [`Error::InvalidTid`] if the text contains a character outside
/// the alphabet or the value overflows 64 bits.
pub fn decode(text: &str) -> Result<u64> {
    text.bytes().try_fold(0u64, |acc, byte| {
        let digit = ALPHABET
            .iter()
            .position(|&c| c == byte)
            .ok_or_else(|| Error::invalid_tid(text))?;
        acc.checked_mul(32)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| Error::invalid_tid(text))
    })
}

/// Split a TID record key into `(timestamp_ms, clock_id)`.
///
/// # Errors
///
/// Returns [`Error::InvalidTid`] if the key is not exactly [`TID_LEN`] ASCII
/// characters or fails to decode.
pub fn parse_rkey(rkey: &str) -> Result<(i64, u64)> {
    if rkey.len() != TID_LEN || !rkey.is_ascii() {
        return Err(Error::invalid_tid(rkey));
    }
    let (time_part, clock_part) = rkey.split_at(rkey.len() - CLOCK_ID_LEN);
    let micros = decode(time_part)?;
    let clock_id = decode(clock_part)?;
    let millis = i64::try_from(micros / 1000).map_err(|_| Error::invalid_tid(rkey))?;
    Ok((millis, clock_id))
}

/// Build a TID record key from a millisecond timestamp and clock id.
///
/// The inverse of [`parse_rkey`] for timestamps that fit in 11 characters.
#[must_use]
pub fn make_rkey(timestamp_ms: i64, clock_id: u64) -> String {
    let micros = u64::try_from(timestamp_ms).unwrap_or(0).saturating_mul(1000);
    format!("{:2>11}{:2>2}", encode(micros), encode(clock_id % 1024))
}
