//! Monotonic base-36 message ids.

use crate::Error;

/// Id stamped on the handshake request; the counter starts here.
pub(crate) const HANDSHAKE_ID: u64 = 1;

const RADIX: u32 = 36;

/// Largest inbound id the counter will adopt (2^53, the largest integer a
/// JavaScript peer counts exactly). Keeps `next_id` far from `u64::MAX`.
pub(crate) const MAX_OBSERVED_ID: u64 = 1 << 53;

/// Encode `n` as lowercase base-36.
pub(crate) fn encode_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        if let Some(c) = char::from_digit((n % u64::from(RADIX)) as u32, RADIX) {
            digits.push(c);
        }
        n /= u64::from(RADIX);
    }
    digits.iter().rev().collect()
}

/// Decode a base-36 string (case-insensitive).
pub(crate) fn decode_base36(raw: &str) -> Result<u64, Error> {
    // from_str_radix tolerates a leading '+', which is not a valid id.
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::MalformedId(raw.to_string()));
    }
    u64::from_str_radix(raw, RADIX).map_err(|_| Error::MalformedId(raw.to_string()))
}

/// Message id counter shared by outgoing requests and observed server ids.
#[derive(Debug)]
pub(crate) struct IdSequencer {
    counter: u64,
}

impl IdSequencer {
    pub(crate) fn new() -> Self {
        Self {
            counter: HANDSHAKE_ID,
        }
    }

    /// Advance the counter by one and return it encoded.
    ///
    /// The counter only moves by one per request or by an observed id of at
    /// most [`MAX_OBSERVED_ID`], so the saturation is never reached.
    pub(crate) fn next_id(&mut self) -> String {
        self.counter = self.counter.saturating_add(1);
        encode_base36(self.counter)
    }

    /// Raise the counter to an inbound id if it is larger.
    ///
    /// A malformed id, or one above [`MAX_OBSERVED_ID`], leaves the counter
    /// untouched.
    pub(crate) fn observe(&mut self, raw: &str) -> Result<(), Error> {
        let seen = decode_base36(raw)?;
        if seen > MAX_OBSERVED_ID {
            return Err(Error::MalformedId(raw.to_string()));
        }
        self.counter = self.counter.max(seen);
        Ok(())
    }

    pub(crate) fn current(&self) -> u64 {
        self.counter
    }
}
