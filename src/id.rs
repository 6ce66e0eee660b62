//! IDGen collaborator (spec §2): monotone, time-ordered 64-bit ID generation,
//! plus the hash-encoding used to hand an ephemeral id to an HTTP client and
//! decode it back (spec §6, `InvalidId`).
//!
//! Layout: the top 44 bits hold milliseconds since the Unix epoch, the low 20
//! bits hold a per-millisecond sequence counter. This keeps ids strictly
//! increasing across a single generator even under contention, and gives
//! ~69 years of range before the millisecond component wraps.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{PluqError, Result};

const SEQ_BITS: u32 = 20;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    state: Mutex<(u64, u64)>, // (last_millis, seq)
}

impl IdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new((0, 0)),
        }
    }

    /// Mint the next id. Fails with `ClockBackwards` if the clock moved
    /// behind the last-observed timestamp; the caller must abort the
    /// operation that needed the id rather than retry, since a backwards
    /// clock is not self-correcting.
    pub fn next(&self) -> Result<u64> {
        let now_millis = self.clock.now_nanos() / 1_000_000;
        let mut guard = self.state.lock();
        let (last_millis, seq) = &mut *guard;

        if now_millis < *last_millis {
            return Err(PluqError::ClockBackwards);
        }

        let this_seq = if now_millis == *last_millis {
            *seq = (*seq + 1) & SEQ_MASK;
            *seq
        } else {
            *last_millis = now_millis;
            *seq = 0;
            0
        };

        Ok((now_millis << SEQ_BITS) | this_seq)
    }
}

/// Hex-encode an id for the `X-Pluq-Message-Id` header / `:id` path segment.
pub fn encode_id(id: u64) -> String {
    hex::encode(id.to_be_bytes())
}

/// Inverse of [`encode_id`]. Returns `InvalidId` on malformed input.
pub fn decode_id(s: &str) -> Result<u64> {
    let bytes = hex::decode(s).map_err(|_| PluqError::InvalidId)?;
    let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| PluqError::InvalidId)?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn ids_strictly_increase_within_same_millisecond() {
        let clock = ManualClock::new(1_000_000_000);
        let gen = IdGenerator::new(clock);
        let a = gen.next().unwrap();
        let b = gen.next().unwrap();
        let c = gen.next().unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn ids_increase_across_millisecond_boundaries() {
        let clock = ManualClock::new(1_000_000_000);
        let gen = IdGenerator::new(clock.clone());
        let a = gen.next().unwrap();
        clock.advance(1_000_000);
        let b = gen.next().unwrap();
        assert!(b > a);
    }

    #[test]
    fn clock_backwards_is_reported() {
        let clock = ManualClock::new(2_000_000);
        let gen = IdGenerator::new(clock.clone());
        gen.next().unwrap();
        clock.set(1_000_000);
        assert!(matches!(gen.next(), Err(PluqError::ClockBackwards)));
    }

    #[test]
    fn hash_encoding_round_trips() {
        let id = 0x1234_5678_9abc_def0u64;
        let encoded = encode_id(id);
        assert_eq!(decode_id(&encoded).unwrap(), id);
    }

    #[test]
    fn invalid_id_is_rejected() {
        assert!(matches!(decode_id("not-hex"), Err(PluqError::InvalidId)));
        assert!(matches!(decode_id("ab"), Err(PluqError::InvalidId)));
    }
}
