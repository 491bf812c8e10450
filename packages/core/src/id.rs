//! Service identifiers.
//!
//! A [`ServiceId`] is a 32-bit value with two parts:
//!
//! ```text
//!  31      24 23                      0
//! +----------+------------------------+
//! |  slot    |        sequence        |
//! +----------+------------------------+
//! ```
//!
//! - `slot` is the owning worker's index plus one (so `0` never names a worker)
//! - `sequence` is a per-worker counter in `1..=MAX_SEQUENCE`
//!
//! The all-zero value is [`ServiceId::NONE`], the "no service" sentinel. It is
//! never produced by [`ServiceId::new`].

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a live service, unique among live services of one router.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ServiceId(pub u32);

impl ServiceId {
    /// Sentinel meaning "no service". Returned by failed creations and by
    /// lookups of unbound names.
    pub const NONE: ServiceId = ServiceId(0);

    /// Bit offset of the worker slot.
    pub const WORKER_SHIFT: u32 = 24;

    /// Largest per-worker sequence number.
    pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

    /// Largest worker pool a router can address.
    pub const MAX_WORKERS: usize = 255;

    /// Builds an id from a zero-based worker index and a sequence number.
    ///
    /// Returns `None` when the worker index does not fit the slot or the
    /// sequence is outside `1..=MAX_SEQUENCE`.
    #[must_use]
    pub fn new(worker_index: usize, sequence: u32) -> Option<Self> {
        if worker_index >= Self::MAX_WORKERS || sequence == 0 || sequence > Self::MAX_SEQUENCE {
            return None;
        }
        let slot = u32::try_from(worker_index + 1).ok()?;
        Some(Self((slot << Self::WORKER_SHIFT) | sequence))
    }

    /// Returns `true` for the [`ServiceId::NONE`] sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Zero-based index of the worker that owns this id, if the id carries one.
    #[must_use]
    pub fn worker_index(self) -> Option<usize> {
        let slot = self.0 >> Self::WORKER_SHIFT;
        if slot == 0 {
            None
        } else {
            usize::try_from(slot - 1).ok()
        }
    }

    /// The per-worker sequence part of the id.
    #[must_use]
    pub const fn sequence(self) -> u32 {
        self.0 & Self::MAX_SEQUENCE
    }
}

impl From<u32> for ServiceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<ServiceId> for u32 {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a string is not a decimal service id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseServiceIdError(ParseIntError);

impl fmt::Display for ParseServiceIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid service id: {}", self.0)
    }
}

impl std::error::Error for ParseServiceIdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl FromStr for ServiceId {
    type Err = ParseServiceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(Self).map_err(ParseServiceIdError)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn none_is_zero_and_default() {
        assert_eq!(ServiceId::NONE, ServiceId(0));
        assert_eq!(ServiceId::default(), ServiceId::NONE);
        assert!(ServiceId::NONE.is_none());
        assert_eq!(ServiceId::NONE.worker_index(), None);
    }

    #[test]
    fn new_encodes_worker_slot_in_high_byte() {
        let id = ServiceId::new(0, 1).unwrap();
        assert_eq!(id, ServiceId(0x0100_0001));
        assert_eq!(id.worker_index(), Some(0));
        assert_eq!(id.sequence(), 1);

        let id = ServiceId::new(254, ServiceId::MAX_SEQUENCE).unwrap();
        assert_eq!(id, ServiceId(0xFFFF_FFFF));
        assert_eq!(id.worker_index(), Some(254));
    }

    #[test]
    fn new_rejects_out_of_range_parts() {
        assert!(ServiceId::new(255, 1).is_none());
        assert!(ServiceId::new(0, 0).is_none());
        assert!(ServiceId::new(0, ServiceId::MAX_SEQUENCE + 1).is_none());
    }

    #[test]
    fn ids_without_slot_have_no_worker() {
        assert_eq!(ServiceId(42).worker_index(), None);
    }

    #[test]
    fn parse_and_display() {
        let id: ServiceId = "16777217".parse().unwrap();
        assert_eq!(id, ServiceId(0x0100_0001));
        assert_eq!(id.to_string(), "16777217");
        assert!("echo".parse::<ServiceId>().is_err());
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&ServiceId(7)).unwrap();
        assert_eq!(json, "7");
    }

    proptest! {
        #[test]
        fn composed_ids_are_never_none(worker in 0usize..255, seq in 1u32..=ServiceId::MAX_SEQUENCE) {
            let id = ServiceId::new(worker, seq).unwrap();
            prop_assert!(!id.is_none());
            prop_assert_eq!(id.worker_index(), Some(worker));
            prop_assert_eq!(id.sequence(), seq);
        }
    }
}
