//! Core data model for the validation service: key counter records, client
//! records, the sync outbox, and the transient OTP parameter bag.
//!
//! Types here are intentionally plain structs rather than untyped maps: the
//! REQUIRED field set of a sync message is enforced by the type checker, not
//! by a runtime presence check (see [`OtpParams`]).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sentinel value for counters and `modified` before a key has ever been seen.
pub const NEVER: i64 = -1;

/// A per-key persistent counter record (§3 Key Counter Record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub active: bool,
    pub public_name: String,
    pub yk_counter: i64,
    pub yk_use: i64,
    pub yk_high: i64,
    pub yk_low: i64,
    pub nonce: String,
    pub modified: i64,
    pub created: i64,
}

impl KeyRecord {
    /// Autovivified record for a `public_name` never seen before (I2).
    pub fn sentinel(public_name: impl Into<String>, created: i64) -> Self {
        KeyRecord {
            active: true,
            public_name: public_name.into(),
            yk_counter: NEVER,
            yk_use: NEVER,
            yk_high: NEVER,
            yk_low: NEVER,
            nonce: "0000000000000000".to_string(),
            modified: NEVER,
            created,
        }
    }

    pub fn counters(&self) -> Counters {
        Counters {
            yk_counter: self.yk_counter,
            yk_use: self.yk_use,
        }
    }
}

/// A client account allowed to call `/wsapi/2.0/verify` (§3 Client Record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: i64,
    pub secret: String,
    pub active: bool,
}

/// The `(yk_counter, yk_use)` pair used for the lexicographic comparison of §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub yk_counter: i64,
    pub yk_use: i64,
}

impl Counters {
    pub fn eq(a: Counters, b: Counters) -> bool {
        a.yk_counter == b.yk_counter && a.yk_use == b.yk_use
    }

    pub fn gt(a: Counters, b: Counters) -> bool {
        a.yk_counter > b.yk_counter || (a.yk_counter == b.yk_counter && a.yk_use > b.yk_use)
    }

    pub fn gte(a: Counters, b: Counters) -> bool {
        Counters::gt(a, b) || Counters::eq(a, b)
    }
}

impl PartialOrd for Counters {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.yk_counter
                .cmp(&other.yk_counter)
                .then(self.yk_use.cmp(&other.yk_use)),
        )
    }
}

impl Ord for Counters {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).expect("total order")
    }
}

/// The transient OTP parameter bag (§3 OTP Parameters). REQUIRED for any sync
/// message: all fields are mandatory by construction, not by a runtime check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpParams {
    pub modified: i64,
    pub otp: String,
    pub nonce: String,
    pub public_name: String,
    pub yk_counter: i64,
    pub yk_use: i64,
    pub yk_high: i64,
    pub yk_low: i64,
}

impl OtpParams {
    pub fn counters(&self) -> Counters {
        Counters {
            yk_counter: self.yk_counter,
            yk_use: self.yk_use,
        }
    }
}

/// An outbox row awaiting a sibling's confirmation (§3 Queue Entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub server_url: String,
    pub modified: i64,
    pub server_nonce: String,
    pub otp: String,
    pub info: String,
    /// Unix time the row was queued; `None` means "due for redrive".
    pub queued: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(counter: i64, use_: i64) -> Counters {
        Counters {
            yk_counter: counter,
            yk_use: use_,
        }
    }

    #[test]
    fn eq_requires_both_components() {
        assert!(Counters::eq(c(1, 2), c(1, 2)));
        assert!(!Counters::eq(c(1, 2), c(1, 3)));
        assert!(!Counters::eq(c(1, 2), c(2, 2)));
    }

    #[test]
    fn gt_counter_dominates_use() {
        assert!(Counters::gt(c(2, 0), c(1, 99)));
        assert!(!Counters::gt(c(1, 0), c(2, 0)));
        assert!(Counters::gt(c(1, 5), c(1, 4)));
        assert!(!Counters::gt(c(1, 4), c(1, 4)));
    }

    #[test]
    fn gte_includes_equal() {
        assert!(Counters::gte(c(1, 4), c(1, 4)));
        assert!(Counters::gte(c(1, 5), c(1, 4)));
        assert!(!Counters::gte(c(1, 3), c(1, 4)));
    }

    #[test]
    fn sentinel_has_never_counters() {
        let rec = KeyRecord::sentinel("ccccccbchvth", 1000);
        assert_eq!(rec.yk_counter, NEVER);
        assert_eq!(rec.yk_use, NEVER);
        assert_eq!(rec.modified, NEVER);
        assert!(rec.active);
    }
}
