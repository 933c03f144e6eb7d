//! A wire-stable timestamp: whole seconds plus a nanosecond remainder.

use serde::{Deserialize, Serialize};

/// Seconds-since-epoch plus nanoseconds, matching the wire format's
/// `mtime { second, nanosecond }` pair (§6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub second: i64,
    /// Nanosecond remainder, always in `0..1_000_000_000`.
    pub nanosecond: u32,
}

impl Timestamp {
    /// Construct from a `(seconds, nanoseconds)` pair as produced by `stat`.
    #[must_use]
    pub const fn new(second: i64, nanosecond: u32) -> Self {
        Self { second, nanosecond }
    }

    /// The current wall-clock time, used only by tests/fixtures.
    #[must_use]
    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self { second: dur.as_secs() as i64, nanosecond: dur.subsec_nanos() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let a = Timestamp::new(10, 500);
        let b = Timestamp::new(10, 600);
        let c = Timestamp::new(11, 0);
        assert!(a < b);
        assert!(b < c);
    }
}
