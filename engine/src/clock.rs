//! Wall clock and id generation.
//!
//! Generated ids are a millisecond timestamp shifted left by three decimal
//! digits plus a random suffix. Two creations in the same millisecond land in
//! different slots, and the generator never issues an id at or below the last
//! one it handed out for the same collection.

use crate::Timestamp;

/// Random suffix range appended to the millisecond timestamp.
const SUFFIX_RANGE: i64 = 1000;

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Monotonic id generator for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdClock {
    last: i64,
}

impl IdClock {
    /// Create a generator that has issued nothing yet.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Last id issued or observed.
    pub fn last(&self) -> i64 {
        self.last
    }

    /// Issue the next id for the given wall-clock time.
    pub fn next(&mut self, now: Timestamp) -> i64 {
        let suffix = (rand::random::<u32>() as i64) % SUFFIX_RANGE;
        let candidate = now.saturating_mul(SUFFIX_RANGE).saturating_add(suffix);
        let id = candidate.max(self.last.saturating_add(1));
        self.last = id;
        id
    }

    /// Record an id that entered the collection from elsewhere (an import or
    /// an explicit caller-supplied id) so later ids stay above it.
    pub fn observe(&mut self, id: i64) {
        self.last = self.last.max(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let mut clock = IdClock::new();
        let mut previous = 0;
        for _ in 0..1000 {
            // Same millisecond every time.
            let id = clock.next(1_706_745_600_000);
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn ids_embed_the_timestamp() {
        let mut clock = IdClock::new();
        let id = clock.next(1_706_745_600_000);
        assert_eq!(id / SUFFIX_RANGE, 1_706_745_600_000);
    }

    #[test]
    fn ids_fit_in_a_json_safe_integer() {
        let mut clock = IdClock::new();
        let id = clock.next(now_millis());
        assert!(id < (1i64 << 53));
    }

    #[test]
    fn observe_raises_the_floor() {
        let mut clock = IdClock::new();
        clock.observe(i64::MAX / 2);
        let id = clock.next(1000);
        assert_eq!(id, i64::MAX / 2 + 1);
    }

    #[test]
    fn observe_never_lowers() {
        let mut clock = IdClock::new();
        let id = clock.next(5000);
        clock.observe(1);
        assert_eq!(clock.last(), id);
    }
}
