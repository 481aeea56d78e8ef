//! Monotonically sortable push ids.
//!
//! Generated ids are `{millis:012x}-{seq:06x}-{rand:8 hex}`: a fixed-width
//! hex timestamp, a per-millisecond sequence number, and a random suffix.
//! Because every field is fixed width, lexicographic order equals
//! generation order. This is the contract message ordering relies on, so
//! it lives here as an explicit type rather than an accident of a backing
//! database's key format.

use std::sync::Mutex;

use rand::Rng;

/// Generates push ids that sort in generation order.
#[derive(Debug)]
pub struct PushIdGenerator {
    // (last timestamp used, sequence within that timestamp)
    last: Mutex<(i64, u32)>,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new((0, 0)),
        }
    }

    /// Generate the next id for the given server clock reading.
    ///
    /// A clock that stands still or runs backwards never breaks ordering:
    /// the generator reuses the last timestamp and bumps the sequence.
    pub fn next(&self, now_millis: i64) -> String {
        let (millis, seq) = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if now_millis > last.0 {
                *last = (now_millis, 0);
            } else {
                last.1 += 1;
            }
            *last
        };

        let suffix: [u8; 4] = rand::thread_rng().gen();
        format!("{:012x}-{:06x}-{}", millis, seq, hex::encode(suffix))
    }
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_sort_in_generation_order() {
        let gen = PushIdGenerator::new();
        let mut ids = Vec::new();
        // Same millisecond, advancing millisecond, and a backwards clock.
        for now in [100, 100, 100, 101, 99, 250] {
            ids.push(gen.next(now));
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_ids_are_unique() {
        let gen = PushIdGenerator::new();
        let a = gen.next(5);
        let b = gen.next(5);
        assert_ne!(a, b);
    }
}
