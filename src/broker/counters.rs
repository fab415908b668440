//! Subscription reference counting.
//!
//! # Responsibilities
//! - Count subscribers per topic
//! - Report the 0 → 1 (first subscriber) and 1 → 0 (last subscriber) edges
//!
//! # Design Decisions
//! - One mutex over the whole map: entries are created and removed inside
//!   the same operation that changes their count
//! - Zero-count entries are never stored
//! - Snapshots are value copies; nothing hands out references into the map

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::broker::message::Ssid;

/// A single subscription counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub ssid: Ssid,
    pub channel: String,
    pub count: usize,
}

/// Subscription counting map.
#[derive(Debug, Default)]
pub struct Counters {
    entries: Mutex<HashMap<Ssid, Counter>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more subscriber. Returns `true` if this is the first one.
    pub fn increment(&self, ssid: &Ssid, channel: &str) -> bool {
        let mut entries = self.lock();
        let counter = entries.entry(ssid.clone()).or_insert_with(|| Counter {
            ssid: ssid.clone(),
            channel: channel.to_string(),
            count: 0,
        });
        counter.count += 1;
        counter.count == 1
    }

    /// Count one subscriber less. Returns `true` if that was the last one.
    ///
    /// Decrementing a topic nobody subscribed to is a no-op.
    pub fn decrement(&self, ssid: &Ssid) -> bool {
        let mut entries = self.lock();
        let Some(counter) = entries.get_mut(ssid) else {
            return false;
        };

        counter.count = counter.count.saturating_sub(1);
        if counter.count == 0 {
            entries.remove(ssid);
            return true;
        }
        false
    }

    /// Copy of a single counter.
    pub fn get(&self, ssid: &Ssid) -> Option<Counter> {
        self.lock().get(ssid).cloned()
    }

    /// Point-in-time copy of every counter.
    pub fn all(&self) -> Vec<Counter> {
        self.lock().values().cloned().collect()
    }

    /// Number of topics with at least one subscriber.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave a counter half-updated,
    // so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Ssid, Counter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn topic(name: &str) -> Ssid {
        Ssid::from_topic(name)
    }

    #[test]
    fn first_and_last_edges_fire_once() {
        let counters = Counters::new();
        let t = topic("a/b");
        let n = 5;

        let firsts: Vec<bool> = (0..n).map(|_| counters.increment(&t, "chan")).collect();
        assert_eq!(firsts, vec![true, false, false, false, false]);
        assert_eq!(counters.get(&t).map(|c| c.count), Some(n));

        let lasts: Vec<bool> = (0..n).map(|_| counters.decrement(&t)).collect();
        assert_eq!(lasts, vec![false, false, false, false, true]);
        assert!(counters.is_empty());
    }

    #[test]
    fn decrement_unknown_topic_is_noop() {
        let counters = Counters::new();
        counters.increment(&topic("kept"), "kept");

        assert!(!counters.decrement(&topic("missing")));
        assert_eq!(counters.len(), 1);
        assert_eq!(counters.get(&topic("kept")).map(|c| c.count), Some(1));
    }

    #[test]
    fn resubscribe_after_last_is_first_again() {
        let counters = Counters::new();
        let t = topic("x");
        assert!(counters.increment(&t, "x"));
        assert!(counters.decrement(&t));
        assert!(!counters.decrement(&t));
        assert!(counters.increment(&t, "x"));
    }

    #[test]
    fn all_returns_copies() {
        let counters = Counters::new();
        counters.increment(&topic("a"), "a");
        counters.increment(&topic("b"), "b");
        counters.increment(&topic("b"), "b");

        let mut snapshot = counters.all();
        snapshot.sort_by(|x, y| x.channel.cmp(&y.channel));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].count, 2);

        counters.decrement(&topic("b"));
        assert_eq!(snapshot[1].count, 2);
    }

    #[test]
    fn concurrent_edges_balance() {
        let counters = Arc::new(Counters::new());
        let t = topic("hot");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                let t = t.clone();
                std::thread::spawn(move || {
                    let mut firsts = 0;
                    let mut lasts = 0;
                    for _ in 0..1000 {
                        if counters.increment(&t, "hot") {
                            firsts += 1;
                        }
                        if counters.decrement(&t) {
                            lasts += 1;
                        }
                    }
                    (firsts, lasts)
                })
            })
            .collect();

        let (firsts, lasts) = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .fold((0, 0), |acc, (f, l)| (acc.0 + f, acc.1 + l));

        assert_eq!(firsts, lasts);
        assert!(counters.is_empty());
    }
}
