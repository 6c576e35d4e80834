use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Global (x, y) canvas coordinate.
pub type PixelKey = (i64, i64);

pub const DEFAULT_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Pixels this process submitted recently.
///
/// A soft de-duplication hint for the diff: entries expire after `ttl`, the
/// oldest are evicted past `capacity`, and the owner clears it on completion.
#[derive(Debug)]
pub struct PlacedLedger {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<PixelKey, Instant>,
    order: VecDeque<(PixelKey, Instant)>,
}

impl Default for PlacedLedger {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl PlacedLedger {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn record(&mut self, key: PixelKey, now: Instant) {
        self.purge(now);
        self.entries.insert(key, now);
        self.order.push_back((key, now));
        while self.order.len() > self.capacity {
            self.pop_oldest();
        }
    }

    pub fn contains(&self, key: PixelKey, now: Instant) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.ttl)
    }

    /// Drop expired entries.
    pub fn purge(&mut self, now: Instant) {
        while let Some((_, at)) = self.order.front() {
            if now.saturating_duration_since(*at) < self.ttl {
                break;
            }
            self.pop_oldest();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.order.len()
    }

    fn pop_oldest(&mut self) {
        if let Some((key, at)) = self.order.pop_front() {
            // Re-recorded keys keep their newer timestamp.
            if self.entries.get(&key) == Some(&at) {
                self.entries.remove(&key);
            }
        }
    }
}
