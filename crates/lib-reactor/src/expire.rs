use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Instant;

/// An ordered multiset of keys with monotonic deadlines.
///
/// Every caching subsystem (DHCP leases, DNS entries, Wi-Fi handshakes)
/// keeps one of these next to its lookup table. An object without a
/// deadline is simply not enqueued; removing an object removes exactly one
/// queue slot. Updates are O(log n).
pub struct ExpireQueue<K> {
    queue: BTreeMap<(Instant, u64), K>,
    index: HashMap<K, (Instant, u64)>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> ExpireQueue<K> {
    pub fn new() -> Self {
        ExpireQueue {
            queue: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Insert the key or move its deadline.
    pub fn update(&mut self, key: K, deadline: Instant) {
        if let Some(slot) = self.index.remove(&key) {
            self.queue.remove(&slot);
        }
        let slot = (deadline, self.next_seq);
        self.next_seq += 1;
        self.queue.insert(slot, key.clone());
        self.index.insert(key, slot);
    }

    /// Remove the key's queue slot, if it has one.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.index.get(key).map(|(deadline, _)| *deadline)
    }

    /// Earliest deadline; feeds the event-loop poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop one key whose deadline has passed. Call in a loop to drain.
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        let (&slot, _) = self.queue.iter().next()?;
        if slot.0 > now {
            return None;
        }
        let key = self.queue.remove(&slot).expect("slot just observed");
        self.index.remove(&key);
        Some(key)
    }

    /// Entries in expiration order.
    pub fn iter(&self) -> impl Iterator<Item = (Instant, &K)> {
        self.queue.iter().map(|((deadline, _), key)| (*deadline, key))
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }
}

impl<K: Clone + Eq + Hash> Default for ExpireQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
