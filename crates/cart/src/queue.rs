//! Per-key FIFO serialization.
//!
//! Operations sharing a key run strictly one after another, in the order
//! their tickets were taken; operations on different keys run independently.
//! Tickets are numbered synchronously by [`KeyedQueue::enqueue`], so issue
//! order (not first-poll order) decides the queue position.
//!
//! Each key keeps a "now serving" counter published through a `watch`
//! channel. Dropping a guard advances the counter; dropping a ticket that is
//! still waiting marks its number as abandoned so the counter skips it. A
//! key's entry is removed as soon as no tickets are outstanding.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

/// A lazily-populated set of FIFO queues, one per key.
#[derive(Debug)]
pub struct KeyedQueue<K> {
    inner: Arc<Mutex<HashMap<K, KeyState>>>,
}

#[derive(Debug)]
struct KeyState {
    /// Number handed to the next ticket.
    next: u64,
    /// Number of the ticket whose turn it is.
    serving: u64,
    /// Tickets dropped before their turn came.
    abandoned: BTreeSet<u64>,
    turn: watch::Sender<u64>,
}

impl KeyState {
    fn new() -> Self {
        let (turn, _) = watch::channel(0);
        Self {
            next: 0,
            serving: 0,
            abandoned: BTreeSet::new(),
            turn,
        }
    }

    fn advance(&mut self) {
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
        self.turn.send_replace(self.serving);
    }

    const fn is_idle(&self) -> bool {
        self.serving >= self.next
    }
}

impl<K> Clone for KeyedQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedQueue<K> {
    /// Create an empty set of queues.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take a place at the back of `key`'s queue.
    ///
    /// The position is fixed when this returns; await [`Ticket::ready`] to
    /// wait for every earlier ticket on the same key to finish.
    #[must_use]
    pub fn enqueue(&self, key: K) -> Ticket<K> {
        let mut keys = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = keys.entry(key.clone()).or_insert_with(KeyState::new);

        let number = state.next;
        state.next += 1;

        Ticket {
            queue: self.clone(),
            key,
            number,
            turn: state.turn.subscribe(),
        }
    }

    /// Number of keys with at least one outstanding ticket.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether `key` has an outstanding ticket.
    #[must_use]
    pub fn is_busy(&self, key: &K) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn finish(&self, key: &K, number: u64) {
        let mut keys = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = keys.get_mut(key) else {
            return;
        };

        if state.serving == number {
            state.advance();
        } else {
            state.abandoned.insert(number);
        }

        if state.is_idle() {
            keys.remove(key);
        }
    }
}

/// A reserved position in a key's queue.
///
/// Dropping a ticket without awaiting it gives up the position; later
/// tickets skip over it.
#[derive(Debug)]
pub struct Ticket<K: Eq + Hash + Clone> {
    queue: KeyedQueue<K>,
    key: K,
    number: u64,
    turn: watch::Receiver<u64>,
}

impl<K: Eq + Hash + Clone> Ticket<K> {
    /// Key this ticket is queued on.
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Wait until every earlier ticket on this key has finished.
    pub async fn ready(mut self) -> QueueGuard<K> {
        let number = self.number;
        // The sender lives in the key's entry, which outlives every
        // outstanding ticket, so this only returns once it is our turn.
        let _ = self.turn.wait_for(|serving| *serving >= number).await;

        QueueGuard { ticket: self }
    }
}

impl<K: Eq + Hash + Clone> Drop for Ticket<K> {
    fn drop(&mut self) {
        self.queue.finish(&self.key, self.number);
    }
}

/// Exclusive turn for a key; the next ticket runs once this is dropped.
#[derive(Debug)]
pub struct QueueGuard<K: Eq + Hash + Clone> {
    ticket: Ticket<K>,
}

impl<K: Eq + Hash + Clone> QueueGuard<K> {
    /// Key this guard holds.
    #[must_use]
    pub const fn key(&self) -> &K {
        self.ticket.key()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_runs_in_issue_order() {
        let queue = KeyedQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Tickets are taken before any task is polled.
        let mut handles = Vec::new();
        for i in 0..5u64 {
            let ticket = queue.enqueue("milk");
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let _guard = ticket.ready().await;
                // Later tickets sleep less; order must still hold.
                tokio::time::sleep(Duration::from_millis(10 - i * 2)).await;
                log.lock().unwrap().push(i);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let queue = KeyedQueue::new();

        let milk = queue.enqueue("milk").ready().await;
        let bread = tokio::time::timeout(Duration::from_millis(100), queue.enqueue("bread").ready())
            .await
            .unwrap();

        assert!(queue.is_busy(&"milk"));
        assert!(queue.is_busy(&"bread"));
        drop(milk);
        drop(bread);
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_keeps_exclusion() {
        let queue = KeyedQueue::new();

        let first = queue.enqueue("eggs").ready().await;

        // A waiter that gives up must not let anyone past the current holder.
        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.enqueue("eggs").ready()).await;
        assert!(blocked.is_err());

        let third = queue.enqueue("eggs");
        let still_blocked =
            tokio::time::timeout(Duration::from_millis(20), queue.enqueue("eggs").ready()).await;
        assert!(still_blocked.is_err());

        drop(first);
        let guard = tokio::time::timeout(Duration::from_millis(100), third.ready())
            .await
            .unwrap();
        assert_eq!(guard.key(), &"eggs");
        drop(guard);
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_dropped_ticket_releases_successor() {
        let queue = KeyedQueue::new();

        let abandoned = queue.enqueue("rice");
        let next = queue.enqueue("rice");
        drop(abandoned);

        tokio::time::timeout(Duration::from_millis(100), next.ready())
            .await
            .unwrap();
    }

    #[test]
    fn test_entry_kept_while_successor_queued() {
        let queue = KeyedQueue::new();

        let first = queue.enqueue(1);
        let second = queue.enqueue(1);
        drop(first);
        assert!(queue.is_busy(&1));
        drop(second);
        assert!(!queue.is_busy(&1));
    }

    #[test]
    fn test_out_of_order_drops_clean_up() {
        let queue = KeyedQueue::new();

        let first = queue.enqueue(7);
        let second = queue.enqueue(7);
        let third = queue.enqueue(7);
        drop(third);
        drop(second);
        assert!(queue.is_busy(&7));
        drop(first);
        assert_eq!(queue.active_keys(), 0);
    }
}
