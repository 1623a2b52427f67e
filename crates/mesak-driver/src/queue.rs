//! Bounded blocking buffer, one per data category.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use mesak_frame::Category;

use crate::error::{DriverError, Result};

/// Default number of packets buffered per category.
pub const DEFAULT_BUFFER_LENGTH: usize = 32;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
    /// Bumped by every flush; producers waiting across a flush drop their item.
    generation: u64,
}

/// Fixed-capacity FIFO with blocking enqueue and dequeue.
///
/// Producers block while the buffer is full; nothing is ever overwritten.
/// [`CategoryQueue::close`] releases every blocked thread so a disconnect
/// cannot hang on a stalled consumer.
#[derive(Debug)]
pub struct CategoryQueue<T> {
    category: Category,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> CategoryQueue<T> {
    pub fn new(category: Category, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DriverError::InvalidCapacity(capacity));
        }
        Ok(Self {
            category,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                generation: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Change the capacity. Only allowed while the buffer is empty.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(DriverError::InvalidCapacity(capacity));
        }
        let mut state = self.lock();
        if !state.items.is_empty() {
            return Err(DriverError::QueueBusy(self.category));
        }
        state.capacity = capacity;
        state.items = VecDeque::with_capacity(capacity);
        drop(state);
        self.not_full.notify_all();
        Ok(())
    }

    /// Snapshot of the number of buffered items.
    pub fn occupied_count(&self) -> usize {
        self.lock().items.len()
    }

    /// Append `item`, blocking while the buffer is full.
    ///
    /// Fails with [`DriverError::QueueClosed`] if the buffer is closed, or
    /// flushed while this call was waiting; the item is dropped.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        let generation = state.generation;
        loop {
            if state.closed || state.generation != generation {
                return Err(DriverError::QueueClosed(self.category));
            }
            if state.items.len() < state.capacity {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove the oldest item, blocking while the buffer is empty.
    ///
    /// Items buffered before a close are still returned; an empty closed
    /// buffer fails with [`DriverError::QueueClosed`].
    pub fn dequeue(&self) -> Result<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(DriverError::QueueClosed(self.category));
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`CategoryQueue::dequeue`] but gives up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(DriverError::QueueClosed(self.category));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout(timeout));
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Remove the oldest item without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Discard everything buffered. Capacity is unchanged.
    ///
    /// Producers blocked on a full buffer when the flush happens give up
    /// their item, so the buffer is observably empty afterwards.
    pub fn flush(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.items.len();
        state.items.clear();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.not_full.notify_all();
        if discarded > 0 {
            tracing::debug!(category = %self.category, discarded, "buffer flushed");
        }
        discarded
    }

    /// Reject new items and release every blocked thread.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Accept items again after [`CategoryQueue::close`].
    pub fn open(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn queue(capacity: usize) -> Arc<CategoryQueue<u32>> {
        Arc::new(CategoryQueue::new(Category::Track, capacity).unwrap())
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn fifo_order_at_capacity() {
        let q = queue(4);
        for i in 0..4 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.occupied_count(), 4);
        let out: Vec<u32> = (0..4).map(|_| q.dequeue().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(q.occupied_count(), 0);
    }

    #[test]
    fn occupancy_stays_within_capacity_under_contention() {
        let q = queue(3);
        let max_seen = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = q.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        q.enqueue(p * 100 + i).unwrap();
                        max_seen.fetch_max(q.occupied_count(), Ordering::Relaxed);
                    }
                })
            })
            .collect();

        let consumer = {
            let q = q.clone();
            thread::spawn(move || (0..200).map(|_| q.dequeue().unwrap()).collect::<Vec<_>>())
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let mut received = consumer.join().unwrap();
        assert!(max_seen.load(Ordering::Relaxed) <= 3);
        assert_eq!(q.occupied_count(), 0);

        // Per-producer order is preserved.
        for p in 0..4 {
            let mine: Vec<u32> = received.iter().copied().filter(|v| v / 100 == p).collect();
            assert_eq!(mine, (0..50).map(|i| p * 100 + i).collect::<Vec<_>>());
        }
        received.sort_unstable();
        received.dedup();
        assert_eq!(received.len(), 200);
    }

    #[test]
    fn capacity_change_requires_empty_buffer() {
        let q = queue(2);
        q.enqueue(1).unwrap();
        assert!(matches!(
            q.set_capacity(8),
            Err(DriverError::QueueBusy(Category::Track))
        ));
        assert!(matches!(
            q.set_capacity(0),
            Err(DriverError::InvalidCapacity(0))
        ));

        q.dequeue().unwrap();
        q.set_capacity(8).unwrap();
        assert_eq!(q.capacity(), 8);
    }

    #[test]
    fn flush_releases_blocked_producers_and_empties() {
        let q = queue(1);
        q.enqueue(1).unwrap();

        let blocked = {
            let q = q.clone();
            thread::spawn(move || q.enqueue(2))
        };
        thread::sleep(Duration::from_millis(30));

        assert_eq!(q.flush(), 1);
        assert_eq!(q.occupied_count(), 0);
        assert!(matches!(
            blocked.join().unwrap(),
            Err(DriverError::QueueClosed(_))
        ));
        assert_eq!(q.occupied_count(), 0);
        assert_eq!(q.capacity(), 1);

        q.enqueue(3).unwrap();
        assert_eq!(q.dequeue().unwrap(), 3);
    }

    #[test]
    fn close_releases_blocked_consumer() {
        let q = queue(2);
        let waiting = {
            let q = q.clone();
            thread::spawn(move || q.dequeue())
        };
        thread::sleep(Duration::from_millis(30));
        q.close();
        assert!(matches!(
            waiting.join().unwrap(),
            Err(DriverError::QueueClosed(_))
        ));
        assert!(q.enqueue(1).is_err());

        q.open();
        q.enqueue(1).unwrap();
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn closed_buffer_still_drains() {
        let q = queue(2);
        q.enqueue(7).unwrap();
        q.close();
        assert_eq!(q.dequeue().unwrap(), 7);
        assert!(q.dequeue().is_err());
    }

    #[test]
    fn dequeue_timeout_expires_then_succeeds() {
        let q = queue(2);
        assert!(matches!(
            q.dequeue_timeout(Duration::from_millis(20)),
            Err(DriverError::Timeout(_))
        ));

        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.enqueue(5).unwrap();
            })
        };
        assert_eq!(q.dequeue_timeout(Duration::from_secs(5)).unwrap(), 5);
        producer.join().unwrap();
    }

    #[test]
    fn blocked_producer_resumes_after_dequeue() {
        let q = queue(1);
        q.enqueue(1).unwrap();
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.enqueue(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.dequeue().unwrap(), 1);
        producer.join().unwrap().unwrap();
        wait_until(|| q.occupied_count() == 1);
        assert_eq!(q.dequeue().unwrap(), 2);
    }
}
