// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Blocking queue partitioned into fixed-capacity priority buckets.
//!
//! Every bucket is a FIFO with a capacity fixed at construction. Dequeuing
//! always serves the oldest item of the highest-priority non-empty bucket.
//! All state lives behind one mutex with two condition variables
//! (`not_empty`, `not_full`), so priority order is computed across every
//! bucket atomically on each take.
//!
//! Besides the plain queue operations, [`PriorityBoundedQueue::take_when`]
//! lets a consumer inspect all buckets under the lock and extract an arbitrary
//! group of items, or ask to sleep until a deadline. The scheduler builds its
//! batching on top of it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use thiserror::Error;

use crate::protocols::Priority;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("capacity of the {0} priority bucket must be greater than zero")]
    ZeroCapacity(Priority),
}

/// Rejected insertion. The item is handed back to the caller.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum OfferError<T> {
    #[error("priority bucket is full")]
    Full(T),
    #[error("queue is closed")]
    Closed(T),
}

impl<T> OfferError<T> {
    pub fn into_inner(self) -> T {
        match self {
            OfferError::Full(item) | OfferError::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, OfferError::Full(_))
    }
}

/// Point-in-time counters for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub capacity: usize,
    pub len: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    pub rejected: u64,
    /// Highest `len` ever observed.
    pub peak: usize,
}

/// Outcome of one [`PriorityBoundedQueue::take_when`] evaluation.
#[derive(Debug)]
pub enum Step<R> {
    /// Stop waiting and return the value.
    Ready(R),
    /// Re-evaluate once something is enqueued or the deadline passes.
    WaitUntil(Instant),
    /// Re-evaluate once something is enqueued.
    Wait,
}

struct Bucket<T> {
    items: VecDeque<T>,
    capacity: usize,
    stats: BucketStats,
}

impl<T> Bucket<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            stats: BucketStats {
                capacity,
                ..Default::default()
            },
        }
    }

    fn free(&self) -> usize {
        self.capacity - self.items.len()
    }

    fn push(&mut self, item: T) {
        self.items.push_back(item);
        self.stats.enqueued += 1;
        self.stats.peak = self.stats.peak.max(self.items.len());
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.stats.dequeued += 1;
        Some(item)
    }

    /// Removes every item matching `pred`, keeping the FIFO order of the rest.
    fn extract_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        if self.items.is_empty() {
            return Vec::new();
        }
        let mut kept = VecDeque::with_capacity(self.capacity);
        let mut removed = Vec::new();
        for item in self.items.drain(..) {
            if pred(&item) {
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        self.stats.dequeued += removed.len() as u64;
        removed
    }
}

struct State<T> {
    buckets: Vec<Bucket<T>>,
    len: usize,
    closed: bool,
}

impl<T> State<T> {
    fn bucket(&mut self, priority: Priority) -> &mut Bucket<T> {
        &mut self.buckets[priority.index()]
    }

    fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        for bucket in self.buckets.iter_mut() {
            bucket.stats.dequeued += bucket.items.len() as u64;
            items.extend(bucket.items.drain(..));
        }
        self.len = 0;
        items
    }

    fn pop_highest(&mut self) -> Option<T> {
        let item = self.buckets.iter_mut().find_map(|b| b.pop())?;
        self.len -= 1;
        Some(item)
    }
}

/// Read/extract access to every bucket while the queue lock is held.
pub struct BucketView<'a, T> {
    state: &'a mut State<T>,
    removed: usize,
}

impl<T> BucketView<'_, T> {
    /// Items of one bucket, oldest first.
    pub fn iter(&self, priority: Priority) -> impl Iterator<Item = &T> {
        self.state.buckets[priority.index()].items.iter()
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.state.buckets[priority.index()].items.len()
    }

    pub fn total(&self) -> usize {
        self.state.len
    }

    pub fn is_empty(&self) -> bool {
        self.state.len == 0
    }

    /// Removes the oldest item of the highest-priority non-empty bucket.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.state.pop_highest()?;
        self.removed += 1;
        Some(item)
    }

    /// Removes the items at `positions` (ascending) from one bucket and
    /// returns them in queue order.
    pub fn extract(&mut self, priority: Priority, positions: &[usize]) -> Vec<T> {
        let mut cursor = 0;
        let mut index = 0;
        let removed = self.state.bucket(priority).extract_where(|_| {
            let hit = positions.get(cursor) == Some(&index);
            if hit {
                cursor += 1;
            }
            index += 1;
            hit
        });
        self.account(removed.len());
        removed
    }

    /// Removes every item matching `pred` from every bucket, highest priority first.
    pub fn extract_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        for bucket in self.state.buckets.iter_mut() {
            removed.extend(bucket.extract_where(&mut pred));
        }
        self.account(removed.len());
        removed
    }

    fn account(&mut self, count: usize) {
        self.state.len -= count;
        self.removed += count;
    }
}

/// A blocking queue with one bounded FIFO bucket per [`Priority`].
pub struct PriorityBoundedQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> PriorityBoundedQueue<T> {
    /// Creates a queue with the given capacity per priority, highest first.
    pub fn new(capacities: [usize; Priority::COUNT]) -> Result<Self, QueueError> {
        for priority in Priority::ALL {
            if capacities[priority.index()] == 0 {
                return Err(QueueError::ZeroCapacity(priority));
            }
        }

        Ok(Self {
            state: Mutex::new(State {
                buckets: capacities.into_iter().map(Bucket::new).collect(),
                len: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// Inserts without blocking. A full bucket is the backpressure signal.
    pub fn offer(&self, item: T, priority: Priority) -> Result<(), OfferError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(OfferError::Closed(item));
        }
        let bucket = state.bucket(priority);
        if bucket.free() == 0 {
            bucket.stats.rejected += 1;
            return Err(OfferError::Full(item));
        }
        bucket.push(item);
        state.len += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Inserts all items or none of them.
    pub fn offer_all(&self, items: Vec<T>, priority: Priority) -> Result<(), OfferError<Vec<T>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(OfferError::Closed(items));
        }
        let count = items.len();
        let bucket = state.bucket(priority);
        if bucket.free() < count {
            bucket.stats.rejected += count as u64;
            return Err(OfferError::Full(items));
        }
        for item in items {
            bucket.push(item);
        }
        state.len += count;
        if count > 1 {
            self.not_empty.notify_all();
        } else if count == 1 {
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Inserts, blocking while the bucket is full.
    ///
    /// Fails only if the queue is closed before space frees up.
    pub fn put(&self, item: T, priority: Priority) -> Result<(), OfferError<T>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(OfferError::Closed(item));
            }
            if state.bucket(priority).free() > 0 {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.bucket(priority).push(item);
        state.len += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Inserts, blocking at most `timeout` for space in the bucket.
    pub fn offer_timeout(
        &self,
        item: T,
        priority: Priority,
        timeout: Duration,
    ) -> Result<(), OfferError<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(OfferError::Closed(item));
            }
            if state.bucket(priority).free() > 0 {
                break;
            }
            if self.not_full.wait_until(&mut state, deadline).timed_out()
                && state.bucket(priority).free() == 0
            {
                state.bucket(priority).stats.rejected += 1;
                return Err(OfferError::Full(item));
            }
        }
        state.bucket(priority).push(item);
        state.len += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item of the highest-priority non-empty bucket,
    /// blocking until one is available. Returns `None` once the queue is closed
    /// and drained.
    pub fn take(&self) -> Option<T> {
        self.take_when(|view| match view.pop() {
            Some(item) => Step::Ready(item),
            None => Step::Wait,
        })
    }

    /// Like [`take`](Self::take), giving up after `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.pop_highest() {
                self.after_removal(&state, 1);
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() && state.len == 0 {
                return None;
            }
        }
    }

    /// Evaluates `step` under the queue lock until it yields [`Step::Ready`].
    ///
    /// Between evaluations the caller sleeps on `not_empty`, optionally bounded
    /// by a deadline. Items extracted through the view count as dequeued and
    /// wake blocked producers. Once the queue is closed, `step` keeps being
    /// offered the remaining items, and `None` is returned as soon as it asks to
    /// wait, since nothing new can arrive.
    pub fn take_when<R>(&self, mut step: impl FnMut(&mut BucketView<'_, T>) -> Step<R>) -> Option<R> {
        let mut state = self.state.lock();
        loop {
            if state.closed && state.len == 0 {
                return None;
            }
            let mut view = BucketView {
                state: &mut *state,
                removed: 0,
            };
            let next = step(&mut view);
            let removed = view.removed;
            self.after_removal(&state, removed);

            match next {
                Step::Ready(value) => return Some(value),
                _ if state.closed => return None,
                Step::WaitUntil(deadline) => {
                    self.not_empty.wait_until(&mut state, deadline);
                }
                Step::Wait => self.not_empty.wait(&mut state),
            }
        }
    }

    /// Removes every queued item matching `pred`, preserving the FIFO order of
    /// the remaining items.
    pub fn remove_where(&self, pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut state = self.state.lock();
        let mut view = BucketView {
            state: &mut *state,
            removed: 0,
        };
        let removed = view.extract_where(pred);
        self.after_removal(&state, removed.len());
        removed
    }

    pub fn contains(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.state
            .lock()
            .buckets
            .iter()
            .any(|b| b.items.iter().any(&mut pred))
    }

    /// Removes and returns everything, highest priority first.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let items = state.drain();
        self.after_removal(&state, items.len());
        items
    }

    /// Discards everything and returns how many items were dropped.
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    /// Rejects further insertions and wakes every blocked producer and consumer.
    ///
    /// Items still queued keep being handed to consumers until the queue is
    /// empty; after that consumers get `None`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Closes the queue and removes everything still in it, atomically, so no
    /// consumer receives an item after the call.
    pub fn close_and_drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.closed = true;
        let items = state.drain();
        self.not_empty.notify_all();
        self.not_full.notify_all();
        items
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.state.lock().buckets[priority.index()].items.len()
    }

    pub fn capacity_of(&self, priority: Priority) -> usize {
        self.state.lock().buckets[priority.index()].capacity
    }

    /// Free slots summed over all buckets.
    pub fn remaining_capacity(&self) -> usize {
        self.state.lock().buckets.iter().map(Bucket::free).sum()
    }

    pub fn stats(&self) -> Vec<(Priority, BucketStats)> {
        let state = self.state.lock();
        Priority::ALL
            .iter()
            .zip(state.buckets.iter())
            .map(|(priority, bucket)| {
                let mut stats = bucket.stats;
                stats.len = bucket.items.len();
                (*priority, stats)
            })
            .collect()
    }

    fn after_removal(&self, state: &State<T>, removed: usize) {
        if removed == 0 {
            return;
        }
        self.not_full.notify_all();
        // Pass the wake-up along while items remain for other consumers.
        if state.len > 0 {
            self.not_empty.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use rstest::rstest;

    fn queue(capacities: [usize; 3]) -> PriorityBoundedQueue<&'static str> {
        PriorityBoundedQueue::new(capacities).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = PriorityBoundedQueue::<u32>::new([1, 0, 1]);
        assert_eq!(result.err(), Some(QueueError::ZeroCapacity(Priority::Normal)));
    }

    #[test]
    fn test_strict_priority_order() {
        let q = queue([4, 4, 4]);
        q.offer("bg", Priority::Background).unwrap();
        q.offer("normal", Priority::Normal).unwrap();
        q.offer("high", Priority::High).unwrap();

        assert_eq!(q.take(), Some("high"));
        assert_eq!(q.take(), Some("normal"));
        assert_eq!(q.take(), Some("bg"));
    }

    #[rstest]
    #[case(Priority::High)]
    #[case(Priority::Normal)]
    #[case(Priority::Background)]
    fn test_fifo_within_bucket(#[case] priority: Priority) {
        let q = queue([3, 3, 3]);
        for item in ["A", "B", "C"] {
            q.offer(item, priority).unwrap();
        }
        assert_eq!(q.take(), Some("A"));
        assert_eq!(q.take(), Some("B"));
        assert_eq!(q.take(), Some("C"));
    }

    #[test]
    fn test_offer_rejects_when_bucket_full() {
        let q = queue([1, 2, 1]);
        q.offer("a", Priority::Normal).unwrap();
        q.offer("b", Priority::Normal).unwrap();

        let err = q.offer("c", Priority::Normal).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner(), "c");

        // other buckets are unaffected
        q.offer("d", Priority::High).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.remaining_capacity(), 1);

        let stats = q.stats();
        assert_eq!(stats[1].1.rejected, 1);
        assert_eq!(stats[1].1.peak, 2);
    }

    #[test]
    fn test_offer_all_is_atomic() {
        let q = queue([1, 3, 1]);
        q.offer("x", Priority::Normal).unwrap();

        let err = q
            .offer_all(vec!["a", "b", "c"], Priority::Normal)
            .unwrap_err();
        assert_eq!(err.into_inner(), vec!["a", "b", "c"]);
        assert_eq!(q.len_of(Priority::Normal), 1);

        q.offer_all(vec!["a", "b"], Priority::Normal).unwrap();
        assert_eq!(q.len_of(Priority::Normal), 3);
    }

    #[test]
    fn test_put_unblocks_when_slot_frees() {
        let q = Arc::new(queue([1, 1, 1]));
        q.offer("first", Priority::High).unwrap();

        let inserted = Arc::new(AtomicBool::new(false));
        let producer = {
            let q = q.clone();
            let inserted = inserted.clone();
            thread::spawn(move || {
                q.put("second", Priority::High).unwrap();
                inserted.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!inserted.load(Ordering::SeqCst));

        assert_eq!(q.take(), Some("first"));
        producer.join().unwrap();
        assert!(inserted.load(Ordering::SeqCst));
        assert_eq!(q.take(), Some("second"));
    }

    #[test]
    fn test_offer_timeout_expires() {
        let q = queue([1, 1, 1]);
        q.offer("a", Priority::Background).unwrap();

        let started = Instant::now();
        let err = q
            .offer_timeout("b", Priority::Background, Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_full());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_poll_times_out_on_empty_queue() {
        let q = queue([1, 1, 1]);
        assert_eq!(q.poll(Duration::from_millis(10)), None);

        q.offer("a", Priority::Normal).unwrap();
        assert_eq!(q.poll(Duration::from_millis(10)), Some("a"));
    }

    #[test]
    fn test_take_blocks_until_offer() {
        let q = Arc::new(queue([2, 2, 2]));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.take())
        };

        thread::sleep(Duration::from_millis(20));
        q.offer("late", Priority::Background).unwrap();
        assert_eq!(consumer.join().unwrap(), Some("late"));
    }

    #[test]
    fn test_remove_preserves_fifo_order() {
        let q = queue([5, 5, 5]);
        for item in ["A", "B", "C", "D"] {
            q.offer(item, Priority::Normal).unwrap();
        }

        let removed = q.remove_where(|item| *item == "B");
        assert_eq!(removed, vec!["B"]);
        assert!(!q.contains(|item| *item == "B"));
        assert_eq!(q.remaining_capacity(), 5 + 2 + 5);

        assert_eq!(q.take(), Some("A"));
        assert_eq!(q.take(), Some("C"));
        assert_eq!(q.take(), Some("D"));
    }

    #[test]
    fn test_close_wakes_consumers_and_serves_remaining_items() {
        let q = Arc::new(queue([2, 2, 2]));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.take())
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), None);

        let q = queue([2, 2, 2]);
        q.offer("a", Priority::Background).unwrap();
        q.offer("b", Priority::High).unwrap();
        q.close();
        assert!(matches!(
            q.offer("c", Priority::High),
            Err(OfferError::Closed("c"))
        ));
        assert_eq!(q.take(), Some("b"));
        assert_eq!(q.poll(Duration::from_millis(10)), Some("a"));
        assert_eq!(q.take(), None);
        assert_eq!(q.poll(Duration::from_millis(10)), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_close_and_drain_hands_nothing_to_consumers() {
        let q = queue([2, 2, 2]);
        q.offer("a", Priority::Background).unwrap();
        q.offer("b", Priority::High).unwrap();

        assert_eq!(q.close_and_drain(), vec!["b", "a"]);
        assert!(q.is_closed());
        assert_eq!(q.take(), None);
        assert_eq!(q.stats()[0].1.dequeued, 1);
    }

    #[test]
    fn test_take_when_stops_waiting_once_closed() {
        let q = queue([2, 2, 2]);
        q.offer("held", Priority::Normal).unwrap();
        q.close();

        // a consumer that declines the remaining item gets None instead of blocking
        let value: Option<()> = q.take_when(|_| Step::Wait);
        assert_eq!(value, None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_take_when_extracts_group() {
        let q = queue([4, 4, 4]);
        for item in ["x1", "y1", "x2", "y2"] {
            q.offer(item, Priority::Normal).unwrap();
        }

        let group = q
            .take_when(|view| {
                let positions: Vec<usize> = view
                    .iter(Priority::Normal)
                    .enumerate()
                    .filter(|(_, item)| item.starts_with('x'))
                    .map(|(i, _)| i)
                    .collect();
                Step::Ready(view.extract(Priority::Normal, &positions))
            })
            .unwrap();

        assert_eq!(group, vec!["x1", "x2"]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.take(), Some("y1"));
    }

    #[test]
    fn test_take_when_wakes_at_deadline() {
        let q = queue([1, 1, 1]);
        let deadline = Instant::now() + Duration::from_millis(20);
        let value = q.take_when(|_| match Instant::now() >= deadline {
            true => Step::Ready(42),
            false => Step::WaitUntil(deadline),
        });
        assert_eq!(value, Some(42));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_high_bucket_drains_before_background() {
        let q = Arc::new(PriorityBoundedQueue::new([64, 64, 64]).unwrap());
        for i in 0..32u32 {
            q.offer((Priority::Background, i), Priority::Background).unwrap();
            q.offer((Priority::High, i), Priority::High).unwrap();
        }

        let mut taken = Vec::new();
        while let Some(item) = q.poll(Duration::from_millis(5)) {
            taken.push(item);
        }
        let first_background = taken
            .iter()
            .position(|(p, _)| *p == Priority::Background)
            .unwrap();
        assert_eq!(first_background, 32);
        assert!(taken[..32].iter().all(|(p, _)| *p == Priority::High));
    }
}
