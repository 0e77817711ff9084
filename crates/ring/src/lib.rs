#![deny(missing_docs)]

//! Bounded, lock-free, multi-producer multi-consumer ring queue.
//!
//! This is Dmitry Vyukov's bounded MPMC queue: a fixed-size array of cells,
//! each carrying its own sequence counter, with producers and consumers
//! racing via a single CAS on a shared `tail`/`head` index. No locks, no
//! allocation on the push/pop hot path.
//!
//! # Memory ordering
//!
//! - `tail`/`head` are advanced with a sequentially-consistent
//!   compare-exchange, matching the fence discipline the algorithm was
//!   originally specified with.
//! - A cell's sequence number is loaded with `Acquire` before the payload is
//!   touched, and stored with `Release` after the payload write/read — this
//!   is what makes the payload access safe without a lock: the sequence
//!   bump publishes (push) or retires (pop) the slot.
//!
//! # Safety
//!
//! The payload slots are `UnsafeCell<MaybeUninit<T>>` rather than
//! `Mutex<Option<T>>` — a lock-free queue cannot use a lock for its hot
//! path. Access is guarded by the protocol above, not by the type system,
//! so this crate (uniquely in the workspace) does not carry
//! `#![forbid(unsafe_code)]`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Errors constructing a [`RingQueue`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingError {
    /// Capacity must be a power of two, and at least 2.
    #[error("ring queue capacity {0} must be a power of two >= 2")]
    InvalidCapacity(usize),
}

/// 64 bytes is a conservative cache line size on the platforms this crate
/// targets; padding avoids false sharing between the producer-side `tail`
/// and the consumer-side `head`.
#[repr(align(64))]
struct CachePadded<T>(T);

struct Cell<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A fixed-capacity, lock-free MPMC FIFO queue.
///
/// `push`/`pop` never block and never allocate. `push` hands the item back
/// in `Err` when the queue is full (including spuriously, under
/// contention); `pop` returns `None` when the queue is empty.
pub struct RingQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// Safety: every payload transfer is guarded by the sequence-number protocol
// documented above — a slot is only written by the producer that won the
// `enqueue_pos` CAS, and only read by the consumer that won the matching
// `dequeue_pos` CAS, with the sequence bump acting as the release/acquire
// handoff. No two threads ever touch the same slot's `UnsafeCell`
// concurrently.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Build a queue with the given capacity, which must be a power of two
    /// and at least 2.
    pub fn try_new(capacity: usize) -> Result<Self, RingError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity(capacity));
        }

        let buffer = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded(AtomicUsize::new(0)),
            dequeue_pos: CachePadded(AtomicUsize::new(0)),
        })
    }

    /// Queue capacity, `N`.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Push an item onto the tail. Returns the item back to the caller if
    /// the queue is full rather than dropping it.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.0.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.0.compare_exchange(
                    pos,
                    pos + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        // Safety: we won the slot at `pos`; no other producer
                        // can write it until we bump `sequence` below, and no
                        // consumer can read it until then either (its
                        // sequence still reads as `pos`, not `pos + 1`).
                        unsafe { (*cell.value.get()).write(item) };
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                return Err(item);
            } else {
                pos = self.enqueue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop an item from the head. Returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.0.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                match self.dequeue_pos.0.compare_exchange(
                    pos,
                    pos + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        // Safety: symmetric to push — we won the slot, its
                        // sequence reads `pos + 1` so the producer's write
                        // already happened-before this read.
                        let item = unsafe { (*cell.value.get()).assume_init_read() };
                        cell.sequence.store(pos + self.mask + 1, Ordering::Release);
                        return Some(item);
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of items currently queued.
    ///
    /// Under concurrent access this is a snapshot, not a synchronized
    /// value — by the time the caller observes it, `tail` or `head` may
    /// have moved.
    pub fn size(&self) -> usize {
        let tail = self.enqueue_pos.0.load(Ordering::SeqCst);
        let head = self.dequeue_pos.0.load(Ordering::SeqCst);
        tail.saturating_sub(head)
    }

    /// Whether the queue was empty at the moment of the call.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            RingQueue::<u32>::try_new(3),
            Err(RingError::InvalidCapacity(3))
        ));
        assert!(matches!(
            RingQueue::<u32>::try_new(1),
            Err(RingError::InvalidCapacity(1))
        ));
    }

    #[test]
    fn push_pop_fifo_single_threaded() {
        let q = RingQueue::try_new(8).unwrap();
        for i in 0..8 {
            assert!(q.push(i).is_ok());
        }
        assert_eq!(q.push(99), Err(99));
        for i in 0..8 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn full_exactly_at_capacity() {
        let q = RingQueue::try_new(4).unwrap();
        assert!(q.push(1).is_ok());
        assert!(q.push(2).is_ok());
        assert!(q.push(3).is_ok());
        assert!(q.push(4).is_ok());
        assert_eq!(q.size(), 4);
        assert_eq!(q.push(5), Err(5));
        assert_eq!(q.pop(), Some(1));
        assert!(q.push(5).is_ok());
    }

    #[test]
    fn drop_releases_remaining_items() {
        let q = RingQueue::try_new(4).unwrap();
        let dropped = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct Counted(Arc<std::sync::atomic::AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        assert!(q.push(Counted(dropped.clone())).is_ok());
        assert!(q.push(Counted(dropped.clone())).is_ok());
        drop(q);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mpmc_contention_preserves_multiset() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;
        const CAPACITY: usize = 1024;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let q = Arc::new(RingQueue::<(usize, usize)>::try_new(CAPACITY).unwrap());
        let consumed_count = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(std::sync::Mutex::new(Vec::with_capacity(TOTAL)));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let q = q.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = (p, i);
                    while let Err(back) = q.push(item) {
                        item = back;
                        thread::yield_now();
                    }
                }
            }));
        }

        for _ in 0..CONSUMERS {
            let q = q.clone();
            let consumed = consumed.clone();
            let consumed_count = consumed_count.clone();
            handles.push(thread::spawn(move || {
                let mut local = Vec::new();
                while consumed_count.load(Ordering::SeqCst) < TOTAL {
                    match q.pop() {
                        Some(item) => {
                            local.push(item);
                            consumed_count.fetch_add(1, Ordering::SeqCst);
                        }
                        None => thread::yield_now(),
                    }
                }
                consumed.lock().unwrap().extend(local);
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut got = consumed.lock().unwrap().clone();
        got.sort_unstable();
        let mut want: Vec<(usize, usize)> = (0..PRODUCERS)
            .flat_map(|p| (0..PER_PRODUCER).map(move |i| (p, i)))
            .collect();
        want.sort_unstable();
        assert_eq!(got, want);
    }
}
