//! Bounded single-producer single-consumer ring buffer (component C1).
//!
//! Capacity is rounded up to the caller-supplied power of two; one slot is
//! reserved so that up to `capacity - 1` elements can be stored at a time.
//! Head and tail are monotonically increasing counters, wrapped to a slot
//! index with a bitmask only at the point of access - this sidesteps the
//! ABA problem on the index itself the same way the lock-free ring buffers
//! in this niche always do it.
//!
//! Ordering: the producer publishes `tail` with `Release`, the consumer
//! observes it with `Acquire`; `head` is published the same way in the other
//! direction. A consumer that observes an advanced `tail` therefore also
//! observes the fully-written element underneath it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// A lock-free bounded queue with exactly one producer and one consumer.
///
/// The fast path (`push`/`pop`) never blocks. [`SpscQueue::wait_and_pop`] adds
/// a condvar-backed blocking fallback for the consumer only.
pub struct SpscQueue<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    signal: Mutex<()>,
    condvar: Condvar,
}

unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Creates a new queue. `capacity` must be a power of two and at least 2.
    pub fn new(capacity: usize) -> SpscQueue<T> {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        assert!(capacity >= 2, "capacity must be at least 2");

        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        SpscQueue {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            signal: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Number of usable slots (`capacity - 1`).
    #[inline]
    pub fn usable_capacity(&self) -> usize {
        self.mask
    }

    /// Writes `value` into the queue. Returns `false` without writing it if
    /// the queue is full. Must only be called by the designated producer.
    pub fn push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.mask {
            return false;
        }

        let idx = tail & self.mask;
        unsafe {
            (*self.buffer[idx].get()).write(value);
        }

        self.tail.store(tail.wrapping_add(1), Ordering::Release);

        // Wake a blocked consumer, if any. Cheap uncontended lock - the
        // consumer only ever holds it while parked on the condvar.
        let _guard = self.signal.lock().unwrap();
        self.condvar.notify_one();

        true
    }

    /// Removes and returns the oldest element, or `None` if the queue is
    /// empty. Must only be called by the designated consumer.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let idx = head & self.mask;
        let value = unsafe { (*self.buffer[idx].get()).assume_init_read() };

        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Blocks the calling thread until an element is available, then
    /// returns it. Must only be called by the designated consumer.
    pub fn wait_and_pop(&self) -> T {
        loop {
            if let Some(value) = self.pop() {
                return value;
            }

            let guard = self.signal.lock().unwrap();
            if !self.empty() {
                continue;
            }
            // Spurious-wakeup tolerant: re-check `empty()` after waking.
            let _unused = self.condvar.wait(guard).unwrap();
        }
    }

    /// Observational only - the result may be stale by the time the caller
    /// acts on it.
    #[inline]
    pub fn empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Acquire)
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_pop_fifo() {
        let q: SpscQueue<u32> = SpscQueue::new(8);
        assert!(q.empty());
        for i in 0..7 {
            assert!(q.push(i));
        }
        // One slot is always reserved.
        assert!(!q.push(99));

        for i in 0..7 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
        assert!(q.empty());
    }

    #[test]
    fn full_queue_rejects_push() {
        let q: SpscQueue<u32> = SpscQueue::new(2);
        assert!(q.push(1));
        assert!(!q.push(2));
        assert_eq!(q.pop(), Some(1));
        assert!(q.push(2));
    }

    #[test]
    fn wait_and_pop_blocks_until_pushed() {
        let q = Arc::new(SpscQueue::<u32>::new(4));
        let q2 = q.clone();

        let handle = thread::spawn(move || q2.wait_and_pop());

        thread::sleep(Duration::from_millis(50));
        assert!(q.push(42));

        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn drops_remaining_elements() {
        use std::sync::atomic::AtomicUsize as Counter;
        static DROPPED: Counter = Counter::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPPED.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let q: SpscQueue<Tracked> = SpscQueue::new(4);
            assert!(q.push(Tracked));
            assert!(q.push(Tracked));
        }

        assert_eq!(DROPPED.load(Ordering::SeqCst), 2);
    }
}
