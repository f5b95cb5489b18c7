//! Lock-free single-producer single-consumer ring.
//!
//! The only userspace data path between the real-time thread and the rest of
//! the process. Push and pop never block, never allocate and never enter the
//! kernel.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Keeps the producer and consumer indices on separate cache lines.
#[repr(align(64))]
struct CachePadded<T>(T);

struct Inner<T> {
    /// `capacity + 1` slots; one slot stays empty to distinguish full from
    /// empty with plain indices.
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    /// Consumer index. Advanced with release by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Producer index. Advanced with release by the producer.
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn wrap(&self, index: usize) -> usize {
        (index + 1) % (self.capacity + 1)
    }

    fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        (tail + self.capacity + 1 - head) % (self.capacity + 1)
    }
}

/// Creates a ring holding at most `capacity` elements.
pub fn channel<T: Copy + Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "spsc ring needs a non-zero capacity");
    let slots: Vec<UnsafeCell<MaybeUninit<T>>> =
        (0..capacity + 1).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
    let inner = Arc::new(Inner {
        slots: slots.into_boxed_slice(),
        capacity,
        head: CachePadded(AtomicUsize::new(0)),
        tail: CachePadded(AtomicUsize::new(0)),
    });
    (Producer { inner: Arc::clone(&inner) }, Consumer { inner })
}

/// Writing half. `Send` but not `Clone`; exactly one thread owns it.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Copy + Send> Producer<T> {
    /// Enqueues `value`. Returns `false` when the ring is full; the element
    /// is dropped, the producer is never blocked.
    #[inline]
    pub fn push(&mut self, value: T) -> bool {
        let tail = self.inner.tail.0.load(Ordering::Relaxed);
        let head = self.inner.head.0.load(Ordering::Acquire);
        let next = self.inner.wrap(tail);
        if next == head {
            return false;
        }
        // SAFETY: only the producer writes slots between head and tail, and
        // this slot is outside the consumer's published range.
        unsafe {
            (*self.inner.slots[tail].get()).write(value);
        }
        self.inner.tail.0.store(next, Ordering::Release);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// Reading half. `Send` but not `Clone`; exactly one thread owns it.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Copy + Send> Consumer<T> {
    /// Dequeues the oldest element, or `None` when the ring is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let head = self.inner.head.0.load(Ordering::Relaxed);
        let tail = self.inner.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: the producer's release store on tail published this slot.
        let value = unsafe { (*self.inner.slots[head].get()).assume_init_read() };
        self.inner.head.0.store(self.inner.wrap(head), Ordering::Release);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn push_pop_in_order() {
        let (mut tx, mut rx) = channel::<u32>(4);
        assert!(tx.push(1));
        assert!(tx.push(2));
        assert!(tx.push(3));
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn full_exactly_at_capacity() {
        let (mut tx, mut rx) = channel::<u32>(3);
        assert!(tx.push(10));
        assert!(tx.push(11));
        assert!(tx.push(12));
        // Holds exactly `capacity` elements, the fourth push is refused.
        assert!(!tx.push(13));
        assert_eq!(tx.len(), 3);
        assert_eq!(rx.pop(), Some(10));
        assert!(tx.push(13));
        assert!(!tx.push(14));
    }

    #[test]
    fn empty_exactly_when_drained() {
        let (mut tx, mut rx) = channel::<u32>(2);
        assert!(rx.is_empty());
        assert_eq!(rx.pop(), None);
        tx.push(7);
        assert!(!rx.is_empty());
        assert_eq!(rx.pop(), Some(7));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn wraparound_preserves_order() {
        let (mut tx, mut rx) = channel::<u64>(4);
        for round in 0..50u64 {
            for i in 0..4 {
                assert!(tx.push(round * 4 + i));
            }
            for i in 0..4 {
                assert_eq!(rx.pop(), Some(round * 4 + i));
            }
        }
    }

    #[test]
    fn dequeue_sequence_is_prefix_of_enqueue_sequence() {
        let (mut tx, mut rx) = channel::<u32>(64);
        let total: u32 = 100_000;

        let producer = thread::spawn(move || {
            let mut sent = 0u32;
            while sent < total {
                if tx.push(sent) {
                    sent += 1;
                } else {
                    thread::yield_now();
                }
            }
        });
        let consumer = thread::spawn(move || {
            let mut received = Vec::with_capacity(total as usize);
            while received.len() < total as usize {
                match rx.pop() {
                    Some(v) => received.push(v),
                    None => thread::yield_now(),
                }
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();
        for (i, &v) in received.iter().enumerate() {
            assert_eq!(v, i as u32);
        }
    }
}
