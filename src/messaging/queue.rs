// Real-time message queue - single producer, single consumer
// Lock-free ring from the audio thread to the worker; a full queue drops the newest message

use ringbuf::traits::{Consumer as _, Observer, Producer as _, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Constructor for a producer/consumer pair
pub struct RtMessageQueue;

impl RtMessageQueue {
    /// Preallocate `capacity` slots (at least one)
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
        let (inner_producer, inner_consumer) = HeapRb::<T>::new(capacity.max(1)).split();
        let dropped = Arc::new(AtomicU64::new(0));

        (
            Producer {
                inner: inner_producer,
                dropped: Arc::clone(&dropped),
            },
            Consumer {
                inner: inner_consumer,
                dropped,
            },
        )
    }
}

/// Real-time side of the queue
pub struct Producer<T> {
    inner: HeapProd<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Producer<T> {
    /// Enqueue without blocking. A full queue returns the value and counts a drop.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        self.inner.try_push(value).inspect_err(|_| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        })
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Messages rejected because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Worker side of the queue
pub struct Consumer<T> {
    inner: HeapCons<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Consumer<T> {
    /// Dequeue the oldest message, if any
    pub fn pop(&mut self) -> Option<T> {
        self.inner.try_pop()
    }

    /// Pop up to `max` messages into `f`; returns how many were handled
    pub fn drain_with(&mut self, max: usize, mut f: impl FnMut(T)) -> usize {
        let mut handled = 0;
        while handled < max {
            match self.inner.try_pop() {
                Some(value) => {
                    f(value);
                    handled += 1;
                }
                None => break,
            }
        }
        handled
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = RtMessageQueue::new::<u32>(16);
        for i in 0..16 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.len(), 16);
        for i in 0..16 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert!(rx.pop().is_none());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (mut tx, mut rx) = RtMessageQueue::new::<u32>(4);
        for i in 0..4 {
            tx.push(i).unwrap();
        }
        assert!(tx.is_full());

        assert_eq!(tx.push(100), Err(100));
        assert_eq!(tx.push(101), Err(101));
        assert_eq!(tx.dropped_count(), 2);
        assert_eq!(rx.dropped_count(), 2);

        let drained: Vec<u32> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);

        // Space again after draining
        tx.push(5).unwrap();
        assert_eq!(rx.pop(), Some(5));
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let (mut tx, mut rx) = RtMessageQueue::new::<usize>(3);
        let mut expected = 0;
        for i in 0..100 {
            tx.push(i).unwrap();
            if i % 2 == 1 {
                assert_eq!(rx.pop(), Some(expected));
                assert_eq!(rx.pop(), Some(expected + 1));
                expected += 2;
            }
        }
    }

    #[test]
    fn test_zero_capacity_rounds_up() {
        let (mut tx, _rx) = RtMessageQueue::new::<u8>(0);
        assert_eq!(tx.capacity(), 1);
        tx.push(1).unwrap();
        assert!(tx.push(2).is_err());
    }

    #[test]
    fn test_drain_with_limit() {
        let (mut tx, mut rx) = RtMessageQueue::new::<u32>(8);
        for i in 0..6 {
            tx.push(i).unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(rx.drain_with(4, |v| seen.push(v)), 4);
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_cross_thread_order() {
        let (mut tx, mut rx) = RtMessageQueue::new::<u64>(64);
        const COUNT: u64 = 20_000;

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                let mut value = i;
                while let Err(v) = tx.push(value) {
                    value = v;
                    thread::yield_now();
                }
            }
        });

        let mut next = 0;
        while next < COUNT {
            match rx.pop() {
                Some(v) => {
                    assert_eq!(v, next);
                    next += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_undelivered_values_are_dropped() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut tx, mut rx) = RtMessageQueue::new::<Counted>(4);
            for _ in 0..3 {
                assert!(tx.push(Counted(Arc::clone(&drops))).is_ok());
            }
            drop(rx.pop());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
}
