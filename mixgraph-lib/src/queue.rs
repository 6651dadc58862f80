//! Unbounded lock-free FIFO used to ship control changes onto the render thread.
//!
//! The queue is a singly linked list that always holds one sentinel node. The
//! consumer owns the tail (the sentinel) and reads `tail.next` to find the
//! oldest unread item; producers own the head and publish a new node by writing
//! the previous head's `next` pointer. Because a node's payload is written before
//! the pointer that exposes it, the consumer never observes a half-initialized
//! item and neither side ever takes a lock.
//!
//! Two modes are provided:
//! - [`Spsc`]: one producer. The producer moves the head with plain stores and
//!   issues a full fence before publishing.
//! - [`Mpsc`]: many producers. Producers race on an atomic swap of the head and
//!   then link the node they displaced. Between the swap and the link a newer
//!   node can exist while an older node's `next` is still null; the consumer
//!   simply stops at the first null link and sees the rest on a later call.
//!
//! ```
//! use mixgraph_lib::queue;
//!
//! let (tx, mut rx) = queue::mpsc::<u32>();
//! let tx2 = tx.clone();
//! tx.enqueue(1).unwrap();
//! tx2.enqueue(2).unwrap();
//! assert_eq!(rx.dequeue(), Some(1));
//! assert_eq!(rx.dequeue(), Some(2));
//! assert!(rx.is_empty());
//! ```

use std::alloc::{self, Layout};
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, Ordering};
use std::sync::Arc;

/// Single-producer, single-consumer mode marker.
#[derive(Debug)]
pub enum Spsc {}

/// Multiple-producer, single-consumer mode marker.
#[derive(Debug)]
pub enum Mpsc {}

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    item: Option<T>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            item: None,
        }))
    }

    /// Allocate a node without aborting on allocation failure.
    fn try_alloc(item: T) -> Result<*mut Node<T>, T> {
        let layout = Layout::new::<Node<T>>();
        // SAFETY: the layout is non-zero sized because it holds an AtomicPtr.
        let raw = unsafe { alloc::alloc(layout) } as *mut Node<T>;
        if raw.is_null() {
            return Err(item);
        }
        // SAFETY: `raw` is a fresh, properly aligned allocation for Node<T>.
        unsafe {
            raw.write(Node {
                next: AtomicPtr::new(ptr::null_mut()),
                item: Some(item),
            });
        }
        Ok(raw)
    }

    /// # Safety
    /// `node` must come from `sentinel`/`try_alloc` and must not be used again.
    unsafe fn free(node: *mut Node<T>) {
        // The global allocator and layout match, so Box may reclaim it.
        drop(Box::from_raw(node));
    }
}

struct Shared<T> {
    /// Producer-side insertion point. Never null.
    head: AtomicPtr<Node<T>>,
    /// Consumer-side sentinel. Only the consumer reads or writes it.
    tail: UnsafeCell<*mut Node<T>>,
}

// SAFETY: items move between threads by value; the tail is confined to the
// single consumer handle and the head is only touched through atomics.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: AtomicPtr::new(sentinel),
            tail: UnsafeCell::new(sentinel),
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Every handle is gone, so no producer is between swap and link.
        let mut node = *self.tail.get_mut();
        while !node.is_null() {
            // SAFETY: we have exclusive access and each node is freed once.
            unsafe {
                let next = (*node).next.load(Ordering::Acquire);
                Node::free(node);
                node = next;
            }
        }
    }
}

/// Producer half of a command queue.
pub struct Producer<T, M> {
    shared: Arc<Shared<T>>,
    _mode: PhantomData<M>,
}

/// Consumer half of a command queue. There is exactly one per queue.
pub struct Consumer<T, M> {
    shared: Arc<Shared<T>>,
    _mode: PhantomData<M>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Create a single-producer, single-consumer queue.
pub fn spsc<T: Send>() -> (Producer<T, Spsc>, Consumer<T, Spsc>) {
    split()
}

/// Create a multiple-producer, single-consumer queue.
///
/// The producer half is cloneable; clones share the same queue.
pub fn mpsc<T: Send>() -> (Producer<T, Mpsc>, Consumer<T, Mpsc>) {
    split()
}

fn split<T, M>() -> (Producer<T, M>, Consumer<T, M>) {
    let shared = Arc::new(Shared::new());
    (
        Producer {
            shared: shared.clone(),
            _mode: PhantomData,
        },
        Consumer {
            shared,
            _mode: PhantomData,
            _not_sync: PhantomData,
        },
    )
}

impl<T: Send> Producer<T, Spsc> {
    /// Append an item at the head of the queue.
    ///
    /// Never blocks. Returns the item back if the node allocation failed.
    pub fn enqueue(&mut self, item: T) -> Result<(), T> {
        let node = Node::try_alloc(item)?;
        let old_head = self.shared.head.load(Ordering::Relaxed);
        self.shared.head.store(node, Ordering::Relaxed);
        // The payload write must be visible before the link that exposes it.
        fence(Ordering::SeqCst);
        // SAFETY: the consumer cannot free `old_head` until its `next` is set.
        unsafe { (*old_head).next.store(node, Ordering::Release) };
        Ok(())
    }
}

impl<T: Send> Producer<T, Mpsc> {
    /// Append an item at the head of the queue from any producer thread.
    ///
    /// Never blocks. Returns the item back if the node allocation failed.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let node = Node::try_alloc(item)?;
        let old_head = self.shared.head.swap(node, Ordering::AcqRel);
        // SAFETY: the consumer cannot free `old_head` until its `next` is set,
        // and only the producer that displaced it ever writes that link.
        unsafe { (*old_head).next.store(node, Ordering::Release) };
        Ok(())
    }
}

impl<T> Clone for Producer<T, Mpsc> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _mode: PhantomData,
        }
    }
}

impl<T, M> Consumer<T, M> {
    fn next_node(&self) -> *mut Node<T> {
        // SAFETY: the tail is only accessed through the unique consumer.
        unsafe { (**self.shared.tail.get()).next.load(Ordering::Acquire) }
    }

    /// Remove and return the oldest published item, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<T> {
        let popped = self.next_node();
        if popped.is_null() {
            return None;
        }
        // SAFETY: `popped` is published and owned by the consumer from here on;
        // the old sentinel is no longer reachable by any producer.
        unsafe {
            let item = (*popped).item.take();
            let old_tail = std::mem::replace(&mut *self.shared.tail.get(), popped);
            Node::free(old_tail);
            item
        }
    }

    /// Remove the oldest item, dropping it. Returns `false` when empty.
    pub fn pop(&mut self) -> bool {
        self.dequeue().is_some()
    }

    /// Borrow the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        let next = self.next_node();
        if next.is_null() {
            return None;
        }
        // SAFETY: published nodes are only freed by `dequeue`, which needs `&mut self`.
        unsafe { (*next).item.as_ref() }
    }

    /// Mutably borrow the oldest item without removing it.
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        let next = self.next_node();
        if next.is_null() {
            return None;
        }
        // SAFETY: as in `peek`, and `&mut self` excludes other borrows.
        unsafe { (*next).item.as_mut() }
    }

    /// `true` when no published item is waiting.
    ///
    /// In MPSC mode this may report empty while a producer is mid-publish.
    pub fn is_empty(&self) -> bool {
        self.next_node().is_null()
    }

    /// Discard every published item.
    pub fn clear(&mut self) {
        while self.pop() {}
    }

    /// Iterate over items as they are dequeued.
    pub fn drain(&mut self) -> Drain<'_, T, M> {
        Drain { consumer: self }
    }
}

/// Draining iterator returned by [`Consumer::drain`].
pub struct Drain<'a, T, M> {
    consumer: &'a mut Consumer<T, M>,
}

impl<T, M> Iterator for Drain<'_, T, M> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.consumer.dequeue()
    }
}

impl<T, M> std::fmt::Debug for Consumer<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

impl<T, M> std::fmt::Debug for Producer<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn new_queue_is_empty() {
        let (_tx, rx) = spsc::<u8>();
        assert!(rx.is_empty());
        assert!(rx.peek().is_none());
    }

    #[test]
    fn single_enqueue_makes_queue_non_empty() {
        let (mut tx, mut rx) = spsc();
        tx.enqueue(7_u32).unwrap();
        assert!(!rx.is_empty());
        assert_eq!(rx.peek(), Some(&7));
        assert_eq!(rx.dequeue(), Some(7));
        assert!(rx.is_empty());
        assert_eq!(rx.dequeue(), None);
    }

    #[test]
    fn dequeue_preserves_fifo_order() {
        let (tx, mut rx) = mpsc();
        for value in 0..32 {
            tx.enqueue(value).unwrap();
        }
        let drained: Vec<i32> = rx.drain().collect();
        assert_eq!(drained, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn peek_mut_edits_in_place() {
        let (mut tx, mut rx) = spsc();
        tx.enqueue(String::from("a")).unwrap();
        if let Some(item) = rx.peek_mut() {
            item.push('b');
        }
        assert_eq!(rx.dequeue().as_deref(), Some("ab"));
    }

    #[test]
    fn clear_drops_each_item_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = spsc();
        for _ in 0..5 {
            assert!(tx.enqueue(DropCounter(drops.clone())).is_ok());
        }
        rx.clear();
        assert!(rx.is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn dropping_queue_frees_pending_items() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (tx, mut rx) = mpsc();
            for _ in 0..4 {
                assert!(tx.enqueue(DropCounter(drops.clone())).is_ok());
            }
            assert!(rx.pop());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn spsc_across_threads_keeps_order() {
        const COUNT: u64 = 50_000;
        let (mut tx, mut rx) = spsc();
        let producer = thread::spawn(move || {
            for value in 0..COUNT {
                tx.enqueue(value).unwrap();
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match rx.dequeue() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(rx.is_empty());
    }

    #[test]
    fn mpsc_delivers_every_item_once_in_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 10_000;
        let (tx, mut rx) = mpsc::<(usize, usize)>();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer_id| {
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for seq in 0..PER_PRODUCER {
                        tx.enqueue((producer_id, seq)).unwrap();
                        if rng.gen_bool(0.01) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut next_seq = vec![0_usize; PRODUCERS];
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            match rx.dequeue() {
                Some((producer_id, seq)) => {
                    assert_eq!(seq, next_seq[producer_id]);
                    next_seq[producer_id] += 1;
                    received += 1;
                }
                None => thread::yield_now(),
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(next_seq.iter().all(|&seq| seq == PER_PRODUCER));
        assert!(rx.is_empty());
    }
}
