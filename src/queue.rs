//! A lock-free multi-producer multi-consumer unbounded queue.

use crate::backoff::Backoff;
use crate::cache_pad::CachePad;
use crate::segment::{slot_count, Segment, FREEZE_OFFSET};
use crate::variant::sync::atomic::{AtomicPtr, Ordering};
use crate::variant::sync::{Arc, Mutex};

use std::fmt;

/// A lock-free multi-producer multi-consumer unbounded queue.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

// Not derived: a handle clones for any `T`, and prints for any `T`.
impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl<T> Queue<T> {
    /// Creates a new [`Queue`].
    ///
    /// # Examples
    ///
    /// ```
    /// use seg_queue::Queue;
    ///
    /// let queue = Queue::<usize>::new();
    /// ```
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Push an item into the [`Queue`].
    ///
    /// # Examples
    ///
    /// ```
    /// use seg_queue::Queue;
    ///
    /// let queue = Queue::<usize>::new();
    ///
    /// queue.push(1);
    /// queue.push(2);
    /// queue.push(3);
    /// ```
    pub fn push(&self, item: T) {
        self.inner.push(item)
    }

    /// Pop an item from the [`Queue`]. Returns none if the [`Queue`] is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use seg_queue::Queue;
    ///
    /// let queue = Queue::<usize>::new();
    /// for i in 0..8 {
    ///   queue.push(i);
    /// }
    ///
    /// for i in 0..8 {
    ///   assert_eq!(i, queue.pop().unwrap());
    /// }
    ///
    /// assert!(queue.pop().is_none());
    /// ```
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Number of items in the [`Queue`], taken as a consistent snapshot of the whole
    /// segment chain.
    ///
    /// Concurrent pushes and pops keep moving while the count is taken; the value is exact
    /// for some instant during the call, not for its return. Counts observed at quiescence
    /// are exact in the usual sense.
    ///
    /// # Examples
    ///
    /// ```
    /// use seg_queue::Queue;
    ///
    /// let queue = Queue::<usize>::new();
    /// for i in 0..3 {
    ///   queue.push(i);
    /// }
    ///
    /// assert_eq!(queue.len(), 3);
    /// ```
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the [`Queue`] holds no items, taken as a consistent snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// use seg_queue::Queue;
    ///
    /// let queue = Queue::<usize>::new();
    /// assert!(queue.is_empty());
    ///
    /// queue.push(1);
    /// assert!(!queue.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Discards every item in the [`Queue`].
    ///
    /// Discarded items are dropped without being handed to any consumer. The queue keeps one
    /// segment and retires the rest of the chain for reuse.
    ///
    /// # Examples
    ///
    /// ```
    /// use seg_queue::Queue;
    ///
    /// let queue = Queue::<usize>::new();
    /// for i in 0..2_048 {
    ///   queue.push(i);
    /// }
    ///
    /// queue.clear();
    ///
    /// assert!(queue.is_empty());
    /// assert!(queue.pop().is_none());
    /// ```
    pub fn clear(&self) {
        self.inner.clear()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A segment allocation shared through raw pointers. Created by [`allocate_segment`], freed
/// only when the owning [`Inner`] drops.
type SegmentPtr<T> = *mut CachePad<Segment<T>>;

fn allocate_segment<T>() -> SegmentPtr<T> {
    Box::into_raw(Box::new(CachePad::new(Segment::new())))
}

struct Inner<T> {
    /// Segment the consumers drain.
    head_segment: CachePad<AtomicPtr<CachePad<Segment<T>>>>,

    /// Segment the producers fill.
    tail_segment: CachePad<AtomicPtr<CachePad<Segment<T>>>>,

    /// Retired segments available for reuse, protected by the cross-segment lock.
    ///
    /// Holding this lock is what authorizes a structural transition: linking a new tail,
    /// retiring a drained head, clearing, or walking the interior of the chain.
    pool: Mutex<Vec<SegmentPtr<T>>>,
}

// The raw segment pointers keep `Inner` from being auto-Send/Sync; the protocol moves items
// of `T` across threads but never shares a `&T`.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn new() -> Self {
        let first = allocate_segment::<T>();

        Self {
            head_segment: CachePad::new(AtomicPtr::new(first)),
            tail_segment: CachePad::new(AtomicPtr::new(first)),
            pool: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, mut item: T) {
        loop {
            let tail = self.tail_segment.load(Ordering::Acquire);

            // SAFETY: segments are freed only when the queue drops.
            item = match unsafe { (*tail).try_enqueue(item) } {
                Ok(()) => return,
                Err(item) => item,
            };

            // The tail segment is full (or frozen). If nobody has replaced it
            // yet, do so; otherwise just retry on the new tail.
            if self.tail_segment.load(Ordering::Acquire) == tail {
                self.grow(tail);
            }
        }
    }

    /// Slow path of [`push`](Inner::push): freezes the observed tail segment and links a
    /// successor, unless another producer already did.
    fn grow(&self, observed: SegmentPtr<T>) {
        let mut pool = self.pool.lock().unwrap();

        if self.tail_segment.load(Ordering::Acquire) != observed {
            return;
        }

        let fresh = acquire_segment(&mut pool);

        // Freeze before linking: once the successor is visible, nothing can land in its
        // predecessor anymore, so consumers may drain and retire it.
        // SAFETY: `observed` is the live tail segment; the chain stays allocated.
        unsafe {
            (*observed).freeze();
            (&(*observed)).next.store(fresh, Ordering::Release);
        }
        self.tail_segment.store(fresh, Ordering::Release);
    }

    fn pop(&self) -> Option<T> {
        loop {
            let head = self.head_segment.load(Ordering::Acquire);

            // SAFETY: segments are freed only when the queue drops.
            let segment = unsafe { &**head };

            if let Some(item) = segment.try_dequeue() {
                return Some(item);
            }

            if segment.next.load(Ordering::Acquire).is_null() {
                return None;
            }

            // A successor exists, so this segment is frozen and the emptiness verdict above
            // may predate the freeze. Re-read the head pointer before touching the segment
            // again: another consumer may have retired it in the meantime, after which the
            // pool can hand it to a producer as a reinitialized tail.
            if self.head_segment.load(Ordering::Acquire) != head {
                continue;
            }

            // One more attempt under complete freeze semantics before retiring the
            // segment: an item may have landed just before the freeze.
            if let Some(item) = segment.try_dequeue() {
                return Some(item);
            }

            self.retire_head(head);
        }
    }

    /// Slow path of [`pop`](Inner::pop): the observed head segment is drained and has a
    /// successor. Swings the head pointer and retires the segment to the pool, unless
    /// another consumer already did.
    fn retire_head(&self, observed: SegmentPtr<T>) {
        let mut pool = self.pool.lock().unwrap();

        if self.head_segment.load(Ordering::Acquire) != observed {
            return;
        }

        // SAFETY: `observed` is the live head segment; the chain stays allocated.
        let next = unsafe { (&(*observed)).next.load(Ordering::Acquire) };
        self.head_segment.store(next, Ordering::Release);
        pool.push(observed);
    }

    fn len(&self) -> usize {
        let mut backoff = Backoff::new();

        loop {
            let head_ptr = self.head_segment.load(Ordering::Acquire);
            let tail_ptr = self.tail_segment.load(Ordering::Acquire);

            // SAFETY: segments are freed only when the queue drops.
            let head_segment = unsafe { &**head_ptr };

            let head = head_segment.head.load(Ordering::Acquire);
            let tail = head_segment.tail.load(Ordering::Acquire);

            if head_ptr == tail_ptr {
                // Single segment: trust the counters only if nothing moved
                // between the two reads of all four observations.
                if self.snapshot_holds(head_ptr, tail_ptr, head, tail) {
                    return slot_count(head, tail);
                }
            } else if head_segment.next.load(Ordering::Acquire) == tail_ptr {
                // Two adjacent segments: same discipline over six observations.
                // SAFETY: as above.
                let tail_segment = unsafe { &**tail_ptr };
                let tail_head = tail_segment.head.load(Ordering::Acquire);
                let tail_tail = tail_segment.tail.load(Ordering::Acquire);

                if self.snapshot_holds(head_ptr, tail_ptr, head, tail)
                    && tail_head == tail_segment.head.load(Ordering::Acquire)
                    && tail_tail == tail_segment.tail.load(Ordering::Acquire)
                {
                    return slot_count(head, tail) + slot_count(tail_head, tail_tail);
                }
            } else if let Some(count) = self.chain_count(head_ptr, tail_ptr) {
                return count;
            }

            backoff.wait();
        }
    }

    /// Whether both segment pointers and the head segment's cursors still read as sampled.
    fn snapshot_holds(
        &self,
        head_ptr: SegmentPtr<T>,
        tail_ptr: SegmentPtr<T>,
        head: i32,
        tail: i32,
    ) -> bool {
        // SAFETY: segments are freed only when the queue drops.
        let head_segment = unsafe { &**head_ptr };

        self.head_segment.load(Ordering::Acquire) == head_ptr
            && self.tail_segment.load(Ordering::Acquire) == tail_ptr
            && head_segment.head.load(Ordering::Acquire) == head
            && head_segment.tail.load(Ordering::Acquire) == tail
    }

    /// Count over a chain of three or more segments, validated under the cross-segment lock.
    ///
    /// Interior segments were frozen-full before they were linked and no consumer has
    /// touched them (consumers only ever operate on the head segment), so each one holds
    /// exactly `tail - FREEZE_OFFSET` items against a head still at zero.
    fn chain_count(&self, head_ptr: SegmentPtr<T>, tail_ptr: SegmentPtr<T>) -> Option<usize> {
        let _pool = self.pool.lock().unwrap();

        if self.head_segment.load(Ordering::Acquire) != head_ptr
            || self.tail_segment.load(Ordering::Acquire) != tail_ptr
        {
            return None;
        }

        // SAFETY: both ends are live chain segments while the lock is held.
        let head_segment = unsafe { &**head_ptr };
        let tail_segment = unsafe { &**tail_ptr };

        let head = head_segment.head.load(Ordering::Acquire);
        let tail = head_segment.tail.load(Ordering::Acquire);
        let tail_head = tail_segment.head.load(Ordering::Acquire);
        let tail_tail = tail_segment.tail.load(Ordering::Acquire);

        // The lock pins the chain, but the end segments' counters still move under
        // concurrent pushes and pops; require a stable double read.
        if head != head_segment.head.load(Ordering::Acquire)
            || tail != head_segment.tail.load(Ordering::Acquire)
            || tail_head != tail_segment.head.load(Ordering::Acquire)
            || tail_tail != tail_segment.tail.load(Ordering::Acquire)
        {
            return None;
        }

        let mut count = slot_count(head, tail) + slot_count(tail_head, tail_tail);

        let mut segment = head_segment.next.load(Ordering::Acquire);
        while segment != tail_ptr {
            // SAFETY: interior segments stay allocated and linked while the lock is held.
            let interior = unsafe { &**segment };
            count += (interior.tail.load(Ordering::Acquire) - FREEZE_OFFSET) as usize;
            segment = interior.next.load(Ordering::Acquire);
        }

        Some(count)
    }

    fn is_empty(&self) -> bool {
        let mut segment = self.head_segment.load(Ordering::Acquire);

        loop {
            // SAFETY: segments are freed only when the queue drops.
            let current = unsafe { &**segment };

            if current.has_item() {
                return false;
            }

            let next = current.next.load(Ordering::Acquire);

            if next.is_null() {
                // A producer may have linked a successor between the emptiness check and
                // the null read; trust the verdict only if the link is still absent.
                let recheck = current.next.load(Ordering::Acquire);
                if recheck.is_null() {
                    return true;
                }
                segment = recheck;
            } else {
                segment = next;
            }
        }
    }

    fn clear(&self) {
        let mut pool = self.pool.lock().unwrap();

        let tail = self.tail_segment.load(Ordering::Acquire);
        // SAFETY: the live chain stays allocated; the lock serializes structural mutation.
        unsafe { (*tail).freeze() };

        // Every chain segment is now frozen (interiors by the linking protocol, the tail by
        // the freeze above), so each drain below terminates. Draining through the sequence
        // protocol also waits out any producer that claimed a slot before the freeze, so a
        // pooled segment never has a write in flight.
        let mut segment = self.head_segment.load(Ordering::Acquire);
        while !segment.is_null() {
            // SAFETY: chain segments stay allocated while the lock is held.
            let next = unsafe { (&(*segment)).next.load(Ordering::Acquire) };
            while let Some(item) = unsafe { (*segment).try_dequeue() } {
                drop(item);
            }
            pool.push(segment);
            segment = next;
        }

        let fresh = acquire_segment(&mut pool);
        self.head_segment.store(fresh, Ordering::Release);
        self.tail_segment.store(fresh, Ordering::Release);
    }
}

/// Pops and reinitializes a pooled segment, or allocates a fresh one. The caller holds the
/// cross-segment lock.
fn acquire_segment<T>(pool: &mut Vec<SegmentPtr<T>>) -> SegmentPtr<T> {
    match pool.pop() {
        Some(segment) => {
            // SAFETY: pooled segments are drained and unreachable from the live chain.
            unsafe { (*segment).initialize() };
            segment
        }
        None => allocate_segment(),
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Exclusive access: no operation is in flight anymore. Drop resident values, then
        // free the chain and the pooled segments.
        let mut segment = self.head_segment.load(Ordering::Acquire);
        while !segment.is_null() {
            // SAFETY: chain pointers came from `Box::into_raw` and each segment is linked
            // exactly once.
            unsafe {
                let next = (&(*segment)).next.load(Ordering::Acquire);
                (*segment).drop_values();
                drop(Box::from_raw(segment));
                segment = next;
            }
        }

        let mut pool = self.pool.lock().unwrap();
        for segment in pool.drain(..) {
            // SAFETY: pooled segments are drained of values and owned solely by the pool.
            unsafe { drop(Box::from_raw(segment)) };
        }
    }
}

impl<T> fmt::Debug for Inner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner").finish_non_exhaustive()
    }
}
