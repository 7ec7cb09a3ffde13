//! A fixed-capacity ring of [`Slot`]s; the unit of the queue's chain.
//!
//! A segment is a bounded MPMC ring coordinated entirely by per-slot sequence numbers.
//! Producers claim slots by CAS on `tail`, consumers by CAS on `head`; winning the CAS grants
//! exclusive access to the slot's value cell until the follow-up sequence store hands the slot
//! to the other side. The queue turns segments into unbounded storage by freezing a full
//! segment, linking a successor through [`next`], and recycling drained segments through a
//! pool.
//!
//! Freezing adds [`FREEZE_OFFSET`] to `tail`. Every sequence number in a segment is bounded by
//! `head + SEGMENT_CAPACITY`, which never reaches a frozen tail value, so a producer racing
//! the freeze finds `sequence - tail < 0` on whichever slot it tries and fails instead of
//! completing its CAS. Consumers subtract the offset back out when they interpret `tail`.
//!
//! [`next`]: Segment::next

use crate::backoff::Backoff;
use crate::cache_pad::CachePad;
use crate::slot::Slot;
use crate::variant::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};

use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;

/// Number of slots in a segment. A power of two, so head and tail values mask
/// down to slot offsets.
#[cfg(not(loom))]
pub(crate) const SEGMENT_CAPACITY: usize = 1024;

/// Number of slots in a segment when model checking.
///
/// Loom cannot explore executions over a 1024-slot ring; shrinking the segment keeps the state
/// space tractable while still letting models cross segment boundaries.
#[cfg(loom)]
pub(crate) const SEGMENT_CAPACITY: usize = 4;

/// Masks a head or tail value down to its slot offset.
pub(crate) const SLOT_MASK: i32 = SEGMENT_CAPACITY as i32 - 1;

/// Added to `tail` when a segment is frozen.
///
/// Twice the capacity: a racing producer's expected tail value is then at least a full
/// capacity below the stored one, so no pre-freeze CAS can ever succeed afterwards.
pub(crate) const FREEZE_OFFSET: i32 = 2 * SEGMENT_CAPACITY as i32;

/// A bounded MPMC ring and chain link.
///
/// Field order is part of the contract: the slot array sits at the start of the (cache-line
/// aligned) segment allocation, and each cursor owns a cache line of its own.
#[repr(C)]
pub(crate) struct Segment<T> {
    /// The ring cells. `slots[i].sequence` starts out at `i`.
    slots: [Slot<T>; SEGMENT_CAPACITY],

    /// Consumer cursor.
    pub(crate) head: CachePad<AtomicI32>,

    /// Producer cursor. Carries [`FREEZE_OFFSET`] extra once the segment is frozen.
    pub(crate) tail: CachePad<AtomicI32>,

    /// Set once, under the cross-segment lock; never cleared while the segment is linked.
    pub(crate) frozen: AtomicBool,

    /// Successor in the chain, or null for the tail segment. Written under the cross-segment
    /// lock and published with release ordering.
    pub(crate) next: AtomicPtr<CachePad<Segment<T>>>,
}

impl<T> Segment<T> {
    /// A fresh, unlinked, unfrozen segment with every slot owned by the first generation.
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|i| Slot::new(i as i32)),
            head: CachePad::new(AtomicI32::new(0)),
            tail: CachePad::new(AtomicI32::new(0)),
            frozen: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Resets a pooled segment so it is indistinguishable from a fresh one.
    ///
    /// Runs under the cross-segment lock, on a segment that has been drained and unlinked
    /// from the live chain, before any relink is published.
    pub(crate) fn initialize(&self) {
        for (i, slot) in self.slots.iter().enumerate() {
            slot.sequence.store(i as i32, Ordering::Relaxed);
        }
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.frozen.store(false, Ordering::Relaxed);
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
    }

    /// Attempts to publish `item` into the ring.
    ///
    /// Hands the item back exactly when the segment is full or frozen; never blocks.
    pub(crate) fn try_enqueue(&self, item: T) -> Result<(), T> {
        let mut tail = self.tail.load(Ordering::Acquire);

        loop {
            // SAFETY: masking keeps the offset in bounds.
            let slot = unsafe { self.slots.get_unchecked((tail & SLOT_MASK) as usize) };
            let diff = slot.sequence.load(Ordering::Acquire) - tail;

            if diff == 0 {
                // The slot belongs to this tail value; claim it.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        slot.value
                            .with_mut(|p| unsafe { p.write(MaybeUninit::new(item)) });
                        slot.sequence.store(tail + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if diff < 0 {
                // Every remaining generation of this slot is ahead of us: the
                // ring is full, or frozen.
                return Err(item);
            } else {
                // Another producer claimed this slot; catch up.
                tail = self.tail.load(Ordering::Acquire);
            }
        }
    }

    /// Attempts to take the item at the consumer cursor.
    ///
    /// Returns `None` exactly when the segment is observably empty for the sampled head
    /// value. Spins while a producer is mid-publish on the target slot; producers stalled on
    /// *other* slots never hold this up.
    pub(crate) fn try_dequeue(&self) -> Option<T> {
        let mut backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            // SAFETY: masking keeps the offset in bounds.
            let slot = unsafe { self.slots.get_unchecked((head & SLOT_MASK) as usize) };
            let diff = slot.sequence.load(Ordering::Acquire) - (head + 1);

            if diff == 0 {
                // The slot is published for this head value; claim it.
                match self.head.compare_exchange_weak(
                    head,
                    head + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let item = slot.value.with(|p| unsafe { p.read().assume_init() });
                        slot.sequence
                            .store(head + SEGMENT_CAPACITY as i32, Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => head = current,
                }
            } else if diff < 0 {
                if self.is_drained(head) {
                    return None;
                }
                // A producer won the tail race for this slot but has not
                // published yet; it is one store away.
                backoff.wait();
                head = self.head.load(Ordering::Acquire);
            } else {
                // Another consumer claimed this slot; catch up.
                head = self.head.load(Ordering::Acquire);
            }
        }
    }

    /// Whether a published item is observable at the consumer cursor.
    ///
    /// The read-only arm of the dequeue protocol: it never claims a slot, but like
    /// [`try_dequeue`](Segment::try_dequeue) it waits out a producer that is mid-publish on
    /// the slot the cursor points at.
    pub(crate) fn has_item(&self) -> bool {
        let mut backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            // SAFETY: masking keeps the offset in bounds.
            let slot = unsafe { self.slots.get_unchecked((head & SLOT_MASK) as usize) };
            let diff = slot.sequence.load(Ordering::Acquire) - (head + 1);

            if diff == 0 {
                return true;
            } else if diff < 0 {
                if self.is_drained(head) {
                    return false;
                }
                backoff.wait();
                head = self.head.load(Ordering::Acquire);
            } else {
                head = self.head.load(Ordering::Acquire);
            }
        }
    }

    /// Irreversibly blocks further enqueues. Idempotent.
    ///
    /// Runs under the cross-segment lock, which makes the flag single-writer. The offset goes
    /// into `tail` before the flag is published, so any reader that observes `frozen == true`
    /// also observes an offset-carrying tail and can subtract exactly.
    pub(crate) fn freeze(&self) {
        if !self.frozen.load(Ordering::Acquire) {
            let _ = self.tail.fetch_add(FREEZE_OFFSET, Ordering::AcqRel);
            self.frozen.store(true, Ordering::Release);
        }
    }

    /// Emptiness test for a consumer holding head value `head`, used when the slot at `head`
    /// is not published.
    ///
    /// `frozen` is read before `tail`. Seeing the flag set means the offset is already in
    /// `tail`, so the frozen arithmetic is exact; missing the flag during an in-flight freeze
    /// leaves `tail` ahead of `head` and the caller retries.
    fn is_drained(&self, head: i32) -> bool {
        let frozen = self.frozen.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);

        if frozen {
            tail - FREEZE_OFFSET - head <= 0
        } else {
            tail - head <= 0
        }
    }

    /// Drops every value still resident in the ring.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the segment (queue teardown). Every slot
    /// claimed by a producer has been published by then, so the live range is exactly
    /// `head..tail` under freeze-adjusted arithmetic.
    pub(crate) unsafe fn drop_values(&self) {
        let head = self.head.load(Ordering::Acquire);
        let mut tail = self.tail.load(Ordering::Acquire);
        if self.frozen.load(Ordering::Acquire) {
            tail -= FREEZE_OFFSET;
        }

        for at in head..tail {
            let slot = &self.slots[(at & SLOT_MASK) as usize];
            if slot.sequence.load(Ordering::Acquire) == at + 1 {
                slot.value.with_mut(|p| unsafe { (*p).assume_init_drop() });
            }
        }
    }
}

impl<T> fmt::Debug for Segment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("frozen", &self.frozen.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Number of items described by a `(head, tail)` cursor pair, frozen or not.
///
/// Used by the queue's consistent-count snapshot. The two special cases are the empty and
/// frozen-empty segment; everything else reduces to masked ring arithmetic, since the freeze
/// offset is a multiple of the capacity.
pub(crate) fn slot_count(head: i32, tail: i32) -> usize {
    if head == tail || head == tail - FREEZE_OFFSET {
        return 0;
    }

    let head = head & SLOT_MASK;
    let tail = tail & SLOT_MASK;

    if head < tail {
        (tail - head) as usize
    } else {
        (SEGMENT_CAPACITY as i32 - head + tail) as usize
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn fills_to_capacity_then_rejects() {
        let segment: Segment<usize> = Segment::new();

        for i in 0..SEGMENT_CAPACITY {
            assert!(segment.try_enqueue(i).is_ok());
        }

        assert_eq!(segment.try_enqueue(SEGMENT_CAPACITY), Err(SEGMENT_CAPACITY));
    }

    #[test]
    fn freeze_blocks_enqueues_for_good() {
        let segment: Segment<usize> = Segment::new();

        assert!(segment.try_enqueue(7).is_ok());
        segment.freeze();
        segment.freeze();

        assert_eq!(segment.try_enqueue(8), Err(8));
        assert_eq!(segment.try_dequeue(), Some(7));
        assert_eq!(segment.try_dequeue(), None);
        assert_eq!(segment.try_enqueue(9), Err(9));
    }

    #[test]
    fn sequences_keep_their_slot_offset() {
        let segment: Segment<usize> = Segment::new();

        for round in 0..3 {
            for i in 0..SEGMENT_CAPACITY {
                assert!(segment.try_enqueue(round * SEGMENT_CAPACITY + i).is_ok());
            }
            for i in 0..SEGMENT_CAPACITY {
                assert_eq!(segment.try_dequeue(), Some(round * SEGMENT_CAPACITY + i));
            }

            for (i, slot) in segment.slots.iter().enumerate() {
                let sequence = slot.sequence.load(Ordering::Relaxed);
                assert_eq!(sequence % SEGMENT_CAPACITY as i32, i as i32);
            }
        }
    }

    #[test]
    fn initialize_matches_fresh_segment() {
        let segment: Segment<usize> = Segment::new();

        for i in 0..SEGMENT_CAPACITY {
            assert!(segment.try_enqueue(i).is_ok());
        }
        segment.freeze();
        while segment.try_dequeue().is_some() {}

        segment.initialize();

        for i in 0..SEGMENT_CAPACITY {
            assert!(segment.try_enqueue(i).is_ok());
        }
        for i in 0..SEGMENT_CAPACITY {
            assert_eq!(segment.try_dequeue(), Some(i));
        }
    }

    #[test]
    fn slot_count_handles_wrap_and_freeze() {
        let capacity = SEGMENT_CAPACITY as i32;

        assert_eq!(slot_count(0, 0), 0);
        assert_eq!(slot_count(5, 5 + FREEZE_OFFSET), 0);
        assert_eq!(slot_count(3, 7), 4);
        assert_eq!(slot_count(0, capacity), SEGMENT_CAPACITY);
        assert_eq!(slot_count(capacity - 1, capacity + 1), 2);
        assert_eq!(
            slot_count(5, FREEZE_OFFSET + capacity),
            SEGMENT_CAPACITY - 5
        );
    }
}
