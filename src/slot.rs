//! A single cell of a segment ring.
//!
//! Each slot pairs a value cell with a sequence number, and the sequence number is the only
//! word the hot path synchronizes on:
//!
//! ```txt
//! sequence == t                    -> writable by the producer holding tail value t
//! sequence == t + 1                -> published; readable once the consumer cursor reaches t
//! sequence == h + SEGMENT_CAPACITY -> consumed at head value h; writable again one
//!                                     generation later
//! ```
//!
//! A slot at ring offset `i` always satisfies `sequence % SEGMENT_CAPACITY == i`. The value
//! cell carries no synchronization of its own: it is written only by the producer that won the
//! tail CAS for this slot and read only by the consumer that won the head CAS for it.
//!
//! [`SEGMENT_CAPACITY`]: crate::segment::SEGMENT_CAPACITY

use crate::variant::cell::UnsafeCell;
use crate::variant::sync::atomic::AtomicI32;

use std::mem::MaybeUninit;

/// One ring cell: a value and the sequence number guarding it.
pub(crate) struct Slot<T> {
    /// Holds an item between publish and consume.
    pub(crate) value: UnsafeCell<MaybeUninit<T>>,

    /// Generation-and-phase word of the slot; see the module docs.
    pub(crate) sequence: AtomicI32,
}

impl<T> Slot<T> {
    /// Creates the slot at ring offset `at`, empty and owned by the first generation
    /// of producers.
    pub(crate) fn new(at: i32) -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            sequence: AtomicI32::new(at),
        }
    }
}
