//! Fixed-capacity single-producer/single-consumer ring of movement blocks.
//!
//! The producer (block builder) fully initializes a block before the
//! release store that advances `head`; the consumer (step generator) claims
//! the tail block by setting its BUSY bit and retires it by advancing
//! `tail`. Block-field mutation after publication (look-ahead, trapezoid
//! commit, the BUSY transition itself) happens under a short mutex-backed
//! critical section, the hosted mapping of interrupt masking.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::block::{Block, BlockFlags};

/// Ring capacity. Must be a power of two; one slot is kept free to
/// distinguish full from empty.
pub const BLOCK_BUFFER_SIZE: usize = 16;
const BLOCK_MOD_MASK: usize = BLOCK_BUFFER_SIZE - 1;

const _: () = assert!(BLOCK_BUFFER_SIZE.is_power_of_two());

#[inline]
pub fn next_block_index(i: usize) -> usize {
    (i + 1) & BLOCK_MOD_MASK
}

#[inline]
pub fn prev_block_index(i: usize) -> usize {
    i.wrapping_sub(1) & BLOCK_MOD_MASK
}

pub struct BlockQueue {
    slots: Mutex<[Block; BLOCK_BUFFER_SIZE]>,
    /// Index of the next slot to be pushed.
    head: AtomicUsize,
    /// Index of the oldest queued block.
    tail: AtomicUsize,
}

impl Default for BlockQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockQueue {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([Block::default(); BLOCK_BUFFER_SIZE]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Lock the block storage. Poisoning is not meaningful here (no
    /// invariant spans a panic boundary), so a poisoned lock is recovered.
    pub(crate) fn lock_slots(&self) -> MutexGuard<'_, [Block; BLOCK_BUFFER_SIZE]> {
        match self.slots.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[inline]
    pub(crate) fn head_index(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn tail_index(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    /// Number of blocks currently planned, modulo capacity.
    pub fn moves_planned(&self) -> usize {
        let head = self.head_index();
        let tail = self.tail_index();
        head.wrapping_sub(tail) & BLOCK_MOD_MASK
    }

    pub fn is_empty(&self) -> bool {
        self.head_index() == self.tail_index()
    }

    pub fn is_full(&self) -> bool {
        next_block_index(self.head_index()) == self.tail_index()
    }

    /// Publish a fully built block. The slot write happens under the lock;
    /// the head advance is the release that makes it visible.
    ///
    /// Returns false (and drops the block) if the ring is full; the caller
    /// is expected to have waited for room first.
    pub(crate) fn push(&self, block: Block) -> bool {
        if self.is_full() {
            return false;
        }
        let head = self.head.load(Ordering::Relaxed);
        {
            let mut slots = self.lock_slots();
            slots[head] = block;
        }
        self.head.store(next_block_index(head), Ordering::Release);
        true
    }

    /// Consumer side: claim the tail block, marking it BUSY, and return a
    /// copy of it. Returns None if the queue is empty or the tail block (or
    /// its successor, when more than one move is planned) still has a stale
    /// trapezoid pending.
    pub fn get_current_block(&self) -> Option<Block> {
        let tail = self.tail_index();
        if tail == self.head_index() {
            return None;
        }
        let mut slots = self.lock_slots();
        // Re-read under the lock; the producer may have published meanwhile
        // but cannot have retired anything.
        if self.moves_planned() > 1 {
            let next = &slots[next_block_index(tail)];
            if slots[tail].flags.contains(BlockFlags::RECALCULATE)
                || next.flags.contains(BlockFlags::RECALCULATE)
            {
                return None;
            }
        } else if slots[tail].flags.contains(BlockFlags::RECALCULATE) {
            return None;
        }
        slots[tail].flags.set(BlockFlags::BUSY);
        Some(slots[tail])
    }

    /// Consumer side: retire the tail block.
    pub fn discard_current_block(&self) {
        let tail = self.tail_index();
        if tail == self.head_index() {
            return;
        }
        {
            let mut slots = self.lock_slots();
            slots[tail].flags.clear(BlockFlags::BUSY);
        }
        self.tail.store(next_block_index(tail), Ordering::Release);
    }

    /// Copy out the queued blocks, oldest first, without claiming anything.
    /// Diagnostic/inspection aid; the consumer contract is
    /// `get_current_block`/`discard_current_block`.
    pub fn snapshot(&self) -> Vec<Block> {
        let head = self.head_index();
        let mut tail = self.tail_index();
        let slots = self.lock_slots();
        let mut out = Vec::with_capacity(self.moves_planned());
        while tail != head {
            out.push(slots[tail]);
            tail = next_block_index(tail);
        }
        out
    }

    /// Emergency flush: drop every queued block (tail catches up to head).
    pub fn flush(&self) {
        let head = self.head_index();
        {
            let mut slots = self.lock_slots();
            for slot in slots.iter_mut() {
                slot.flags.clear(BlockFlags::BUSY);
            }
        }
        self.tail.store(head, Ordering::Release);
    }
}
