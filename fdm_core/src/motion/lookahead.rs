//! Two-pass look-ahead over the planner ring.
//!
//! The reverse pass walks newest-to-oldest relaxing entry speeds so every
//! block can decelerate into its successor; the forward pass walks
//! oldest-to-newest capping entry speeds to what the predecessor can
//! actually accelerate to; the refresh pass recomputes trapezoids for every
//! pair whose junction changed. The tail block and its immediate successor
//! are never speed-adjusted: the step generator may latch them at any
//! moment.

use super::block::{Block, BlockFlags};
use super::queue::{BLOCK_BUFFER_SIZE, BlockQueue, next_block_index, prev_block_index};
use super::trapezoid::{calculate_trapezoid, max_allowable_speed};

type Slots = [Block; BLOCK_BUFFER_SIZE];

/// Re-plan every junction still flagged RECALCULATE.
///
/// Runs reverse pass, forward pass, then the trapezoid refresh, all inside
/// the queue critical section. Busy blocks are read but never written.
pub(crate) fn recalculate(queue: &BlockQueue) {
    let mut slots = queue.lock_slots();
    let head = queue.head_index();
    let tail = queue.tail_index();
    reverse_pass(&mut slots, head, tail);
    forward_pass(&mut slots, head, tail);
    recalculate_trapezoids(&mut slots, head, tail);
}

fn moves_planned(head: usize, tail: usize) -> usize {
    head.wrapping_sub(tail) & (BLOCK_BUFFER_SIZE - 1)
}

/// Newest-to-oldest. Only worth running with more than three blocks queued;
/// stops early at a START_FROM_FULL_HALT junction (everything before it is
/// already optimal) and never descends into tail or tail+1.
fn reverse_pass(slots: &mut Slots, head: usize, tail: usize) {
    if moves_planned(head, tail) <= 3 {
        return;
    }
    // tail is (or may become) the running block and tail+1 is welded to it;
    // tail+2 is the last index the pass may touch.
    let endnr = next_block_index(next_block_index(tail));
    let mut blocknr = prev_block_index(head);
    loop {
        let next_idx = blocknr;
        blocknr = prev_block_index(blocknr);
        if slots[blocknr]
            .flags
            .contains(BlockFlags::START_FROM_FULL_HALT)
        {
            break;
        }
        reverse_pass_kernel(slots, blocknr, next_idx);
        if blocknr == endnr {
            break;
        }
    }
}

fn reverse_pass_kernel(slots: &mut Slots, current: usize, next: usize) {
    let next_entry = slots[next].entry_speed;
    let cur = &mut slots[current];
    if cur.is_busy() {
        return;
    }
    let max_entry = cur.max_entry_speed;
    if cur.entry_speed != max_entry {
        // A nominal-length block reaches its junction speed regardless;
        // otherwise the entry is bounded by what can decelerate into the
        // successor within this block's length.
        cur.entry_speed =
            if cur.flags.contains(BlockFlags::NOMINAL_LENGTH) || max_entry <= next_entry {
                max_entry
            } else {
                max_entry.min(max_allowable_speed(
                    -cur.acceleration,
                    next_entry,
                    cur.millimeters,
                ))
            };
        cur.flags.set(BlockFlags::RECALCULATE);
    }
}

/// Oldest-to-newest, three-index window.
fn forward_pass(slots: &mut Slots, head: usize, tail: usize) {
    let mut window: [Option<usize>; 3] = [None, None, None];
    let mut b = tail;
    while b != head {
        window[0] = window[1];
        window[1] = window[2];
        window[2] = Some(b);
        if let (Some(prev), Some(cur)) = (window[0], window[1]) {
            forward_pass_kernel(slots, prev, cur);
        }
        b = next_block_index(b);
    }
    if let (Some(prev), Some(cur)) = (window[1], window[2]) {
        forward_pass_kernel(slots, prev, cur);
    }
}

fn forward_pass_kernel(slots: &mut Slots, previous: usize, current: usize) {
    let prev = slots[previous];
    // A nominal-length predecessor always delivers its junction speed.
    if prev.flags.contains(BlockFlags::NOMINAL_LENGTH) {
        return;
    }
    if prev.entry_speed < slots[current].entry_speed {
        let entry = slots[current].entry_speed.min(max_allowable_speed(
            -prev.acceleration,
            prev.entry_speed,
            prev.millimeters,
        ));
        let cur = &mut slots[current];
        if cur.entry_speed != entry && !cur.is_busy() {
            cur.entry_speed = entry;
            cur.flags.set(BlockFlags::RECALCULATE);
        }
    }
}

/// Recompute the trapezoid of every block adjacent to a changed junction.
/// The newest block always exits at zero speed.
fn recalculate_trapezoids(slots: &mut Slots, head: usize, tail: usize) {
    let mut block_index = tail;
    let mut next_idx: Option<usize> = None;
    while block_index != head {
        let cur_idx = next_idx;
        next_idx = Some(block_index);
        if let Some(ci) = cur_idx
            && let Some(ni) = next_idx
        {
            let cur_stale = slots[ci].flags.contains(BlockFlags::RECALCULATE);
            let next_stale = slots[ni].flags.contains(BlockFlags::RECALCULATE);
            if cur_stale || next_stale {
                let entry = slots[ci].entry_speed;
                let exit = slots[ni].entry_speed;
                calculate_trapezoid(&mut slots[ci], entry, exit);
            }
        }
        block_index = next_block_index(block_index);
    }
    if let Some(ni) = next_idx {
        let entry = slots[ni].entry_speed;
        calculate_trapezoid(&mut slots[ni], entry, 0.0);
    }
}
