//! Expiry scheduling for idle connections
//!
//! The schedule is a min-heap of `(last_active, generation, handle)` entries plus a side
//! index holding the generation considered authoritative for each live connection. A
//! refresh never mutates a queued entry in place (a binary heap has no safe decrease-key);
//! it allocates the next generation and pushes a fresh entry, leaving the old one behind
//! as garbage. Sweeps discard garbage lazily: an entry popped whose generation no longer
//! matches the authoritative one was superseded and is dropped without being reported.
//!
//! Generations come from a counter that never repeats, so a stale entry can never be
//! mistaken for a current one, even when a slab slot is reused for a new connection that
//! was refreshed at the very same timestamp.
//!
//! This keeps refreshes at O(log n) and sweeps at amortized O(log n) per entry popped,
//! with no full-table scans.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::connection::ConnectionHandle;

/// One scheduled expiry check
///
/// Field order matters: the derived ordering is `last_active` first, so the heap yields
/// the longest-quiet connection before anything younger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryEntry {
    last_active: u64,
    generation: u64,
    handle: ConnectionHandle,
}

#[derive(Debug, Default)]
pub(crate) struct ExpiryQueue {
    /// Pending checks, oldest first; may contain superseded entries
    queue: BinaryHeap<Reverse<ExpiryEntry>>,
    /// Authoritative generation per live connection
    current: FxHashMap<ConnectionHandle, u64>,
    /// Source of never-reused generation numbers
    clock: u64,
}

impl ExpiryQueue {
    /// Record that `handle` was refreshed at `last_active`, superseding all earlier entries
    pub(crate) fn refresh(&mut self, handle: ConnectionHandle, last_active: u64) {
        self.clock += 1;
        let generation = self.clock;
        self.current.insert(handle, generation);
        self.queue.push(Reverse(ExpiryEntry {
            last_active,
            generation,
            handle,
        }));
    }

    /// Forget a connection that was removed outside the sweep (an accepted `Close`)
    ///
    /// Entries already queued for it become garbage and are discarded when encountered.
    pub(crate) fn remove(&mut self, handle: ConnectionHandle) {
        self.current.remove(&handle);
    }

    /// Pop the next connection that has been quiet for strictly longer than `timeout`
    ///
    /// `now` and `timeout` are in nanoseconds. Superseded entries encountered on the way
    /// are dropped silently. Returns `None` as soon as the oldest genuine entry is within
    /// the timeout, since everything behind it in the heap is younger still. A yielded
    /// handle has its authoritative entry removed, so each eviction is reported exactly
    /// once; the caller is expected to drop the rest of the connection state.
    pub(crate) fn next_expired(&mut self, now: u64, timeout: u64) -> Option<ConnectionHandle> {
        while let Some(&Reverse(entry)) = self.queue.peek() {
            if self.current.get(&entry.handle).copied() != Some(entry.generation) {
                // Superseded by a later refresh, or removed; discard and keep looking.
                self.queue.pop();
                continue;
            }
            if now.saturating_sub(entry.last_active) <= timeout {
                return None;
            }
            self.queue.pop();
            self.current.remove(&entry.handle);
            return Some(entry.handle);
        }
        None
    }

    /// Number of connections with an authoritative entry
    pub(crate) fn len(&self) -> usize {
        self.current.len()
    }

    /// Number of queued entries, including superseded garbage
    #[cfg(test)]
    fn queued(&self) -> usize {
        self.queue.len()
    }
}
