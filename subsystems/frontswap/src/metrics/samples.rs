//! Raw per-fault latency samples.
//!
//! A fixed-capacity ring of `SAMPLE_CHANNELS` parallel `u32` arrays. The
//! write index comes from a single global `fetch_add`; indexes past the
//! capacity are dropped, but the logical count keeps advancing so the
//! number of lost samples can be derived.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::breakdown::{PfPhase, PhaseTimer};

/// Number of sample channels
pub const SAMPLE_CHANNELS: usize = 6;

/// Bytes per stored sample
pub const SAMPLE_WIDTH: usize = core::mem::size_of::<u32>();

/// Largest supported capacity per channel
pub const MAX_SAMPLE_CAPACITY: usize = 100_000_000;

/// Channel assignments
pub mod channel {
    /// Page I/O
    pub const PAGE_IO: usize = 0;
    /// Memory cgroup charge
    pub const CGROUP_ACCOUNT: usize = 1;
    /// PTE lock, swap cache lookup, set-pagemap/unlock
    pub const PTE_AND_SWAPCACHE: usize = 2;
    /// Whole fault
    pub const TOTAL: usize = 3;
}

/// Fixed-capacity multi-channel sample buffer
pub struct SampleRing {
    channels: [Box<[AtomicU32]>; SAMPLE_CHANNELS],
    capacity: usize,
    cursor: AtomicU64,
}

impl SampleRing {
    /// Allocate `capacity` entries per channel, clamped to
    /// [`MAX_SAMPLE_CAPACITY`]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_SAMPLE_CAPACITY);
        let channels = core::array::from_fn(|_| (0..capacity).map(|_| AtomicU32::new(0)).collect());
        Self {
            channels,
            capacity,
            cursor: AtomicU64::new(0),
        }
    }

    /// Entries per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record the derived channels of `timer`, returns whether it was stored
    pub fn record(&self, timer: &PhaseTimer) -> bool {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        let Ok(index) = usize::try_from(index) else {
            return false;
        };
        if index >= self.capacity {
            return false;
        }

        let pte_and_swapcache = timer
            .get(PfPhase::LockGetPte)
            .wrapping_add(timer.get(PfPhase::LookupSwapcache))
            .wrapping_add(timer.get(PfPhase::SetPagemapUnlock));
        let values = [
            (channel::PAGE_IO, timer.get(PfPhase::PageIo)),
            (channel::CGROUP_ACCOUNT, timer.get(PfPhase::CgroupAccount)),
            (channel::PTE_AND_SWAPCACHE, pte_and_swapcache),
            (channel::TOTAL, timer.get(PfPhase::TotalPf)),
        ];
        for (ch, value) in values {
            let value = u32::try_from(value).unwrap_or(u32::MAX);
            self.channels[ch][index].store(value, Ordering::Relaxed);
        }
        true
    }

    /// Samples issued, including dropped ones
    pub fn logical_count(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Samples actually stored
    pub fn stored_count(&self) -> usize {
        usize::try_from(self.logical_count())
            .unwrap_or(usize::MAX)
            .min(self.capacity)
    }

    /// Copy of channel `ch`, `None` if out of range
    pub fn snapshot(&self, ch: usize) -> Option<Vec<u32>> {
        let channel = self.channels.get(ch)?;
        Some(channel.iter().map(|v| v.load(Ordering::Relaxed)).collect())
    }

    /// Channel `ch` as a little-endian blob of `capacity * SAMPLE_WIDTH` bytes
    pub fn blob(&self, ch: usize) -> Option<Vec<u8>> {
        let channel = self.channels.get(ch)?;
        let mut out = Vec::with_capacity(self.capacity * SAMPLE_WIDTH);
        for value in channel.iter() {
            out.extend_from_slice(&value.load(Ordering::Relaxed).to_le_bytes());
        }
        Some(out)
    }

    /// Rewind the logical count
    ///
    /// Old values stay in place until overwritten.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SampleRing")
            .field("capacity", &self.capacity)
            .field("logical_count", &self.logical_count())
            .finish()
    }
}
