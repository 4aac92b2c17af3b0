//! # Presence Tracking
//!
//! One bit per swap slot, per active swap device, recording whether the
//! backend currently holds a valid copy of that slot.
//!
//! ```text
//!   devices[MAX_SWAPFILES]
//!   ┌────────┬────────┬────────┬─────┐
//!   │ swap0  │  None  │ swap2  │ ... │
//!   └───┬────┴────────┴───┬────┴─────┘
//!       ▼                 ▼
//!   ┌────────────┐    ┌────────────┐
//!   │ 0110 0001… │    │ 0000 1000… │   one AtomicU64 per 64 slots
//!   └────────────┘    └────────────┘
//! ```
//!
//! Bit operations are atomic per bit. The swap core guarantees that no two
//! CPUs work on the same slot at once, so no ordering is needed between a
//! bit and the backend operation it describes beyond the single atomic.
//! A bit must be cleared before its slot is handed out again.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FrontswapError, FrontswapResult};
use crate::published::Published;
use crate::types::{PageHandle, PageOffset, SwapType};
use crate::MAX_SWAPFILES;

const BITS_PER_WORD: u64 = u64::BITS as u64;

// =============================================================================
// PRESENCE MAP
// =============================================================================

/// Atomic bitmap sized to a swap device's slot count
pub struct PresenceMap {
    words: Box<[AtomicU64]>,
    slots: u64,
}

impl PresenceMap {
    /// Allocate a cleared map for `slots` swap slots
    pub fn new(slots: u64) -> Self {
        let nr_words = slots.div_ceil(BITS_PER_WORD) as usize;
        let words = (0..nr_words).map(|_| AtomicU64::new(0)).collect();
        Self { words, slots }
    }

    /// Number of slots covered
    pub fn slots(&self) -> u64 {
        self.slots
    }

    #[inline]
    fn locate(&self, offset: PageOffset) -> Option<(&AtomicU64, u64)> {
        let bit = offset.raw();
        if bit >= self.slots {
            return None;
        }
        let word = &self.words[(bit / BITS_PER_WORD) as usize];
        Some((word, 1u64 << (bit % BITS_PER_WORD)))
    }

    /// Set a bit, returns the previous value
    #[inline]
    pub fn set(&self, offset: PageOffset) -> FrontswapResult<bool> {
        let (word, mask) = self
            .locate(offset)
            .ok_or(FrontswapError::OffsetOutOfRange)?;
        Ok(word.fetch_or(mask, Ordering::AcqRel) & mask != 0)
    }

    /// Clear a bit, returns the previous value
    ///
    /// Out-of-range offsets are never set, so clearing them is a no-op.
    #[inline]
    pub fn clear(&self, offset: PageOffset) -> bool {
        match self.locate(offset) {
            Some((word, mask)) => word.fetch_and(!mask, Ordering::AcqRel) & mask != 0,
            None => false,
        }
    }

    /// Test a bit
    #[inline]
    pub fn test(&self, offset: PageOffset) -> bool {
        match self.locate(offset) {
            Some((word, mask)) => word.load(Ordering::Acquire) & mask != 0,
            None => false,
        }
    }

    /// Clear every bit
    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Offsets whose bit is set, in ascending order
    ///
    /// Each word is read once, so bits changing during the walk may or may
    /// not be reported.
    pub fn iter_present(&self) -> impl Iterator<Item = PageOffset> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, word)| {
            let mut bits = word.load(Ordering::Acquire);
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = u64::from(bits.trailing_zeros());
                bits &= bits - 1;
                Some(PageOffset::new(idx as u64 * BITS_PER_WORD + bit))
            })
        })
    }

    /// Count set bits
    pub fn count_ones(&self) -> u64 {
        self.words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum()
    }
}

impl core::fmt::Debug for PresenceMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PresenceMap")
            .field("slots", &self.slots)
            .field("present", &self.count_ones())
            .finish()
    }
}

// =============================================================================
// SWAP DEVICE
// =============================================================================

/// An active swap device and the presence map it owns
#[derive(Debug)]
pub struct SwapDevice {
    swap_type: SwapType,
    map: PresenceMap,
}

impl SwapDevice {
    /// Swap type of the device
    pub fn swap_type(&self) -> SwapType {
        self.swap_type
    }

    /// Presence map of the device
    pub fn map(&self) -> &PresenceMap {
        &self.map
    }
}

// =============================================================================
// PRESENCE TRACKER
// =============================================================================

/// Table of active swap devices and their presence maps
///
/// Each entry is a [`Published`] cell: swapon and swapoff write it, the hot
/// path reads it with one load and touches a single atomic word. A device
/// taken offline stays allocated until [`purge`](Self::purge), since a
/// concurrent operation may still be looking at its map.
pub struct PresenceTracker {
    devices: [Published<SwapDevice>; MAX_SWAPFILES],
}

impl PresenceTracker {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            devices: [const { Published::new() }; MAX_SWAPFILES],
        }
    }

    /// Attach `map` to `swap_type` (swapon)
    pub fn init(&self, swap_type: SwapType, map: PresenceMap) -> FrontswapResult<()> {
        let cell = self
            .devices
            .get(swap_type.index())
            .ok_or(FrontswapError::InvalidDevice)?;
        let slots = map.slots();
        cell.try_install(SwapDevice { swap_type, map })
            .map_err(|_| FrontswapError::DeviceActive)?;

        log::info!("frontswap: {} active, {} slots", swap_type, slots);
        Ok(())
    }

    /// Detach the device (swapoff)
    ///
    /// Returns the detached device, which stays readable until the next
    /// [`purge`](Self::purge).
    pub fn deactivate(&self, swap_type: SwapType) -> Option<&SwapDevice> {
        let device = self.devices.get(swap_type.index())?.retire();
        if device.is_some() {
            log::info!("frontswap: {} deactivated", swap_type);
        }
        device
    }

    /// Free the maps of deactivated devices
    pub fn purge(&mut self) {
        for cell in self.devices.iter_mut() {
            cell.purge();
        }
    }

    /// Active device for `swap_type`
    #[inline]
    pub fn device(&self, swap_type: SwapType) -> Option<&SwapDevice> {
        self.devices.get(swap_type.index())?.get()
    }

    /// Is the swap type active?
    pub fn is_active(&self, swap_type: SwapType) -> bool {
        self.devices
            .get(swap_type.index())
            .is_some_and(Published::is_set)
    }

    /// Check that `handle` names a slot of an active device
    pub fn validate(&self, handle: PageHandle) -> FrontswapResult<()> {
        let dev = self
            .device(handle.swap_type)
            .ok_or(FrontswapError::InvalidDevice)?;
        if handle.offset.raw() < dev.map.slots() {
            Ok(())
        } else {
            Err(FrontswapError::OffsetOutOfRange)
        }
    }

    /// Does the backend hold `handle`?
    #[inline]
    pub fn test(&self, handle: PageHandle) -> bool {
        self.device(handle.swap_type)
            .is_some_and(|dev| dev.map.test(handle.offset))
    }

    /// Mark `handle` as held by the backend, returns the previous value
    #[inline]
    pub fn set(&self, handle: PageHandle) -> FrontswapResult<bool> {
        self.device(handle.swap_type)
            .ok_or(FrontswapError::InvalidDevice)?
            .map
            .set(handle.offset)
    }

    /// Mark `handle` as no longer held, returns the previous value
    #[inline]
    pub fn clear(&self, handle: PageHandle) -> bool {
        self.device(handle.swap_type)
            .is_some_and(|dev| dev.map.clear(handle.offset))
    }

    /// Clear every bit of a device
    pub fn clear_area(&self, swap_type: SwapType) {
        if let Some(dev) = self.device(swap_type) {
            dev.map.clear_all();
        }
    }

    /// Active devices, in table order
    pub fn active(&self) -> impl Iterator<Item = &SwapDevice> {
        self.devices.iter().filter_map(Published::get)
    }

    /// Active swap types, in table order
    pub fn active_types(&self) -> Vec<SwapType> {
        self.active().map(|dev| dev.swap_type).collect()
    }

    /// Pages held by the backend across all active devices
    pub fn curr_pages(&self) -> u64 {
        self.active().map(|dev| dev.map.count_ones()).sum()
    }
}

impl core::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("active", &self.active_types())
            .field("curr_pages", &self.curr_pages())
            .finish()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
