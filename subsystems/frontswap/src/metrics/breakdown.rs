//! # Per-Fault Phase Breakdown
//!
//! A fault handler keeps a local [`PhaseTimer`] on its stack and brackets
//! each phase with `start`/`end`:
//!
//! ```text
//!   start(p, t0)   phases[p] -= t0
//!   end(p, t1)     phases[p] += t1      => phases[p] == t1 - t0
//! ```
//!
//! The arithmetic wraps, so the intermediate negative value is harmless and
//! the net is the elapsed cycles. When the fault finishes the timer is
//! folded into the global accumulator of its [`PfType`].

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::clock::CycleClock;

/// Folds stop once a fault type has seen this many faults
pub const MAX_FOLD_COUNT: u64 = 1 << 30;

// =============================================================================
// PHASES AND TYPES
// =============================================================================

/// Named phases of a page fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PfPhase {
    /// Trap into the kernel
    TrapToKernel    = 0,
    /// Lock the page table and read the PTE
    LockGetPte      = 1,
    /// Swap cache lookup
    LookupSwapcache = 2,
    /// Page I/O
    PageIo          = 3,
    /// Memory cgroup charge
    CgroupAccount   = 4,
    /// Direct reclaim
    PageReclaim     = 5,
    /// Set the page map and unlock
    SetPagemapUnlock = 6,
    /// Return to user mode
    RetToUser       = 7,
    /// Whole fault
    TotalPf         = 8,
    /// Deduplicated swap-in
    DedupSwapin     = 9,
    /// Prefetch issue
    Prefetch        = 10,
    /// Poll for an async load
    PollLoad        = 11,
    /// Swap metadata update
    UpdMetadata     = 12,
    /// PTE install
    SetPte          = 13,
    /// Page reference check
    PgCheckRef      = 14,
    /// Unmap attempt
    TryToUnmap      = 15,
    /// TLB flush of dirty pages
    TlbFlushDirty   = 16,
    /// Release the page and remove its mapping
    RlsPgRmMap      = 17,
    /// TLB flush during unmap
    UnmapTlbFlush   = 18,
    /// Swap slot allocation
    AllocSwapSlot   = 19,
    /// Swap cache insertion
    AddToSwapcache  = 20,
    /// Active list shrinking
    ShrinkActiveList = 21,
    /// Backend page read
    ReadPage        = 22,
    /// Backend page write
    WritePage       = 23,
}

impl PfPhase {
    /// Number of phases
    pub const COUNT: usize = 24;

    /// All phases, in report order
    pub const ALL: [Self; Self::COUNT] = [
        Self::TrapToKernel,
        Self::LockGetPte,
        Self::LookupSwapcache,
        Self::PageIo,
        Self::CgroupAccount,
        Self::PageReclaim,
        Self::SetPagemapUnlock,
        Self::RetToUser,
        Self::TotalPf,
        Self::DedupSwapin,
        Self::Prefetch,
        Self::PollLoad,
        Self::UpdMetadata,
        Self::SetPte,
        Self::PgCheckRef,
        Self::TryToUnmap,
        Self::TlbFlushDirty,
        Self::RlsPgRmMap,
        Self::UnmapTlbFlush,
        Self::AllocSwapSlot,
        Self::AddToSwapcache,
        Self::ShrinkActiveList,
        Self::ReadPage,
        Self::WritePage,
    ];

    /// Report label
    pub const fn name(self) -> &'static str {
        match self {
            Self::TrapToKernel => "TRAP_TO_KERNEL",
            Self::LockGetPte => "LOCK_GET_PTE",
            Self::LookupSwapcache => "LOOKUP_SWAPCACHE",
            Self::PageIo => "PAGE_IO",
            Self::CgroupAccount => "CGROUP_ACCOUNT",
            Self::PageReclaim => "PAGE_RECLAIM",
            Self::SetPagemapUnlock => "SET_PAGEMAP_UNLOCK",
            Self::RetToUser => "RET_TO_USER",
            Self::TotalPf => "TOTAL_PF",
            Self::DedupSwapin => "DEDUP_SWAPIN",
            Self::Prefetch => "PREFETCH",
            Self::PollLoad => "POLL_LOAD",
            Self::UpdMetadata => "UPD_METADATA",
            Self::SetPte => "SETPTE",
            Self::PgCheckRef => "PG_CHECK_REF",
            Self::TryToUnmap => "TRY_TO_UNMAP",
            Self::TlbFlushDirty => "TLB_FLUSH_DIRTY",
            Self::RlsPgRmMap => "RLS_PG_RM_MAP",
            Self::UnmapTlbFlush => "UNMAP_TLB_FLUSH",
            Self::AllocSwapSlot => "ALLOC_SWAP_SLOT",
            Self::AddToSwapcache => "ADD_TO_SWAPCACHE",
            Self::ShrinkActiveList => "SHRNK_ACTV_LST",
            Self::ReadPage => "READ_PAGE",
            Self::WritePage => "WRITE_PAGE",
        }
    }
}

static_assertions::const_assert_eq!(PfPhase::WritePage as usize + 1, PfPhase::COUNT);

/// Fault type a breakdown is folded under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PfType {
    /// Swap-in that read from the backend
    Major   = 0,
    /// Swap-in satisfied from the swap cache
    Minor   = 1,
    /// Swap-out
    Swapout = 2,
    /// Every folded fault
    All     = 3,
}

impl PfType {
    /// Number of fault types
    pub const COUNT: usize = 4;

    /// All types, in report order
    pub const ALL: [Self; Self::COUNT] = [Self::Major, Self::Minor, Self::Swapout, Self::All];

    /// Report label
    pub const fn name(self) -> &'static str {
        match self {
            Self::Major => "Major SPF",
            Self::Minor => "Minor SPF",
            Self::Swapout => "Swapout SPF",
            Self::All => "Avg All SPF",
        }
    }
}

bitflags! {
    /// Classification bits attached to a fault record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PfBits: u32 {
        /// The fault touched swap
        const SWAP = 1 << 0;
        /// The page had to be read from the backend
        const MAJOR = 1 << 1;
        /// The record describes a swap-out
        const SWAPOUT = 1 << 2;
    }
}

impl PfBits {
    /// Fault type to fold under, `None` if the fault did not touch swap
    pub fn fault_type(self) -> Option<PfType> {
        if self.contains(Self::SWAPOUT) {
            Some(PfType::Swapout)
        } else if !self.contains(Self::SWAP) {
            None
        } else if self.contains(Self::MAJOR) {
            Some(PfType::Major)
        } else {
            Some(PfType::Minor)
        }
    }
}

// =============================================================================
// PHASE TIMER
// =============================================================================

/// Stack-local phase deltas of one fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimer {
    phases: [u64; PfPhase::COUNT],
}

impl PhaseTimer {
    /// All phases at zero
    pub const fn new() -> Self {
        Self {
            phases: [0; PfPhase::COUNT],
        }
    }

    /// Mark the start of `phase` at `ts`
    #[inline]
    pub fn start(&mut self, phase: PfPhase, ts: u64) {
        let slot = &mut self.phases[phase as usize];
        *slot = slot.wrapping_sub(ts);
    }

    /// Mark the end of `phase` at `ts`
    #[inline]
    pub fn end(&mut self, phase: PfPhase, ts: u64) {
        let slot = &mut self.phases[phase as usize];
        *slot = slot.wrapping_add(ts);
    }

    /// Mark the start of `phase` now
    #[inline]
    pub fn start_now(&mut self, phase: PfPhase, clock: &dyn CycleClock) {
        self.start(phase, clock.now());
    }

    /// Mark the end of `phase` now
    #[inline]
    pub fn end_now(&mut self, phase: PfPhase, clock: &dyn CycleClock) {
        self.end(phase, clock.now());
    }

    /// Net cycles recorded for `phase`
    #[inline]
    pub fn get(&self, phase: PfPhase) -> u64 {
        self.phases[phase as usize]
    }

    /// Raw phase array
    pub fn phases(&self) -> &[u64; PfPhase::COUNT] {
        &self.phases
    }
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BREAKDOWN ACCUMULATORS
// =============================================================================

/// Global accumulators of one fault type
#[derive(Debug)]
pub struct PfBreakdown {
    phases: [AtomicU64; PfPhase::COUNT],
    count: AtomicU64,
}

impl PfBreakdown {
    const fn new() -> Self {
        Self {
            phases: [const { AtomicU64::new(0) }; PfPhase::COUNT],
            count: AtomicU64::new(0),
        }
    }

    /// Folded fault count
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Accumulated cycles of `phase`
    pub fn total(&self, phase: PfPhase) -> u64 {
        self.phases[phase as usize].load(Ordering::Relaxed)
    }

    /// Mean cycles of `phase`, `None` without faults
    pub fn mean(&self, phase: PfPhase) -> Option<u64> {
        let count = self.count();
        (count != 0).then(|| self.total(phase) / count)
    }

    fn fold(&self, timer: &PhaseTimer) -> bool {
        if self.count() >= MAX_FOLD_COUNT {
            return false;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        for (acc, delta) in self.phases.iter().zip(timer.phases.iter()) {
            acc.fetch_add(*delta, Ordering::Relaxed);
        }
        true
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        for acc in &self.phases {
            acc.store(0, Ordering::Relaxed);
        }
    }
}

/// Breakdown accumulators for every [`PfType`]
#[derive(Debug)]
pub struct PfBreakdownSet {
    types: [PfBreakdown; PfType::COUNT],
}

impl PfBreakdownSet {
    /// All accumulators empty
    pub const fn new() -> Self {
        Self {
            types: [const { PfBreakdown::new() }; PfType::COUNT],
        }
    }

    /// Accumulators of `ty`
    pub fn get(&self, ty: PfType) -> &PfBreakdown {
        &self.types[ty as usize]
    }

    /// Fold `timer` into `ty`, returns whether it was counted
    ///
    /// Skipped once `ty` has reached [`MAX_FOLD_COUNT`] faults.
    pub fn fold(&self, ty: PfType, timer: &PhaseTimer) -> bool {
        self.get(ty).fold(timer)
    }

    /// Reset every accumulator
    pub fn reset(&self) {
        for ty in &self.types {
            ty.reset();
        }
    }
}

impl Default for PfBreakdownSet {
    fn default() -> Self {
        Self::new()
    }
}
