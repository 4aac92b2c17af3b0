//! # Fault Completion Bridge
//!
//! Finishes an async page fetch by mapping the fetched frame into the
//! process that asked for it, without waiting for that process to fault
//! again.
//!
//! ```text
//!   poll_load(cpu) ── Ready ──▶ FaultCompletionBridge::install()
//!                                 │
//!                                 ├─ try_read_lock(mm) ── contended ──▶ drop
//!                                 ├─ find_pmd(vaddr)   ── gone ───────▶ drop
//!                                 ├─ build SwapFault {WRITE|REMOTE|ALLOW_RETRY|RETRY_NOWAIT}
//!                                 ├─ mm.populate(&fault)
//!                                 └─ read_unlock(mm)
//! ```
//!
//! A dropped install is a lost optimization only: the page stays in the
//! swap cache and the next minor fault maps it.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::types::{PageFrame, PmdLocation, PteLocation, PteValue, VirtAddr};

// =============================================================================
// FAULT FLAGS
// =============================================================================

bitflags! {
    /// Page fault flags passed to the populate operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultFlags: u32 {
        /// Fault was a write access
        const WRITE = 1 << 0;
        /// Fault is a write on an existing mapping
        const MKWRITE = 1 << 1;
        /// The fault handler may drop the address space lock and retry
        const ALLOW_RETRY = 1 << 2;
        /// Do not wait when a retry would be needed
        const RETRY_NOWAIT = 1 << 3;
        /// The fault may be interrupted by a fatal signal
        const KILLABLE = 1 << 4;
        /// Second attempt after a retry
        const TRIED = 1 << 5;
        /// Fault originated from user mode
        const USER = 1 << 6;
        /// Fault is handled on behalf of another context
        const REMOTE = 1 << 7;
    }
}

impl FaultFlags {
    /// Flags used when installing a page fetched by an async load
    pub const ASYNC_INSTALL: Self = Self::WRITE
        .union(Self::REMOTE)
        .union(Self::ALLOW_RETRY)
        .union(Self::RETRY_NOWAIT);
}

// =============================================================================
// HOST CAPABILITY
// =============================================================================

/// Errors returned by the host populate operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateError {
    /// The host would have had to wait; the install was skipped
    Retry,
    /// The mapping changed under us (PTE no longer matches)
    Raced,
    /// Out of memory while allocating page-table pages
    OutOfMemory,
    /// Any other fault error
    Fault,
}

impl fmt::Display for PopulateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "Populate needs retry"),
            Self::Raced => write!(f, "PTE changed"),
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::Fault => write!(f, "Fault error"),
        }
    }
}

/// A process address space, as seen by the completion bridge
///
/// Implemented by the host memory manager. Locking must be non-blocking:
/// `try_read_lock` returns `false` instead of waiting on a writer.
pub trait AddressSpace: Send + Sync {
    /// Identifier for diagnostics
    fn id(&self) -> u64;

    /// Take the address space lock in shared mode without waiting
    fn try_read_lock(&self) -> bool;

    /// Release a shared lock taken with `try_read_lock`
    fn read_unlock(&self);

    /// Find the page middle directory entry covering `addr`
    fn find_pmd(&self, addr: VirtAddr) -> Option<PmdLocation>;

    /// Map the page described by `fault`
    ///
    /// Called with the shared lock held. Must honor
    /// [`FaultFlags::RETRY_NOWAIT`].
    fn populate(&self, fault: &SwapFault) -> Result<(), PopulateError>;
}

/// Where an async load should land once it completes
#[derive(Clone)]
pub struct FaultContext {
    /// Faulting virtual address
    pub vaddr: VirtAddr,
    /// Address space of the faulting process
    pub mm: Arc<dyn AddressSpace>,
    /// Location of the PTE that was swapped out
    pub pte: PteLocation,
    /// PTE value observed at fault time
    pub orig_pte: PteValue,
    /// Flags for the populate call
    pub flags: FaultFlags,
}

impl FaultContext {
    /// Context with the async-install flags
    pub fn new(
        vaddr: VirtAddr,
        mm: Arc<dyn AddressSpace>,
        pte: PteLocation,
        orig_pte: PteValue,
    ) -> Self {
        Self {
            vaddr,
            mm,
            pte,
            orig_pte,
            flags: FaultFlags::ASYNC_INSTALL,
        }
    }
}

impl fmt::Debug for FaultContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultContext")
            .field("vaddr", &self.vaddr)
            .field("mm", &self.mm.id())
            .field("pte", &self.pte)
            .field("orig_pte", &self.orig_pte)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Fault descriptor handed to [`AddressSpace::populate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapFault {
    /// Page-aligned faulting address
    pub address: VirtAddr,
    /// Frame holding the fetched page
    pub frame: PageFrame,
    /// Directory entry covering the address
    pub pmd: PmdLocation,
    /// PTE to populate
    pub pte: PteLocation,
    /// PTE value observed at fault time
    pub orig_pte: PteValue,
    /// Fault flags
    pub flags: FaultFlags,
}

// =============================================================================
// BRIDGE
// =============================================================================

/// Result of an install attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The page is mapped
    Installed,
    /// The directory level is gone (process tearing down)
    Stale,
    /// The address space lock is held exclusively
    Contended,
    /// The host refused to populate
    Rejected(PopulateError),
}

impl InstallOutcome {
    /// Was the page mapped?
    pub const fn is_installed(self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// Install statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Pages mapped
    pub installed: u64,
    /// Installs dropped on a vanished directory
    pub stale: u64,
    /// Installs dropped on a contended lock
    pub contended: u64,
    /// Installs refused by the host
    pub rejected: u64,
}

/// Shared lock on an address space, released on drop
struct ReadGuard<'a> {
    mm: &'a dyn AddressSpace,
}

impl<'a> ReadGuard<'a> {
    fn try_new(mm: &'a dyn AddressSpace) -> Option<Self> {
        mm.try_read_lock().then_some(Self { mm })
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.mm.read_unlock();
    }
}

/// Maps pages fetched by async loads into their faulting process
#[derive(Debug, Default)]
pub struct FaultCompletionBridge {
    installed: AtomicU64,
    stale: AtomicU64,
    contended: AtomicU64,
    rejected: AtomicU64,
}

impl FaultCompletionBridge {
    /// Create a bridge
    pub const fn new() -> Self {
        Self {
            installed: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Map `frame` at the address recorded in `ctx`
    pub fn install(&self, frame: PageFrame, ctx: &FaultContext) -> InstallOutcome {
        let outcome = self.try_install(frame, ctx);
        let counter = match outcome {
            InstallOutcome::Installed => &self.installed,
            InstallOutcome::Stale => &self.stale,
            InstallOutcome::Contended => &self.contended,
            InstallOutcome::Rejected(_) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if !outcome.is_installed() {
            log::trace!(
                "frontswap: install of {} into mm {} dropped: {:?}",
                ctx.vaddr,
                ctx.mm.id(),
                outcome
            );
        }
        outcome
    }

    fn try_install(&self, frame: PageFrame, ctx: &FaultContext) -> InstallOutcome {
        let mm = &*ctx.mm;
        let Some(_guard) = ReadGuard::try_new(mm) else {
            return InstallOutcome::Contended;
        };

        let address = ctx.vaddr.page_align_down();
        let Some(pmd) = mm.find_pmd(address) else {
            return InstallOutcome::Stale;
        };

        let fault = SwapFault {
            address,
            frame,
            pmd,
            pte: ctx.pte,
            orig_pte: ctx.orig_pte,
            flags: ctx.flags | FaultFlags::RETRY_NOWAIT,
        };

        match mm.populate(&fault) {
            Ok(()) => InstallOutcome::Installed,
            Err(err) => InstallOutcome::Rejected(err),
        }
    }

    /// Install statistics
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            installed: self.installed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
