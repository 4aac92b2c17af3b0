//! # Helix OS Frontswap Subsystem
//!
//! A pluggable far-memory layer between the swap core and a backing store.
//! Pages being evicted are offered to a backend (remote memory, a
//! compressed pool, another tier) before they reach the swap device, and
//! pages being faulted back in are fetched from it when it holds them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        HELIX FRONTSWAP LAYER                            │
//! │                                                                         │
//! │   swap-out / reclaim              page fault (swap-in)                  │
//! │          │                              │                               │
//! │          ▼                              ▼                               │
//! │  ┌───────────────┐   route   ┌──────────────────────────────────────┐  │
//! │  │OffloadScheduler│◀────────│              Frontswap               │  │
//! │  └───────────────┘           │  store  store_on_core  poll_store    │  │
//! │                              │  load   load_async     poll_load     │  │
//! │  ┌───────────────┐   test    │  peek_load  invalidate_page/_area    │  │
//! │  │PresenceTracker│           │  shrink                              │  │
//! │  │   (lock-free) │◀─────────│                                      │  │
//! │  └───────────────┘           └───────┬───────────────┬──────────────┘  │
//! │                                      │               │                  │
//! │                        ┌─────────────▼───┐   ┌───────▼──────────┐       │
//! │                        │ BackendRegistry │   │  AsyncOpChannel  │       │
//! │                        │ dyn FrontswapOps│──▶│ per-CPU slots    │       │
//! │                        └─────────────────┘   └───────┬──────────┘       │
//! │                                                      │ Ready            │
//! │                                              ┌───────▼──────────────┐   │
//! │                                              │FaultCompletionBridge │   │
//! │                                              │ AddressSpace::populate│  │
//! │                                              └──────────────────────┘   │
//! │                                                                         │
//! │   every component reports into  Arc<SwapMetrics>                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! 1. **Presence**: a presence bit is set if and only if the backend holds a
//!    valid copy of that slot.
//! 2. **One request per CPU**: each CPU has at most one outstanding async
//!    load and one outstanding async store.
//! 3. **Exactly-once completion**: a submitted async request is reported by
//!    exactly one poll, then the slot is idle again.
//! 4. **Never fatal**: every error means "use the primary swap device".

#![cfg_attr(not(test), no_std)]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Backend trait and registry
pub mod backend;

/// Per-CPU async request slots
pub mod channel;

/// Configuration
pub mod config;

/// Error types
pub mod error;

/// Async load completion into the faulting process
pub mod fault;

/// Frontswap entry points
pub mod frontswap;

/// Swap metrics
pub mod metrics;

/// Reclaim offload
pub mod offload;

/// Presence bitmaps
pub mod presence;

/// Lock-free readable cells
pub mod published;

/// Identifiers
pub mod types;

#[cfg(test)]
mod testing;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use backend::{BackendRegistry, FrontswapOps};
pub use channel::{AsyncOpChannel, Completion, SlotStatus};
pub use config::{FrontswapConfig, FrontswapConfigBuilder, MetricsConfig, OffloadConfig};
pub use error::{FrontswapError, FrontswapResult};
pub use fault::{
    AddressSpace, FaultCompletionBridge, FaultContext, FaultFlags, InstallOutcome, PopulateError,
    SwapFault,
};
pub use frontswap::{Frontswap, LoadCompletion, SwapUnuse};
pub use metrics::{CounterKind, CycleClock, PfBits, PfPhase, PfType, PhaseTimer, SwapMetrics, TimeStatKind};
pub use offload::{FreePageSource, OffloadPolicy, OffloadScheduler, ReclaimRoute, ThrottleOutcome};
pub use presence::{PresenceMap, PresenceTracker, SwapDevice};
pub use published::Published;
pub use types::{CpuId, PageFrame, PageHandle, PageOffset, PmdLocation, PteLocation, PteValue, SwapType, VirtAddr};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Page size
pub const PAGE_SIZE: usize = 4096;

/// Page shift
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page-aligned part of an address
pub const PAGE_MASK: u64 = !(PAGE_SIZE as u64 - 1);

/// Maximum number of swap devices
pub const MAX_SWAPFILES: usize = 32;

/// Maximum number of CPUs
pub const MAX_CPUS: usize = 256;

static_assertions::const_assert_eq!(1 << PAGE_SHIFT, PAGE_SIZE);
