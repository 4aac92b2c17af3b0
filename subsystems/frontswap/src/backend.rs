//! # Backend Registry
//!
//! The frontswap backend is a single injected strategy. Registering a new
//! one supersedes the previous one. Operations already running finish on
//! the backend they started with.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::channel::Completion;
use crate::error::{FrontswapError, FrontswapResult};
use crate::published::Published;
use crate::types::{CpuId, PageFrame, PageHandle, SwapType};

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Operations a frontswap backend provides
///
/// Page buffers are borrowed for the duration of the call only. An async
/// operation must copy what it needs before returning and report its
/// outcome through the [`Completion`] it was handed.
pub trait FrontswapOps: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// A swap device became active
    fn init(&self, swap_type: SwapType);

    /// Store a page synchronously
    fn store(&self, handle: PageHandle, page: &[u8]) -> FrontswapResult<()>;

    /// Store a page, executing on `core`
    ///
    /// Returning an error refuses the request; the completion is then
    /// dropped and the slot rolled back.
    fn store_on_core(
        &self,
        handle: PageHandle,
        page: &[u8],
        core: CpuId,
        done: Completion,
    ) -> FrontswapResult<()>;

    /// Drive store completions for `cpu`
    ///
    /// Called in a loop while a poller waits on the store slot of `cpu`.
    fn poll_store(&self, _cpu: CpuId) {}

    /// Load a page synchronously
    fn load(&self, handle: PageHandle, page: &mut [u8]) -> FrontswapResult<()>;

    /// Start fetching a page into `frame`
    fn load_async(&self, handle: PageHandle, frame: PageFrame, done: Completion)
        -> FrontswapResult<()>;

    /// Drive load completions for `cpu`
    ///
    /// Called in a loop while a poller waits on the load slot of `cpu`.
    fn poll_load(&self, _cpu: CpuId) {}

    /// Drive load completions for `cpu` without waiting
    fn peek_load(&self, _cpu: CpuId) {}

    /// Drop the copy of one page
    fn invalidate_page(&self, handle: PageHandle);

    /// Drop every page of a device
    fn invalidate_area(&self, swap_type: SwapType);
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Active backend slot and global enable gate
///
/// Data operations borrow the backend straight out of a [`Published`]
/// cell: no lock, no reference count. A superseded backend is retired and
/// kept alive until [`purge`](Self::purge), since an operation already in
/// progress may still be calling into it.
pub struct BackendRegistry {
    backend: Published<Arc<dyn FrontswapOps>>,
    enabled: AtomicBool,
}

impl BackendRegistry {
    /// Create an empty, disabled registry
    pub const fn new() -> Self {
        Self {
            backend: Published::new(),
            enabled: AtomicBool::new(false),
        }
    }

    /// Install `ops`, returning the backend it supersedes
    pub fn register(&self, ops: Arc<dyn FrontswapOps>) -> Option<Arc<dyn FrontswapOps>> {
        log::info!("frontswap: registering backend '{}'", ops.name());
        let previous = self.backend.replace(ops).map(Arc::clone);
        if let Some(prev) = &previous {
            log::info!("frontswap: backend '{}' superseded", prev.name());
        }
        previous
    }

    /// Release superseded backends
    pub fn purge(&mut self) {
        self.backend.purge();
    }

    /// Enable or disable the frontend
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            log::info!(
                "frontswap: {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    /// Is the frontend enabled?
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Backend to use for a data operation
    ///
    /// Fails with `Unavailable` while disabled or with no backend.
    #[inline]
    pub fn current(&self) -> FrontswapResult<&dyn FrontswapOps> {
        if !self.is_enabled() {
            return Err(FrontswapError::Unavailable);
        }
        self.registered().ok_or(FrontswapError::Unavailable)
    }

    /// Registered backend, regardless of the gate
    #[inline]
    pub fn registered(&self) -> Option<&dyn FrontswapOps> {
        self.backend.get().map(|ops| &**ops)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backend", &self.registered().map(|b| b.name()))
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
