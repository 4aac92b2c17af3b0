//! # Frontswap Frontend
//!
//! The entry points the swap core calls. Every operation is best-effort:
//! an error tells the caller to use the primary swap device instead.
//!
//! ```text
//!   swap-out ──▶ store / store_on_core ──▶ backend ──▶ presence.set
//!                          │
//!                          └─ poll_store(cpu): wait on the cpu's store slot
//!
//!   swap-in  ──▶ presence.test ── clear ──▶ Miss
//!                    │ set
//!                    ├─▶ load ──────────────▶ backend (sync)
//!                    └─▶ load_async(cpu) ───▶ backend ──▶ Completion
//!                                                          │
//!                poll_load(cpu) ◀── Ready/Failed ──────────┘
//!                    └─▶ FaultCompletionBridge::install
//! ```
//!
//! Async stores complete on the store slot of the CPU that issued them,
//! whatever core the backend executes them on.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{BackendRegistry, FrontswapOps};
use crate::channel::{AsyncOpChannel, AsyncRequest, AsyncSlot, Completed, Outcome, SlotStatus};
use crate::config::FrontswapConfig;
use crate::error::{FrontswapError, FrontswapResult};
use crate::fault::{BridgeStats, FaultCompletionBridge, FaultContext, InstallOutcome};
use crate::metrics::{CounterKind, CycleClock, SwapMetrics, TimeStatKind};
use crate::offload::OffloadScheduler;
use crate::presence::{PresenceMap, PresenceTracker};
use crate::types::{CpuId, PageFrame, PageHandle, SwapType};

/// An outstanding async load
#[derive(Debug)]
struct LoadRequest {
    frame: PageFrame,
    fault: FaultContext,
    submitted_at: u64,
}

/// An outstanding async store
#[derive(Debug)]
struct StoreRequest {
    /// The slot held a page before this store was issued
    duplicate: bool,
    submitted_at: u64,
}

/// Host capability that pulls a swapped page back into memory
///
/// Used by [`Frontswap::shrink`]. The frontend drops its own copy once the
/// host reports success.
pub trait SwapUnuse {
    /// Bring `handle` back from swap
    fn unuse(&self, handle: PageHandle) -> FrontswapResult<()>;
}

/// A consumed async load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCompletion {
    /// Page that was fetched
    pub handle: PageHandle,
    /// Frame it was fetched into
    pub frame: PageFrame,
    /// What the fault completion bridge did with it
    pub install: InstallOutcome,
}

/// The frontswap layer
pub struct Frontswap {
    registry: BackendRegistry,
    presence: PresenceTracker,
    loads: AsyncOpChannel<LoadRequest>,
    stores: AsyncOpChannel<StoreRequest>,
    bridge: FaultCompletionBridge,
    scheduler: OffloadScheduler,
    metrics: Arc<SwapMetrics>,
    writethrough: AtomicBool,
    exclusive_gets: AtomicBool,
}

impl Frontswap {
    /// Create a disabled frontend with no backend
    pub fn new(config: &FrontswapConfig, clock: Arc<dyn CycleClock>) -> Self {
        let metrics = Arc::new(SwapMetrics::new(&config.metrics, clock));
        log::info!(
            "frontswap: {} cpus, writethrough {}, exclusive gets {}",
            config.nr_cpus,
            config.writethrough,
            config.exclusive_gets
        );
        Self {
            registry: BackendRegistry::new(),
            presence: PresenceTracker::new(),
            loads: AsyncOpChannel::new(config.nr_cpus),
            stores: AsyncOpChannel::new(config.nr_cpus),
            bridge: FaultCompletionBridge::new(),
            scheduler: OffloadScheduler::new(&config.offload, Arc::clone(&metrics)),
            metrics,
            writethrough: AtomicBool::new(config.writethrough),
            exclusive_gets: AtomicBool::new(config.exclusive_gets),
        }
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Register `ops` and enable the frontend
    ///
    /// The backend is initialized for every device already active. Returns
    /// the backend it supersedes.
    pub fn register_backend(&self, ops: Arc<dyn FrontswapOps>) -> Option<Arc<dyn FrontswapOps>> {
        for swap_type in self.presence.active_types() {
            ops.init(swap_type);
        }
        let previous = self.registry.register(ops);
        self.registry.set_enabled(true);
        previous
    }

    /// Enable or disable the frontend
    pub fn set_enabled(&self, enabled: bool) {
        self.registry.set_enabled(enabled);
    }

    /// Is the frontend enabled?
    pub fn is_enabled(&self) -> bool {
        self.registry.is_enabled()
    }

    /// Activate a swap device with `map` as its presence bitmap
    pub fn init(&self, swap_type: SwapType, map: PresenceMap) -> FrontswapResult<()> {
        self.presence.init(swap_type, map)?;
        if let Some(backend) = self.registry.registered() {
            backend.init(swap_type);
        }
        Ok(())
    }

    /// Deactivate a swap device
    ///
    /// The presence bitmap is released by the next [`purge`](Self::purge).
    pub fn deactivate(&self, swap_type: SwapType) -> bool {
        self.presence.deactivate(swap_type).is_some()
    }

    /// Free the bitmaps of deactivated devices and superseded backends
    pub fn purge(&mut self) {
        self.presence.purge();
        self.registry.purge();
    }

    /// Turn writethrough mode on or off
    pub fn set_writethrough(&self, on: bool) {
        self.writethrough.store(on, Ordering::Release);
        log::info!("frontswap: writethrough {}", if on { "on" } else { "off" });
    }

    /// Is writethrough mode on?
    pub fn writethrough(&self) -> bool {
        self.writethrough.load(Ordering::Acquire)
    }

    /// Turn exclusive gets on or off
    pub fn set_exclusive_gets(&self, on: bool) {
        self.exclusive_gets.store(on, Ordering::Release);
        log::info!("frontswap: exclusive gets {}", if on { "on" } else { "off" });
    }

    /// Are exclusive gets on?
    pub fn exclusive_gets(&self) -> bool {
        self.exclusive_gets.load(Ordering::Acquire)
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Does the backend hold `handle`?
    #[inline]
    pub fn test(&self, handle: PageHandle) -> bool {
        self.presence.test(handle)
    }

    /// Pages held by the backend across all devices
    pub fn curr_pages(&self) -> u64 {
        self.presence.curr_pages()
    }

    /// Bring pages back through `host` until at most `target_pages` remain
    ///
    /// Devices are drained in table order, lowest offset first. Stops early
    /// when the host refuses a page. Returns the number of pages brought
    /// back.
    pub fn shrink(&self, target_pages: u64, host: &dyn SwapUnuse) -> u64 {
        let total = self.curr_pages();
        let Some(mut excess) = total.checked_sub(target_pages).filter(|&n| n > 0) else {
            return 0;
        };

        let mut unused = 0;
        'devices: for device in self.presence.active() {
            for offset in device.map().iter_present() {
                if excess == 0 {
                    break 'devices;
                }
                let handle = PageHandle::new(device.swap_type(), offset);
                if !device.map().test(offset) {
                    continue;
                }
                if let Err(err) = host.unuse(handle) {
                    log::debug!("frontswap: shrink stopped at {}: {}", handle, err);
                    break 'devices;
                }
                self.invalidate_page(handle);
                excess -= 1;
                unused += 1;
            }
        }

        log::info!(
            "frontswap: shrink to {} brought back {} of {} pages",
            target_pages,
            unused,
            total
        );
        unused
    }

    // =========================================================================
    // Stores
    // =========================================================================

    /// Store `page` synchronously
    ///
    /// In writethrough mode a successful store returns `WriteThrough`.
    pub fn store(&self, handle: PageHandle, page: &[u8]) -> FrontswapResult<()> {
        let backend = self.registry.current()?;
        self.presence.validate(handle)?;
        let duplicate = self.presence.test(handle);

        let start = self.metrics.now();
        let result = backend.store(handle, page);
        self.metrics
            .accumulate_since(TimeStatKind::BackendWriteLatency, start);

        match result {
            Ok(()) => self.stored(backend, handle),
            Err(err) => {
                if duplicate {
                    self.drop_stale(backend, handle);
                }
                log::trace!("frontswap: store of {} failed: {}", handle, err);
                Err(FrontswapError::BackendFailed)
            },
        }
    }

    /// Submit an async store executed on `core`, completing on `cpu`'s slot
    ///
    /// Any previous copy stops being visible at submission; the presence
    /// bit is set again when [`poll_store`](Self::poll_store) observes the
    /// completion.
    pub fn store_on_core(
        &self,
        cpu: CpuId,
        handle: PageHandle,
        page: &[u8],
        core: CpuId,
    ) -> FrontswapResult<()> {
        let backend = self.registry.current()?;
        let slot = self.stores.slot(cpu)?;
        self.presence.validate(handle)?;
        let duplicate = self.presence.test(handle);

        let done = slot.claim(AsyncRequest {
            handle,
            context: StoreRequest {
                duplicate,
                submitted_at: self.metrics.now(),
            },
        })?;
        let generation = done.generation();
        if duplicate {
            self.presence.clear(handle);
        }

        match backend.store_on_core(handle, page, core, done) {
            Ok(()) => {
                slot.publish(generation);
                Ok(())
            },
            Err(err) => {
                slot.abandon(generation);
                if duplicate {
                    backend.invalidate_page(handle);
                }
                log::trace!("frontswap: {} refused store of {}: {}", cpu, handle, err);
                Err(FrontswapError::BackendFailed)
            },
        }
    }

    /// Wait for the outstanding async store of `cpu`
    ///
    /// Returns immediately when nothing is outstanding. A completed store
    /// reports like [`store`](Self::store) would.
    pub fn poll_store(&self, cpu: CpuId) -> FrontswapResult<()> {
        let slot = self.stores.slot(cpu)?;
        if slot.status() == SlotStatus::Idle {
            return Ok(());
        }
        let backend = self.registry.registered().ok_or(FrontswapError::Unavailable)?;

        let completed = self.wait(slot, || backend.poll_store(cpu));
        let AsyncRequest { handle, context } = completed.request;
        self.metrics
            .accumulate_since(TimeStatKind::BackendWriteLatency, context.submitted_at);

        match completed.outcome {
            Outcome::Ready => self.stored(backend, handle),
            Outcome::Failed => {
                if context.duplicate {
                    backend.invalidate_page(handle);
                }
                log::trace!("frontswap: async store of {} failed", handle);
                Err(FrontswapError::BackendFailed)
            },
        }
    }

    fn stored(&self, backend: &dyn FrontswapOps, handle: PageHandle) -> FrontswapResult<()> {
        if let Err(err) = self.presence.set(handle) {
            // Device went away under the store
            backend.invalidate_page(handle);
            return Err(err);
        }
        self.metrics.inc(CounterKind::SwapOut);
        if self.writethrough() {
            return Err(FrontswapError::WriteThrough);
        }
        Ok(())
    }

    fn drop_stale(&self, backend: &dyn FrontswapOps, handle: PageHandle) {
        self.presence.clear(handle);
        backend.invalidate_page(handle);
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Load a page synchronously into `page`
    ///
    /// Returns `Miss` without touching the backend when the presence bit is
    /// clear.
    pub fn load(&self, handle: PageHandle, page: &mut [u8]) -> FrontswapResult<()> {
        let backend = self.registry.current()?;
        if !self.presence.test(handle) {
            return Err(FrontswapError::Miss);
        }

        let start = self.metrics.now();
        let result = backend.load(handle, page);
        self.metrics
            .accumulate_since(TimeStatKind::BackendReadLatency, start);

        if let Err(err) = result {
            log::trace!("frontswap: load of {} failed: {}", handle, err);
            return Err(FrontswapError::BackendFailed);
        }
        self.metrics.inc(CounterKind::OnDemandSwapIn);
        if self.exclusive_gets() {
            self.drop_stale(backend, handle);
        }
        Ok(())
    }

    /// Start fetching `handle` into `frame` on behalf of the fault in `fault`
    pub fn load_async(
        &self,
        cpu: CpuId,
        handle: PageHandle,
        frame: PageFrame,
        fault: FaultContext,
    ) -> FrontswapResult<()> {
        let backend = self.registry.current()?;
        let slot = self.loads.slot(cpu)?;
        if !self.presence.test(handle) {
            return Err(FrontswapError::Miss);
        }

        let done = slot.claim(AsyncRequest {
            handle,
            context: LoadRequest {
                frame,
                fault,
                submitted_at: self.metrics.now(),
            },
        })?;
        let generation = done.generation();

        match backend.load_async(handle, frame, done) {
            Ok(()) => {
                slot.publish(generation);
                Ok(())
            },
            Err(err) => {
                slot.abandon(generation);
                log::trace!("frontswap: {} refused load of {}: {}", cpu, handle, err);
                Err(FrontswapError::BackendFailed)
            },
        }
    }

    /// Wait for the outstanding async load of `cpu` and install the page
    ///
    /// Each submission is reported exactly once; polling an idle slot
    /// returns `NoRequest`.
    pub fn poll_load(&self, cpu: CpuId) -> FrontswapResult<LoadCompletion> {
        let slot = self.loads.slot(cpu)?;
        if slot.status() == SlotStatus::Idle {
            return Err(FrontswapError::NoRequest);
        }
        let backend = self.registry.registered().ok_or(FrontswapError::Unavailable)?;

        let completed = self.wait(slot, || backend.poll_load(cpu));
        let AsyncRequest { handle, context } = completed.request;
        self.metrics
            .accumulate_since(TimeStatKind::BackendReadLatency, context.submitted_at);

        match completed.outcome {
            Outcome::Ready => {
                self.metrics.inc(CounterKind::OnDemandSwapIn);
                let install = self.bridge.install(context.frame, &context.fault);
                Ok(LoadCompletion {
                    handle,
                    frame: context.frame,
                    install,
                })
            },
            Outcome::Failed => {
                log::trace!("frontswap: async load of {} failed", handle);
                Err(FrontswapError::BackendFailed)
            },
        }
    }

    /// Status of `cpu`'s load slot, without consuming it
    pub fn peek_load(&self, cpu: CpuId) -> FrontswapResult<SlotStatus> {
        let slot = self.loads.slot(cpu)?;
        if let Some(backend) = self.registry.registered() {
            backend.peek_load(cpu);
        }
        Ok(slot.status())
    }

    /// Spin on `slot`, driving the backend with `progress`, until it completes
    fn wait<C>(&self, slot: &AsyncSlot<C>, progress: impl Fn()) -> Completed<C> {
        let start = self.metrics.now();
        let completed = loop {
            if let Some(completed) = slot.try_consume() {
                break completed;
            }
            progress();
            core::hint::spin_loop();
        };
        self.metrics
            .accumulate_since(TimeStatKind::CompletionPollLatency, start);
        completed
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Forget one page
    ///
    /// Works while disabled, so a freed slot never keeps a stale bit.
    pub fn invalidate_page(&self, handle: PageHandle) {
        self.presence.clear(handle);
        if let Some(backend) = self.registry.registered() {
            backend.invalidate_page(handle);
        }
    }

    /// Forget every page of a device, keeping the device active
    pub fn invalidate_area(&self, swap_type: SwapType) {
        if !self.presence.is_active(swap_type) {
            return;
        }
        if let Some(backend) = self.registry.registered() {
            backend.invalidate_area(swap_type);
        }
        self.presence.clear_area(swap_type);
        log::debug!("frontswap: {} invalidated", swap_type);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Metrics context
    pub fn metrics(&self) -> &Arc<SwapMetrics> {
        &self.metrics
    }

    /// Reclaim offload scheduler
    pub fn scheduler(&self) -> &OffloadScheduler {
        &self.scheduler
    }

    /// Fault completion statistics
    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }
}

impl core::fmt::Debug for Frontswap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frontswap")
            .field("registry", &self.registry)
            .field("cpus", &self.loads.len())
            .field("curr_pages", &self.curr_pages())
            .field("writethrough", &self.writethrough())
            .field("exclusive_gets", &self.exclusive_gets())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultFlags;
    use crate::metrics::ManualClock;
    use crate::testing::{FakeAddressSpace, FakeUnuse, MemoryBackend};
    use crate::types::{PageOffset, PteLocation, PteValue, VirtAddr};
    use crate::PAGE_SIZE;
    use alloc::vec;

    const DEV: SwapType = SwapType::new(3);

    fn handle(offset: u64) -> PageHandle {
        PageHandle::new(DEV, PageOffset::new(offset))
    }

    fn frontswap(nr_cpus: usize) -> (Frontswap, Arc<MemoryBackend>) {
        let config = FrontswapConfig::builder().nr_cpus(nr_cpus).build();
        let fs = Frontswap::new(&config, Arc::new(ManualClock::new()));
        fs.init(DEV, PresenceMap::new(1024)).unwrap();
        let backend = Arc::new(MemoryBackend::new("mem"));
        fs.register_backend(backend.clone());
        (fs, backend)
    }

    fn fault(mm: &Arc<FakeAddressSpace>) -> FaultContext {
        FaultContext::new(
            VirtAddr::new(0x7f00_0000_2042),
            mm.clone(),
            PteLocation::new(0x1000),
            PteValue::new(0x5),
        )
    }

    #[test]
    fn test_fresh_device_holds_nothing() {
        let (fs, _) = frontswap(1);
        for offset in 0..1024 {
            assert!(!fs.test(handle(offset)));
        }
        assert_eq!(fs.curr_pages(), 0);
    }

    #[test]
    fn test_store_then_invalidate_page() {
        let (fs, backend) = frontswap(1);
        let page = vec![0xab; PAGE_SIZE];

        fs.store(handle(5), &page).unwrap();
        assert!(fs.test(handle(5)));
        assert!(backend.holds(handle(5)));
        assert_eq!(fs.curr_pages(), 1);

        fs.invalidate_page(handle(5));
        assert!(!fs.test(handle(5)));
        assert!(!backend.holds(handle(5)));

        // idempotent
        fs.invalidate_page(handle(5));
        assert!(!fs.test(handle(5)));
    }

    #[test]
    fn test_invalidate_area_keeps_device() {
        let (fs, backend) = frontswap(1);
        let page = vec![1; PAGE_SIZE];
        fs.store(handle(1), &page).unwrap();
        fs.store(handle(2), &page).unwrap();

        fs.invalidate_area(DEV);
        assert!(!fs.test(handle(1)));
        assert!(!fs.test(handle(2)));
        assert_eq!(backend.invalidated_areas(), vec![DEV]);

        fs.store(handle(1), &page).unwrap();
        assert!(fs.test(handle(1)));
    }

    #[test]
    fn test_load_round_trip_and_miss() {
        let (fs, backend) = frontswap(1);
        let page: Vec<u8> = (0..PAGE_SIZE).map(|i| i as u8).collect();
        fs.store(handle(9), &page).unwrap();

        let mut out = vec![0; PAGE_SIZE];
        fs.load(handle(9), &mut out).unwrap();
        assert_eq!(out, page);
        assert!(fs.test(handle(9)));

        assert_eq!(fs.load(handle(10), &mut out), Err(FrontswapError::Miss));

        backend.set_fail_loads(true);
        assert_eq!(
            fs.load(handle(9), &mut out),
            Err(FrontswapError::BackendFailed)
        );

        let counters = fs.metrics().counters();
        assert_eq!(counters.get(CounterKind::OnDemandSwapIn), 1);
        assert_eq!(counters.get(CounterKind::SwapOut), 1);
    }

    #[test]
    fn test_disabled_gate_is_unavailable() {
        let (fs, backend) = frontswap(1);
        let page = vec![0; PAGE_SIZE];
        fs.store(handle(4), &page).unwrap();
        fs.set_enabled(false);

        assert_eq!(fs.store(handle(5), &page), Err(FrontswapError::Unavailable));
        let mut out = vec![0; PAGE_SIZE];
        assert_eq!(fs.load(handle(4), &mut out), Err(FrontswapError::Unavailable));
        assert!(FrontswapError::Unavailable.is_fallback());

        fs.invalidate_page(handle(4));
        assert!(!fs.test(handle(4)));
        assert!(!backend.holds(handle(4)));
    }

    #[test]
    fn test_no_backend_is_unavailable() {
        let fs = Frontswap::new(&FrontswapConfig::default(), Arc::new(ManualClock::new()));
        fs.init(DEV, PresenceMap::new(8)).unwrap();
        fs.set_enabled(true);
        assert_eq!(fs.store(handle(0), &[0; 8]), Err(FrontswapError::Unavailable));
    }

    #[test]
    fn test_store_rejects_bad_handles() {
        let (fs, _) = frontswap(1);
        let page = vec![0; PAGE_SIZE];
        assert_eq!(
            fs.store(handle(1024), &page),
            Err(FrontswapError::OffsetOutOfRange)
        );
        assert_eq!(
            fs.store(PageHandle::from_raw(7, 0), &page),
            Err(FrontswapError::InvalidDevice)
        );
    }

    #[test]
    fn test_register_initializes_active_devices() {
        let config = FrontswapConfig::default();
        let fs = Frontswap::new(&config, Arc::new(ManualClock::new()));
        fs.init(SwapType::new(0), PresenceMap::new(8)).unwrap();
        fs.init(DEV, PresenceMap::new(8)).unwrap();
        assert!(!fs.is_enabled());

        let first = Arc::new(MemoryBackend::new("first"));
        assert!(fs.register_backend(first.clone()).is_none());
        assert!(fs.is_enabled());
        assert_eq!(first.inits(), vec![SwapType::new(0), DEV]);

        fs.init(SwapType::new(5), PresenceMap::new(8)).unwrap();
        assert_eq!(first.inits().len(), 3);

        let previous = fs.register_backend(Arc::new(MemoryBackend::new("second")));
        assert_eq!(previous.map(|b| b.name() == "first"), Some(true));
    }

    #[test]
    fn test_deactivate_drops_bitmap() {
        let (fs, _) = frontswap(1);
        fs.store(handle(3), &[0; 16]).unwrap();
        assert!(fs.deactivate(DEV));
        assert!(!fs.test(handle(3)));
        assert!(!fs.deactivate(DEV));
        assert_eq!(
            fs.init(DEV, PresenceMap::new(16)),
            Ok(())
        );
        assert!(!fs.test(handle(3)));
    }

    #[test]
    fn test_writethrough_still_marks_present() {
        let (fs, backend) = frontswap(1);
        fs.set_writethrough(true);
        assert_eq!(
            fs.store(handle(6), &[7; 32]),
            Err(FrontswapError::WriteThrough)
        );
        assert!(fs.test(handle(6)));
        assert!(backend.holds(handle(6)));
        assert!(FrontswapError::WriteThrough.is_fallback());
    }

    #[test]
    fn test_exclusive_gets_drop_copy() {
        let (fs, backend) = frontswap(1);
        fs.set_exclusive_gets(true);
        fs.store(handle(8), &[3; 32]).unwrap();

        let mut out = [0u8; 32];
        fs.load(handle(8), &mut out).unwrap();
        assert_eq!(out, [3; 32]);
        assert!(!fs.test(handle(8)));
        assert!(!backend.holds(handle(8)));
        assert_eq!(fs.load(handle(8), &mut out), Err(FrontswapError::Miss));
    }

    #[test]
    fn test_failed_duplicate_store_drops_old_copy() {
        let (fs, backend) = frontswap(1);
        fs.store(handle(2), &[1; 32]).unwrap();
        backend.set_fail_stores(true);

        assert_eq!(
            fs.store(handle(2), &[2; 32]),
            Err(FrontswapError::BackendFailed)
        );
        assert!(!fs.test(handle(2)));
        assert!(!backend.holds(handle(2)));
        assert_eq!(backend.invalidated_pages(), vec![handle(2)]);
    }

    #[test]
    fn test_failed_fresh_store_leaves_nothing() {
        let (fs, backend) = frontswap(1);
        backend.set_fail_stores(true);
        assert_eq!(
            fs.store(handle(2), &[2; 32]),
            Err(FrontswapError::BackendFailed)
        );
        assert!(!fs.test(handle(2)));
        assert!(backend.invalidated_pages().is_empty());
    }

    #[test]
    fn test_load_async_and_poll_exactly_once() {
        let (fs, backend) = frontswap(2);
        let mm = Arc::new(FakeAddressSpace::new(42));
        let cpu = CpuId::new(1);
        let page = vec![0x5a; PAGE_SIZE];
        fs.store(handle(5), &page).unwrap();

        fs.load_async(cpu, handle(5), PageFrame::new(900), fault(&mm))
            .unwrap();
        assert_eq!(fs.peek_load(cpu), Ok(SlotStatus::Pending));

        let done = fs.poll_load(cpu).unwrap();
        assert_eq!(done.handle, handle(5));
        assert_eq!(done.frame, PageFrame::new(900));
        assert_eq!(done.install, InstallOutcome::Installed);
        assert_eq!(backend.frame(PageFrame::new(900)), Some(page));

        let faults = mm.populated();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].address, VirtAddr::new(0x7f00_0000_2000));
        assert!(faults[0].flags.contains(FaultFlags::ASYNC_INSTALL));

        assert_eq!(fs.peek_load(cpu), Ok(SlotStatus::Idle));
        assert_eq!(fs.poll_load(cpu), Err(FrontswapError::NoRequest));
        assert_eq!(fs.bridge_stats().installed, 1);
        assert_eq!(
            fs.metrics().counters().get(CounterKind::OnDemandSwapIn),
            1
        );
    }

    #[test]
    fn test_load_async_busy_slot_rejected() {
        let (fs, backend) = frontswap(2);
        let mm = Arc::new(FakeAddressSpace::new(1));
        let cpu = CpuId::new(0);
        fs.store(handle(1), &[1; 64]).unwrap();
        fs.store(handle(2), &[2; 64]).unwrap();

        fs.load_async(cpu, handle(1), PageFrame::new(1), fault(&mm))
            .unwrap();
        assert_eq!(
            fs.load_async(cpu, handle(2), PageFrame::new(2), fault(&mm)),
            Err(FrontswapError::SlotBusy)
        );
        assert_eq!(backend.pending_loads(), 1);

        // other cpus are unaffected
        fs.load_async(CpuId::new(1), handle(2), PageFrame::new(2), fault(&mm))
            .unwrap();

        assert!(fs.poll_load(cpu).is_ok());
        assert!(fs.load_async(cpu, handle(1), PageFrame::new(3), fault(&mm)).is_ok());
    }

    #[test]
    fn test_load_async_miss_and_refusal() {
        let (fs, backend) = frontswap(1);
        let mm = Arc::new(FakeAddressSpace::new(1));
        let cpu = CpuId::new(0);
        assert_eq!(
            fs.load_async(cpu, handle(1), PageFrame::new(1), fault(&mm)),
            Err(FrontswapError::Miss)
        );

        fs.store(handle(1), &[1; 64]).unwrap();
        backend.set_refuse_async(true);
        assert_eq!(
            fs.load_async(cpu, handle(1), PageFrame::new(1), fault(&mm)),
            Err(FrontswapError::BackendFailed)
        );
        assert_eq!(fs.peek_load(cpu), Ok(SlotStatus::Idle));
        assert_eq!(
            fs.load_async(CpuId::new(1), handle(1), PageFrame::new(1), fault(&mm)),
            Err(FrontswapError::InvalidCpu)
        );
    }

    #[test]
    fn test_failed_async_load_reported_once() {
        let (fs, backend) = frontswap(1);
        let mm = Arc::new(FakeAddressSpace::new(1));
        let cpu = CpuId::new(0);
        fs.store(handle(1), &[1; 64]).unwrap();
        backend.set_fail_loads(true);

        fs.load_async(cpu, handle(1), PageFrame::new(1), fault(&mm))
            .unwrap();
        assert_eq!(fs.poll_load(cpu), Err(FrontswapError::BackendFailed));
        assert_eq!(fs.poll_load(cpu), Err(FrontswapError::NoRequest));
        assert!(mm.populated().is_empty());
    }

    #[test]
    fn test_async_load_into_torn_down_process() {
        let (fs, _) = frontswap(1);
        let mm = Arc::new(FakeAddressSpace::new(1));
        mm.set_pmd_present(false);
        let cpu = CpuId::new(0);
        fs.store(handle(1), &[1; 64]).unwrap();

        fs.load_async(cpu, handle(1), PageFrame::new(1), fault(&mm))
            .unwrap();
        let done = fs.poll_load(cpu).unwrap();
        assert_eq!(done.install, InstallOutcome::Stale);
        assert!(mm.populated().is_empty());
    }

    #[test]
    fn test_load_completed_from_other_thread() {
        let (fs, backend) = frontswap(1);
        let mm = Arc::new(FakeAddressSpace::new(1));
        let cpu = CpuId::new(0);
        fs.store(handle(11), &[9; 64]).unwrap();
        fs.load_async(cpu, handle(11), PageFrame::new(11), fault(&mm))
            .unwrap();

        std::thread::scope(|s| {
            s.spawn(|| backend.complete_loads(cpu));
        });
        assert_eq!(fs.peek_load(cpu), Ok(SlotStatus::Ready));
        assert!(fs.poll_load(cpu).unwrap().install.is_installed());
    }

    #[test]
    fn test_store_on_core_completes_on_issuing_cpu() {
        let (fs, backend) = frontswap(4);
        let cpu = CpuId::new(2);
        let worker = fs.scheduler().select_core(cpu).unwrap();

        fs.store_on_core(cpu, handle(12), &[4; 64], worker).unwrap();
        assert_eq!(backend.store_cores(), vec![worker]);
        assert!(!fs.test(handle(12)));
        assert_eq!(
            fs.store_on_core(cpu, handle(13), &[4; 64], worker),
            Err(FrontswapError::SlotBusy)
        );

        fs.poll_store(cpu).unwrap();
        assert!(fs.test(handle(12)));
        assert!(backend.holds(handle(12)));
        assert_eq!(fs.metrics().counters().get(CounterKind::SwapOut), 1);

        // idle gate passes straight through
        fs.poll_store(cpu).unwrap();
        fs.store_on_core(cpu, handle(13), &[4; 64], worker).unwrap();
    }

    #[test]
    fn test_store_on_core_failed_duplicate() {
        let (fs, backend) = frontswap(1);
        let cpu = CpuId::new(0);
        fs.store(handle(20), &[1; 64]).unwrap();
        backend.set_fail_stores(true);

        fs.store_on_core(cpu, handle(20), &[2; 64], CpuId::new(31))
            .unwrap();
        assert!(!fs.test(handle(20)));
        assert_eq!(fs.poll_store(cpu), Err(FrontswapError::BackendFailed));
        assert!(!fs.test(handle(20)));
        assert!(!backend.holds(handle(20)));
    }

    #[test]
    fn test_store_on_core_refused_rolls_back() {
        let (fs, backend) = frontswap(1);
        let cpu = CpuId::new(0);
        backend.set_refuse_async(true);
        assert_eq!(
            fs.store_on_core(cpu, handle(1), &[0; 8], CpuId::new(31)),
            Err(FrontswapError::BackendFailed)
        );
        backend.set_refuse_async(false);
        fs.store_on_core(cpu, handle(1), &[0; 8], CpuId::new(31))
            .unwrap();
        fs.poll_store(cpu).unwrap();
        assert!(fs.test(handle(1)));
    }

    #[test]
    fn test_latency_stats_recorded() {
        let (fs, _) = frontswap(1);
        fs.store(handle(1), &[0; 8]).unwrap();
        let mut out = [0u8; 8];
        fs.load(handle(1), &mut out).unwrap();

        let stats = fs.metrics().time_stats();
        assert_eq!(stats.get(TimeStatKind::BackendWriteLatency).count(), 1);
        assert_eq!(stats.get(TimeStatKind::BackendReadLatency).count(), 1);
    }

    #[test]
    fn test_concurrent_stores_distinct_offsets() {
        let (fs, _) = frontswap(4);
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let fs = &fs;
                s.spawn(move || {
                    for off in (t..1024).step_by(4) {
                        fs.store(handle(off), &[t as u8; 16]).unwrap();
                    }
                });
            }
        });
        assert_eq!(fs.curr_pages(), 1024);
        assert_eq!(fs.metrics().counters().get(CounterKind::SwapOut), 1024);
    }

    #[test]
    fn test_shrink_to_target() {
        let (fs, backend) = frontswap(1);
        let other = SwapType::new(0);
        fs.init(other, PresenceMap::new(64)).unwrap();
        for off in [1, 4, 7] {
            fs.store(PageHandle::new(other, PageOffset::new(off)), &[1; 8]).unwrap();
        }
        for off in [2, 3, 5] {
            fs.store(handle(off), &[2; 8]).unwrap();
        }
        assert_eq!(fs.curr_pages(), 6);

        let host = FakeUnuse::new();
        assert_eq!(fs.shrink(2, &host), 4);
        assert_eq!(fs.curr_pages(), 2);
        assert_eq!(
            host.unused(),
            vec![
                PageHandle::new(other, PageOffset::new(1)),
                PageHandle::new(other, PageOffset::new(4)),
                PageHandle::new(other, PageOffset::new(7)),
                handle(2),
            ]
        );
        assert!(!backend.holds(handle(2)));
        assert!(fs.test(handle(3)));
        assert!(fs.test(handle(5)));

        assert_eq!(fs.shrink(2, &host), 0);
        assert_eq!(fs.shrink(10, &host), 0);
    }

    #[test]
    fn test_shrink_stops_on_refusal() {
        let (fs, backend) = frontswap(1);
        for off in 0..5 {
            fs.store(handle(off), &[0; 8]).unwrap();
        }
        let host = FakeUnuse::new();
        host.fail_after(2);

        assert_eq!(fs.shrink(0, &host), 2);
        assert_eq!(fs.curr_pages(), 3);
        assert!(!fs.test(handle(1)));
        assert!(fs.test(handle(2)));
        assert!(backend.holds(handle(2)));
    }

    #[test]
    fn test_purge_after_deactivate() {
        let (mut fs, _) = frontswap(1);
        fs.store(handle(3), &[0; 16]).unwrap();
        assert!(fs.deactivate(DEV));
        fs.register_backend(Arc::new(MemoryBackend::new("second")));
        fs.purge();

        assert!(!fs.test(handle(3)));
        fs.init(DEV, PresenceMap::new(16)).unwrap();
        fs.store(handle(3), &[0; 16]).unwrap();
        assert_eq!(fs.curr_pages(), 1);
    }
}
