//! Test fixtures: an in-memory backend, a fake address space, a free page
//! source and a swap-in host.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::backend::FrontswapOps;
use crate::channel::Completion;
use crate::error::{FrontswapError, FrontswapResult};
use crate::fault::{AddressSpace, PopulateError, SwapFault};
use crate::frontswap::SwapUnuse;
use crate::offload::FreePageSource;
use crate::types::{CpuId, PageFrame, PageHandle, PmdLocation, SwapType, VirtAddr};

// =============================================================================
// MEMORY BACKEND
// =============================================================================

#[derive(Debug)]
struct PendingLoad {
    handle: PageHandle,
    frame: PageFrame,
    done: Completion,
}

#[derive(Debug)]
struct PendingStore {
    handle: PageHandle,
    data: Vec<u8>,
    done: Completion,
}

/// Backend keeping pages in a map
///
/// Async requests stay pending until `poll_load`/`poll_store` (or
/// `complete_loads`/`complete_stores`) runs for the issuing CPU.
#[derive(Debug)]
pub struct MemoryBackend {
    name: &'static str,
    pages: Mutex<BTreeMap<PageHandle, Vec<u8>>>,
    frames: Mutex<BTreeMap<PageFrame, Vec<u8>>>,
    pending_loads: Mutex<Vec<PendingLoad>>,
    pending_stores: Mutex<Vec<PendingStore>>,
    fail_stores: AtomicBool,
    fail_loads: AtomicBool,
    refuse_async: AtomicBool,
    inits: Mutex<Vec<SwapType>>,
    invalidated_pages: Mutex<Vec<PageHandle>>,
    invalidated_areas: Mutex<Vec<SwapType>>,
    store_cores: Mutex<Vec<CpuId>>,
}

impl MemoryBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pages: Mutex::new(BTreeMap::new()),
            frames: Mutex::new(BTreeMap::new()),
            pending_loads: Mutex::new(Vec::new()),
            pending_stores: Mutex::new(Vec::new()),
            fail_stores: AtomicBool::new(false),
            fail_loads: AtomicBool::new(false),
            refuse_async: AtomicBool::new(false),
            inits: Mutex::new(Vec::new()),
            invalidated_pages: Mutex::new(Vec::new()),
            invalidated_areas: Mutex::new(Vec::new()),
            store_cores: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_refuse_async(&self, refuse: bool) {
        self.refuse_async.store(refuse, Ordering::SeqCst);
    }

    pub fn holds(&self, handle: PageHandle) -> bool {
        self.pages.lock().contains_key(&handle)
    }

    pub fn page(&self, handle: PageHandle) -> Option<Vec<u8>> {
        self.pages.lock().get(&handle).cloned()
    }

    pub fn frame(&self, frame: PageFrame) -> Option<Vec<u8>> {
        self.frames.lock().get(&frame).cloned()
    }

    pub fn inits(&self) -> Vec<SwapType> {
        self.inits.lock().clone()
    }

    pub fn invalidated_pages(&self) -> Vec<PageHandle> {
        self.invalidated_pages.lock().clone()
    }

    pub fn invalidated_areas(&self) -> Vec<SwapType> {
        self.invalidated_areas.lock().clone()
    }

    pub fn store_cores(&self) -> Vec<CpuId> {
        self.store_cores.lock().clone()
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads.lock().len()
    }

    /// Finish every pending load issued from `cpu`
    pub fn complete_loads(&self, cpu: CpuId) {
        let mine = {
            let mut pending = self.pending_loads.lock();
            let (mine, rest): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.done.cpu() == cpu);
            *pending = rest;
            mine
        };
        for load in mine {
            let data = self.page(load.handle);
            match data {
                Some(data) if !self.fail_loads.load(Ordering::SeqCst) => {
                    self.frames.lock().insert(load.frame, data);
                    load.done.succeed();
                },
                _ => load.done.fail(),
            }
        }
    }

    /// Finish every pending store issued from `cpu`
    pub fn complete_stores(&self, cpu: CpuId) {
        let mine = {
            let mut pending = self.pending_stores.lock();
            let (mine, rest): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.done.cpu() == cpu);
            *pending = rest;
            mine
        };
        for store in mine {
            if self.fail_stores.load(Ordering::SeqCst) {
                store.done.fail();
            } else {
                self.pages.lock().insert(store.handle, store.data);
                store.done.succeed();
            }
        }
    }
}

impl FrontswapOps for MemoryBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&self, swap_type: SwapType) {
        self.inits.lock().push(swap_type);
    }

    fn store(&self, handle: PageHandle, page: &[u8]) -> FrontswapResult<()> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(FrontswapError::BackendFailed);
        }
        self.pages.lock().insert(handle, page.to_vec());
        Ok(())
    }

    fn store_on_core(
        &self,
        handle: PageHandle,
        page: &[u8],
        core: CpuId,
        done: Completion,
    ) -> FrontswapResult<()> {
        if self.refuse_async.load(Ordering::SeqCst) {
            return Err(FrontswapError::BackendFailed);
        }
        self.store_cores.lock().push(core);
        self.pending_stores.lock().push(PendingStore {
            handle,
            data: page.to_vec(),
            done,
        });
        Ok(())
    }

    fn poll_store(&self, cpu: CpuId) {
        self.complete_stores(cpu);
    }

    fn load(&self, handle: PageHandle, page: &mut [u8]) -> FrontswapResult<()> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(FrontswapError::BackendFailed);
        }
        let pages = self.pages.lock();
        let data = pages.get(&handle).ok_or(FrontswapError::BackendFailed)?;
        let len = data.len().min(page.len());
        page[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn load_async(
        &self,
        handle: PageHandle,
        frame: PageFrame,
        done: Completion,
    ) -> FrontswapResult<()> {
        if self.refuse_async.load(Ordering::SeqCst) {
            return Err(FrontswapError::BackendFailed);
        }
        self.pending_loads
            .lock()
            .push(PendingLoad { handle, frame, done });
        Ok(())
    }

    fn poll_load(&self, cpu: CpuId) {
        self.complete_loads(cpu);
    }

    fn invalidate_page(&self, handle: PageHandle) {
        self.pages.lock().remove(&handle);
        self.invalidated_pages.lock().push(handle);
    }

    fn invalidate_area(&self, swap_type: SwapType) {
        self.pages.lock().retain(|h, _| h.swap_type != swap_type);
        self.invalidated_areas.lock().push(swap_type);
    }
}

// =============================================================================
// FAKE ADDRESS SPACE
// =============================================================================

/// Address space recording populate calls
#[derive(Debug)]
pub struct FakeAddressSpace {
    id: u64,
    pmd_present: AtomicBool,
    write_locked: AtomicBool,
    readers: AtomicU32,
    populate_result: Mutex<Result<(), PopulateError>>,
    populated: Mutex<Vec<SwapFault>>,
}

impl FakeAddressSpace {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            pmd_present: AtomicBool::new(true),
            write_locked: AtomicBool::new(false),
            readers: AtomicU32::new(0),
            populate_result: Mutex::new(Ok(())),
            populated: Mutex::new(Vec::new()),
        }
    }

    pub fn set_pmd_present(&self, present: bool) {
        self.pmd_present.store(present, Ordering::SeqCst);
    }

    pub fn set_write_locked(&self, locked: bool) {
        self.write_locked.store(locked, Ordering::SeqCst);
    }

    pub fn set_populate_result(&self, result: Result<(), PopulateError>) {
        *self.populate_result.lock() = result;
    }

    pub fn populated(&self) -> Vec<SwapFault> {
        self.populated.lock().clone()
    }

    pub fn readers(&self) -> u32 {
        self.readers.load(Ordering::SeqCst)
    }
}

impl AddressSpace for FakeAddressSpace {
    fn id(&self) -> u64 {
        self.id
    }

    fn try_read_lock(&self) -> bool {
        if self.write_locked.load(Ordering::SeqCst) {
            return false;
        }
        self.readers.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn read_unlock(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    fn find_pmd(&self, addr: VirtAddr) -> Option<PmdLocation> {
        self.pmd_present
            .load(Ordering::SeqCst)
            .then(|| PmdLocation::new(addr.as_u64() & !((1 << 21) - 1)))
    }

    fn populate(&self, fault: &SwapFault) -> Result<(), PopulateError> {
        assert!(self.readers() > 0, "populate without the read lock");
        let result = *self.populate_result.lock();
        if result.is_ok() {
            self.populated.lock().push(*fault);
        }
        result
    }
}

// =============================================================================
// FREE PAGES
// =============================================================================

/// Free page counter that may grow on every read
#[derive(Debug)]
pub struct FreePages {
    pages: AtomicU64,
    step: u64,
}

impl FreePages {
    pub fn new(pages: u64) -> Self {
        Self::rising(pages, 0)
    }

    /// Report `pages`, then `pages + step`, and so on
    pub fn rising(pages: u64, step: u64) -> Self {
        Self {
            pages: AtomicU64::new(pages),
            step,
        }
    }
}

impl FreePageSource for FreePages {
    fn free_pages(&self) -> u64 {
        self.pages.fetch_add(self.step, Ordering::SeqCst)
    }
}

// =============================================================================
// SWAP UNUSE
// =============================================================================

/// Host that "swaps in" pages by recording them
#[derive(Debug, Default)]
pub struct FakeUnuse {
    unused: Mutex<Vec<PageHandle>>,
    fail_after: Mutex<Option<usize>>,
}

impl FakeUnuse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every page after the first `n`
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn unused(&self) -> Vec<PageHandle> {
        self.unused.lock().clone()
    }
}

impl SwapUnuse for FakeUnuse {
    fn unuse(&self, handle: PageHandle) -> FrontswapResult<()> {
        let mut unused = self.unused.lock();
        if (*self.fail_after.lock()).is_some_and(|n| unused.len() >= n) {
            return Err(FrontswapError::BackendFailed);
        }
        unused.push(handle);
        Ok(())
    }
}
