//! # Reclaim Offload
//!
//! Routes reclaim work from a requesting core to one of a small set of
//! dedicated worker cores, and throttles reclaim issuance against a free
//! page headroom when the hard limit is on.
//!
//! ```text
//!   requesting cpu ──▶ (cpu / 2) % nr_cores ──▶ cores[i] ──▶ worker
//!
//!   cpu:    0 1 2 3 4 5 6 7 8 9 ...
//!   bucket: 0 0 1 1 2 2 3 3 0 0 ...      (nr_cores = 4)
//! ```
//!
//! Sibling hyperthreads share a bucket, so adjacent requesting cores spread
//! evenly across the dedicated set.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::config::OffloadConfig;
use crate::metrics::{CounterKind, SwapMetrics, TimeStatKind};
use crate::types::CpuId;
use crate::MAX_CPUS;

// =============================================================================
// POLICY
// =============================================================================

/// Runtime-mutable offload policy
#[derive(Debug)]
pub struct OffloadPolicy {
    enabled: AtomicBool,
    hard_limit: AtomicBool,
    headroom: AtomicU32,
    nr_cores: AtomicUsize,
    cores: [AtomicU32; MAX_CPUS],
}

impl OffloadPolicy {
    /// Seed a policy from `config`
    pub fn new(config: &OffloadConfig) -> Self {
        let policy = Self {
            enabled: AtomicBool::new(config.enabled),
            hard_limit: AtomicBool::new(config.hard_limit),
            headroom: AtomicU32::new(config.headroom),
            nr_cores: AtomicUsize::new(0),
            cores: [const { AtomicU32::new(0) }; MAX_CPUS],
        };
        for (slot, core) in policy.cores.iter().zip(config.cores.iter()) {
            slot.store(core.raw(), Ordering::Relaxed);
        }
        let listed = config.cores.len().min(MAX_CPUS);
        policy
            .nr_cores
            .store(config.nr_cores.min(listed), Ordering::Release);
        policy
    }

    /// Is offloading enabled?
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or bypass offloading
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        log::info!("frontswap: reclaim offload {}", if enabled { "on" } else { "off" });
    }

    /// Is the hard limit on?
    pub fn hard_limit(&self) -> bool {
        self.hard_limit.load(Ordering::Acquire)
    }

    /// Turn the hard limit on or off
    ///
    /// Turning it off releases callers waiting in
    /// [`OffloadScheduler::wait_for_headroom`].
    pub fn set_hard_limit(&self, on: bool) {
        self.hard_limit.store(on, Ordering::Release);
        log::info!("frontswap: reclaim hard limit {}", if on { "on" } else { "off" });
    }

    /// Target free pages
    pub fn headroom(&self) -> u32 {
        self.headroom.load(Ordering::Acquire)
    }

    /// Set the target free pages
    pub fn set_headroom(&self, pages: u32) {
        self.headroom.store(pages, Ordering::Release);
        log::info!("frontswap: reclaim headroom {} pages", pages);
    }

    /// Number of dedicated cores in use
    pub fn nr_cores(&self) -> usize {
        self.nr_cores.load(Ordering::Acquire)
    }

    /// Set the number of dedicated cores in use, clamped to `MAX_CPUS`
    pub fn set_nr_cores(&self, nr: usize) {
        let nr = nr.min(MAX_CPUS);
        self.nr_cores.store(nr, Ordering::Release);
        log::info!("frontswap: {} offload cores", nr);
    }

    /// Dedicated core at `idx`
    pub fn core(&self, idx: usize) -> Option<CpuId> {
        self.cores
            .get(idx)
            .map(|c| CpuId::new(c.load(Ordering::Acquire)))
    }

    /// Replace the dedicated core list and count
    ///
    /// The count drops to zero while the list is rewritten, so concurrent
    /// routing falls back to the local path instead of seeing a mix.
    pub fn set_dedicated_cores(&self, cores: &[CpuId]) {
        let nr = cores.len().min(MAX_CPUS);
        self.nr_cores.store(0, Ordering::Release);
        for (slot, core) in self.cores.iter().zip(cores.iter()) {
            slot.store(core.raw(), Ordering::Relaxed);
        }
        self.nr_cores.store(nr, Ordering::Release);
        log::info!("frontswap: {} offload cores installed", nr);
    }

    /// Worker core for `cpu`, `None` without dedicated cores
    #[inline]
    pub fn select_core(&self, cpu: CpuId) -> Option<CpuId> {
        let nr = self.nr_cores();
        if nr == 0 {
            return None;
        }
        self.core((cpu.index() / 2) % nr)
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Source of the current free page count
pub trait FreePageSource {
    /// Free pages right now
    fn free_pages(&self) -> u64;
}

/// Where a reclaim request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimRoute {
    /// On the requesting core
    Local,
    /// On a dedicated worker core
    Offload {
        /// Worker core
        worker: CpuId,
    },
}

/// Result of a headroom wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleOutcome {
    /// Enough free pages, or hard limit off
    NotNeeded,
    /// The caller was held back
    Waited {
        /// Cycles spent waiting
        cycles: u64,
        /// Free page checks performed
        checks: u64,
    },
}

/// Applies an [`OffloadPolicy`] and reports into the metrics context
#[derive(Debug)]
pub struct OffloadScheduler {
    policy: OffloadPolicy,
    metrics: Arc<SwapMetrics>,
}

impl OffloadScheduler {
    /// Create a scheduler
    pub fn new(config: &OffloadConfig, metrics: Arc<SwapMetrics>) -> Self {
        Self {
            policy: OffloadPolicy::new(config),
            metrics,
        }
    }

    /// The policy
    pub fn policy(&self) -> &OffloadPolicy {
        &self.policy
    }

    /// Worker core for `cpu`, regardless of the enabled flag
    pub fn select_core(&self, cpu: CpuId) -> Option<CpuId> {
        self.policy.select_core(cpu)
    }

    /// Decide where a reclaim request from `cpu` runs
    pub fn route(&self, cpu: CpuId) -> ReclaimRoute {
        self.metrics.inc(CounterKind::TotalReclaim);
        if !self.policy.is_enabled() {
            return ReclaimRoute::Local;
        }
        match self.policy.select_core(cpu) {
            Some(worker) => {
                self.metrics.inc(CounterKind::FsReclaim);
                ReclaimRoute::Offload { worker }
            },
            None => ReclaimRoute::Local,
        }
    }

    /// Hold the caller until `source` reports at least the headroom
    ///
    /// Never waits while offloading is off. The policy is re-read on every
    /// check, so lowering the headroom, clearing the hard limit or turning
    /// offload off releases waiters.
    pub fn wait_for_headroom(&self, source: &dyn FreePageSource) -> ThrottleOutcome {
        if !self.must_wait(source) {
            return ThrottleOutcome::NotNeeded;
        }

        let start = self.metrics.now();
        let mut checks = 1;
        loop {
            checks += 1;
            if !self.must_wait(source) {
                break;
            }
            core::hint::spin_loop();
        }
        let cycles = self.metrics.now().saturating_sub(start);

        self.metrics.time_stats().accumulate(TimeStatKind::FsReclaimCount, checks);
        self.metrics.accumulate(TimeStatKind::FsReclaimDuration, cycles);
        log::trace!("frontswap: reclaim throttled for {} checks", checks);

        ThrottleOutcome::Waited { cycles, checks }
    }

    fn must_wait(&self, source: &dyn FreePageSource) -> bool {
        self.policy.is_enabled()
            && self.policy.hard_limit()
            && source.free_pages() < u64::from(self.policy.headroom())
    }
}
