//! Swap event counters.

use core::sync::atomic::{AtomicU64, Ordering};

/// Swap event counter categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CounterKind {
    /// Swap-in on a demand fault
    OnDemandSwapIn = 0,
    /// Swap-in issued by prefetching
    PrefetchSwapIn = 1,
    /// Fault satisfied by a prefetched page
    HitOnPrefetch  = 2,
    /// Page swapped out
    SwapOut        = 3,
    /// Reclaim decisions
    TotalReclaim   = 4,
    /// Reclaim offloaded to a dedicated core
    FsReclaim      = 5,
}

impl CounterKind {
    /// Number of counter kinds
    pub const COUNT: usize = 6;

    /// All kinds, in report order
    pub const ALL: [Self; Self::COUNT] = [
        Self::OnDemandSwapIn,
        Self::PrefetchSwapIn,
        Self::HitOnPrefetch,
        Self::SwapOut,
        Self::TotalReclaim,
        Self::FsReclaim,
    ];

    /// Report label
    pub const fn name(self) -> &'static str {
        match self {
            Self::OnDemandSwapIn => "Demand       ",
            Self::PrefetchSwapIn => "Prefetch     ",
            Self::HitOnPrefetch => "HitOnCache   ",
            Self::SwapOut => "Swapout      ",
            Self::TotalReclaim => "Total Reclaim",
            Self::FsReclaim => "FS Reclaim   ",
        }
    }
}

static_assertions::const_assert_eq!(CounterKind::FsReclaim as usize + 1, CounterKind::COUNT);

/// Independent monotonic counters, one per [`CounterKind`]
///
/// No ordering is implied between two different counters.
#[derive(Debug, Default)]
pub struct CounterSet {
    values: [AtomicU64; CounterKind::COUNT],
}

impl CounterSet {
    /// All counters at zero
    pub const fn new() -> Self {
        Self {
            values: [const { AtomicU64::new(0) }; CounterKind::COUNT],
        }
    }

    /// Increment by one
    #[inline]
    pub fn inc(&self, kind: CounterKind) {
        self.add(kind, 1);
    }

    /// Add `n`
    #[inline]
    pub fn add(&self, kind: CounterKind, n: u64) {
        self.values[kind as usize].fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[inline]
    pub fn get(&self, kind: CounterKind) -> u64 {
        self.values[kind as usize].load(Ordering::Relaxed)
    }

    /// Reset one counter
    pub fn reset(&self, kind: CounterKind) {
        self.values[kind as usize].store(0, Ordering::Relaxed);
    }

    /// Reset every counter
    pub fn reset_all(&self) {
        for kind in CounterKind::ALL {
            self.reset(kind);
        }
    }

    /// Point-in-time copy, in [`CounterKind::ALL`] order
    pub fn snapshot(&self) -> [u64; CounterKind::COUNT] {
        CounterKind::ALL.map(|kind| self.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_round_trip() {
        let counters = CounterSet::new();
        for _ in 0..17 {
            counters.inc(CounterKind::SwapOut);
        }
        assert_eq!(counters.get(CounterKind::SwapOut), 17);
        assert_eq!(counters.get(CounterKind::OnDemandSwapIn), 0);

        counters.reset(CounterKind::SwapOut);
        assert_eq!(counters.get(CounterKind::SwapOut), 0);
    }

    #[test]
    fn test_counter_add_and_snapshot() {
        let counters = CounterSet::new();
        counters.add(CounterKind::TotalReclaim, 40);
        counters.inc(CounterKind::FsReclaim);
        let snap = counters.snapshot();
        assert_eq!(snap[CounterKind::TotalReclaim as usize], 40);
        assert_eq!(snap[CounterKind::FsReclaim as usize], 1);

        counters.reset_all();
        assert_eq!(counters.snapshot(), [0; CounterKind::COUNT]);
    }

    #[test]
    fn test_concurrent_increments() {
        let counters = CounterSet::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        counters.inc(CounterKind::OnDemandSwapIn);
                    }
                });
            }
        });
        assert_eq!(counters.get(CounterKind::OnDemandSwapIn), 8000);
    }
}
