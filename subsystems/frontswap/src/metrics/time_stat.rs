//! Accumulated duration statistics.

use core::sync::atomic::{AtomicU64, Ordering};

use super::clock::Calibration;

/// Duration statistic categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum TimeStatKind {
    /// Fault that had to read from the backend
    MajorSwapDuration     = 0,
    /// Fault satisfied from the swap cache
    MinorSwapDuration     = 1,
    /// Swap-out path
    SwapOutDuration       = 2,
    /// Faults that did not involve swap
    NonSwapDuration       = 3,
    /// Backend read round trip
    BackendReadLatency    = 4,
    /// Backend write round trip
    BackendWriteLatency   = 5,
    /// Swap slot allocation
    AllocSlotLatency      = 6,
    /// Swap slot allocation, fast path
    AllocSlotFast         = 7,
    /// Completion polling
    CompletionPollLatency = 8,
    /// Reverse mapping walk
    ReverseMapLatency     = 9,
    /// TLB flush of dirty pages during unmap
    TlbFlushDirty         = 10,
    /// TLB flush during unmap
    TlbFlushLatency       = 11,
    /// Free-page checks taken while throttled
    FsReclaimCount        = 12,
    /// Time spent throttled
    FsReclaimDuration     = 13,
}

impl TimeStatKind {
    /// Number of kinds
    pub const COUNT: usize = 14;

    /// All kinds, in report order
    pub const ALL: [Self; Self::COUNT] = [
        Self::MajorSwapDuration,
        Self::MinorSwapDuration,
        Self::SwapOutDuration,
        Self::NonSwapDuration,
        Self::BackendReadLatency,
        Self::BackendWriteLatency,
        Self::AllocSlotLatency,
        Self::AllocSlotFast,
        Self::CompletionPollLatency,
        Self::ReverseMapLatency,
        Self::TlbFlushDirty,
        Self::TlbFlushLatency,
        Self::FsReclaimCount,
        Self::FsReclaimDuration,
    ];

    /// Report label
    pub const fn name(self) -> &'static str {
        match self {
            Self::MajorSwapDuration => "major swap duration",
            Self::MinorSwapDuration => "minor swap duration",
            Self::SwapOutDuration => "swap-out duration",
            Self::NonSwapDuration => "non-swap duration",
            Self::BackendReadLatency => "backend read latency",
            Self::BackendWriteLatency => "backend write latency",
            Self::AllocSlotLatency => "alloc swap slot lat",
            Self::AllocSlotFast => "alloc swap slot fst",
            Self::CompletionPollLatency => "completion poll latency",
            Self::ReverseMapLatency => "reverse mapping",
            Self::TlbFlushDirty => "unmap flush dirty",
            Self::TlbFlushLatency => "unmap flush",
            Self::FsReclaimCount => "fs reclaim cnt",
            Self::FsReclaimDuration => "fs reclaim dur",
        }
    }

    /// Does the stat accumulate cycles?
    ///
    /// `FsReclaimCount` accumulates loop iterations, so its mean is reported
    /// as a plain number.
    pub const fn is_duration(self) -> bool {
        !matches!(self, Self::FsReclaimCount)
    }
}

static_assertions::const_assert_eq!(
    TimeStatKind::FsReclaimDuration as usize + 1,
    TimeStatKind::COUNT
);

/// A `(sum, count)` pair
///
/// The two fields are updated independently; a reader may observe the sum
/// of one sample with the count of the previous one.
#[derive(Debug, Default)]
pub struct TimeStat {
    sum: AtomicU64,
    count: AtomicU64,
}

impl TimeStat {
    /// Empty statistic
    pub const fn new() -> Self {
        Self {
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Add one sample
    #[inline]
    pub fn accumulate(&self, value: u64) {
        self.accumulate_multi(value, 1);
    }

    /// Add `value` as `count` samples
    #[inline]
    pub fn accumulate_multi(&self, value: u64, count: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(count, Ordering::Relaxed);
    }

    /// Sum of all samples
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Number of samples
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean in cycles, `None` without samples
    pub fn mean(&self) -> Option<u64> {
        let count = self.count();
        (count != 0).then(|| self.sum() / count)
    }

    /// Mean in nanoseconds, `None` without samples
    pub fn mean_ns(&self, cal: Calibration) -> Option<u64> {
        self.mean().map(|cycles| cal.cycles_to_ns(cycles))
    }

    /// Zero both fields
    pub fn reset(&self) {
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

/// One [`TimeStat`] per [`TimeStatKind`]
#[derive(Debug, Default)]
pub struct TimeStatSet {
    stats: [TimeStat; TimeStatKind::COUNT],
}

impl TimeStatSet {
    /// All statistics empty
    pub const fn new() -> Self {
        Self {
            stats: [const { TimeStat::new() }; TimeStatKind::COUNT],
        }
    }

    /// Statistic of `kind`
    #[inline]
    pub fn get(&self, kind: TimeStatKind) -> &TimeStat {
        &self.stats[kind as usize]
    }

    /// Add one sample to `kind`
    #[inline]
    pub fn accumulate(&self, kind: TimeStatKind, value: u64) {
        self.get(kind).accumulate(value);
    }

    /// Add `value` as `count` samples to `kind`
    #[inline]
    pub fn accumulate_multi(&self, kind: TimeStatKind, value: u64, count: u64) {
        self.get(kind).accumulate_multi(value, count);
    }

    /// Reset every statistic
    pub fn reset_all(&self) {
        for stat in &self.stats {
            stat.reset();
        }
    }
}
