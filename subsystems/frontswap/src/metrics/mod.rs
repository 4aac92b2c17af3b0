//! # Swap Metrics
//!
//! Explicitly constructed metrics context, shared as an `Arc` by every
//! component that reports into it.
//!
//! ```text
//!   SwapMetrics
//!   ├── CounterSet       6 monotonic counters
//!   ├── TimeStatSet      14 (sum, count) pairs
//!   ├── PfBreakdownSet   4 fault types x 24 phases
//!   └── SampleRing       optional, 6 channels x capacity
//! ```
//!
//! Every update is a relaxed atomic add; no ordering is implied between
//! two different counters or accumulators.

pub mod breakdown;
pub mod clock;
pub mod counters;
pub mod report;
pub mod samples;
pub mod time_stat;

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt::Write;

pub use breakdown::{PfBits, PfBreakdown, PfBreakdownSet, PfPhase, PfType, PhaseTimer};
pub use clock::{Calibration, CycleClock, ManualClock, DEFAULT_CPU_FREQ_MHZ};
#[cfg(target_arch = "x86_64")]
pub use clock::TscClock;
pub use counters::{CounterKind, CounterSet};
pub use report::MetricsReport;
pub use samples::SampleRing;
pub use time_stat::{TimeStat, TimeStatKind, TimeStatSet};

use crate::config::MetricsConfig;

/// Metrics context
pub struct SwapMetrics {
    clock: Arc<dyn CycleClock>,
    calibration: Calibration,
    counters: CounterSet,
    time_stats: TimeStatSet,
    breakdown: PfBreakdownSet,
    samples: Option<SampleRing>,
}

impl SwapMetrics {
    /// Create a metrics context reading time from `clock`
    pub fn new(config: &MetricsConfig, clock: Arc<dyn CycleClock>) -> Self {
        let samples = config.sample_capacity.map(SampleRing::new);
        if let Some(ring) = &samples {
            log::debug!("frontswap: sample ring of {} entries", ring.capacity());
        }
        Self {
            clock,
            calibration: Calibration::new(config.cpu_freq_mhz),
            counters: CounterSet::new(),
            time_stats: TimeStatSet::new(),
            breakdown: PfBreakdownSet::new(),
            samples,
        }
    }

    /// Current cycle count
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// The clock
    pub fn clock(&self) -> &dyn CycleClock {
        &*self.clock
    }

    /// Cycle calibration
    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Convert cycles to nanoseconds
    #[inline]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        self.calibration.cycles_to_ns(cycles)
    }

    /// Event counters
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// Duration statistics
    pub fn time_stats(&self) -> &TimeStatSet {
        &self.time_stats
    }

    /// Per-fault breakdowns
    pub fn breakdown(&self) -> &PfBreakdownSet {
        &self.breakdown
    }

    /// Raw sample ring, if enabled
    pub fn samples(&self) -> Option<&SampleRing> {
        self.samples.as_ref()
    }

    /// Increment a counter
    #[inline]
    pub fn inc(&self, kind: CounterKind) {
        self.counters.inc(kind);
    }

    /// Add `cycles` as one sample of `kind`
    #[inline]
    pub fn accumulate(&self, kind: TimeStatKind, cycles: u64) {
        self.time_stats.accumulate(kind, cycles);
    }

    /// Add the cycles elapsed since `start` as one sample of `kind`
    #[inline]
    pub fn accumulate_since(&self, kind: TimeStatKind, start: u64) {
        self.accumulate(kind, self.now().saturating_sub(start));
    }

    /// Fold a finished fault
    ///
    /// The timer is folded under its own fault type and under
    /// [`PfType::All`]; swap faults also feed the sample ring. Faults that
    /// did not touch swap are ignored.
    pub fn record_fault(&self, timer: &PhaseTimer, bits: PfBits) {
        let Some(ty) = bits.fault_type() else {
            return;
        };
        self.breakdown.fold(ty, timer);
        self.breakdown.fold(PfType::All, timer);
        if bits.contains(PfBits::SWAP) {
            if let Some(ring) = &self.samples {
                ring.record(timer);
            }
        }
    }

    /// Reset counters and duration statistics
    pub fn reset_swap_stats(&self) {
        self.counters.reset_all();
        self.time_stats.reset_all();
    }

    /// Reset breakdown accumulators and rewind the sample ring
    pub fn reset_pf_breakdown(&self) {
        self.breakdown.reset();
        if let Some(ring) = &self.samples {
            ring.reset();
        }
    }

    /// Render the current values
    pub fn report(&self) -> MetricsReport<'_> {
        MetricsReport::new(self)
    }

    /// Emit the report through `log::info!`, one line per record
    pub fn log_report(&self) {
        let mut text = String::new();
        if write!(text, "{}", self.report()).is_err() {
            return;
        }
        for line in text.lines() {
            log::info!("{}", line);
        }
    }
}

impl core::fmt::Debug for SwapMetrics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwapMetrics")
            .field("calibration", &self.calibration)
            .field("counters", &self.counters.snapshot())
            .field("samples", &self.samples)
            .finish()
    }
}
