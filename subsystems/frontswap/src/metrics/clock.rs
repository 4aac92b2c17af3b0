//! Cycle clock port and cycle-to-nanosecond calibration.

use core::sync::atomic::{AtomicU64, Ordering};

/// Default calibration frequency, in MHz
pub const DEFAULT_CPU_FREQ_MHZ: u64 = 2994;

/// Monotonic high-resolution cycle source
pub trait CycleClock: Send + Sync {
    /// Current cycle count
    fn now(&self) -> u64;
}

/// Fixed cycles-per-microsecond calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    freq_mhz: u64,
}

impl Calibration {
    /// Calibration for a clock ticking at `freq_mhz` MHz
    ///
    /// A zero frequency is clamped to 1 MHz.
    pub const fn new(freq_mhz: u64) -> Self {
        Self {
            freq_mhz: if freq_mhz == 0 { 1 } else { freq_mhz },
        }
    }

    /// Frequency in MHz
    pub const fn freq_mhz(self) -> u64 {
        self.freq_mhz
    }

    /// Convert cycles to nanoseconds
    #[inline]
    pub const fn cycles_to_ns(self, cycles: u64) -> u64 {
        cycles.saturating_mul(1000) / self.freq_mhz
    }

    /// Convert cycles to microseconds
    #[inline]
    pub const fn cycles_to_us(self, cycles: u64) -> u64 {
        cycles / self.freq_mhz
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_FREQ_MHZ)
    }
}

// =============================================================================
// CLOCK SOURCES
// =============================================================================

/// Time Stamp Counter, serialized with `lfence` on both sides
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TscClock;

#[cfg(target_arch = "x86_64")]
impl CycleClock for TscClock {
    #[inline]
    fn now(&self) -> u64 {
        let lo: u32;
        let hi: u32;
        // SAFETY: rdtsc and lfence read no memory and only write eax/edx.
        unsafe {
            core::arch::asm!(
                "lfence",
                "rdtsc",
                "lfence",
                out("eax") lo,
                out("edx") hi,
                options(nostack, nomem, preserves_flags),
            );
        }
        ((hi as u64) << 32) | (lo as u64)
    }
}

/// Manually driven clock, for hosts without a cycle counter and for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    cycles: AtomicU64,
}

impl ManualClock {
    /// Create a clock at cycle 0
    pub const fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
        }
    }

    /// Advance by `cycles`
    pub fn advance(&self, cycles: u64) {
        self.cycles.fetch_add(cycles, Ordering::SeqCst);
    }

    /// Set the cycle count
    pub fn set(&self, cycles: u64) {
        self.cycles.store(cycles, Ordering::SeqCst);
    }
}

impl CycleClock for ManualClock {
    fn now(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }
}
