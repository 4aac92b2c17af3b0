//! # Frontswap Configuration
//!
//! Boot-time configuration of the frontswap layer. Everything here seeds
//! runtime state that stays mutable afterwards through atomic setters on
//! [`Frontswap`](crate::Frontswap) and [`OffloadPolicy`](crate::OffloadPolicy).

use alloc::vec::Vec;

use crate::metrics::DEFAULT_CPU_FREQ_MHZ;
use crate::types::CpuId;
use crate::MAX_CPUS;

/// Default reclaim headroom, in pages
pub const DEFAULT_HEADROOM: u32 = 2048;

/// Default number of dedicated offload cores in use
pub const DEFAULT_NR_OFFLOAD_CORES: usize = 1;

/// Length of the default dedicated core list
pub const DEFAULT_OFFLOAD_CORE_LIST: usize = 15;

// =============================================================================
// OFFLOAD CONFIG
// =============================================================================

/// Reclaim offload policy seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadConfig {
    /// Offload reclaim to dedicated cores
    pub enabled: bool,
    /// Throttle reclaim issuance until headroom is available
    pub hard_limit: bool,
    /// Target free pages
    pub headroom: u32,
    /// Number of entries of `cores` in use
    pub nr_cores: usize,
    /// Dedicated core ids
    pub cores: Vec<CpuId>,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hard_limit: true,
            headroom: DEFAULT_HEADROOM,
            nr_cores: DEFAULT_NR_OFFLOAD_CORES,
            cores: (0..DEFAULT_OFFLOAD_CORE_LIST as u32)
                .map(|i| CpuId::new(31 - i))
                .collect(),
        }
    }
}

// =============================================================================
// METRICS CONFIG
// =============================================================================

/// Metrics context seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Cycle clock frequency used for ns conversion, in MHz
    pub cpu_freq_mhz: u64,
    /// Raw sample ring capacity per channel, `None` disables the ring
    pub sample_capacity: Option<usize>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cpu_freq_mhz: DEFAULT_CPU_FREQ_MHZ,
            sample_capacity: None,
        }
    }
}

// =============================================================================
// FRONTSWAP CONFIG
// =============================================================================

/// Frontswap layer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontswapConfig {
    /// Number of CPUs, one async slot pair each
    pub nr_cpus: usize,
    /// Report stores as failed so the primary device is written too
    pub writethrough: bool,
    /// Drop the backend copy on a successful load
    pub exclusive_gets: bool,
    /// Reclaim offload policy
    pub offload: OffloadConfig,
    /// Metrics
    pub metrics: MetricsConfig,
}

impl FrontswapConfig {
    /// Start a builder
    pub fn builder() -> FrontswapConfigBuilder {
        FrontswapConfigBuilder::new()
    }
}

impl Default for FrontswapConfig {
    fn default() -> Self {
        Self {
            nr_cpus: 1,
            writethrough: false,
            exclusive_gets: false,
            offload: OffloadConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Builder for [`FrontswapConfig`]
#[derive(Debug, Clone, Default)]
pub struct FrontswapConfigBuilder {
    config: FrontswapConfig,
}

impl FrontswapConfigBuilder {
    /// Create new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set CPU count, clamped to `1..=MAX_CPUS`
    pub fn nr_cpus(mut self, nr_cpus: usize) -> Self {
        self.config.nr_cpus = nr_cpus.clamp(1, MAX_CPUS);
        self
    }

    /// Set writethrough mode
    pub fn writethrough(mut self, on: bool) -> Self {
        self.config.writethrough = on;
        self
    }

    /// Set exclusive gets
    pub fn exclusive_gets(mut self, on: bool) -> Self {
        self.config.exclusive_gets = on;
        self
    }

    /// Set offload policy
    pub fn offload(mut self, offload: OffloadConfig) -> Self {
        self.config.offload = offload;
        self
    }

    /// Set metrics config
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Set the raw sample ring capacity
    pub fn sample_capacity(mut self, capacity: usize) -> Self {
        self.config.metrics.sample_capacity = Some(capacity);
        self
    }

    /// Build the config
    pub fn build(self) -> FrontswapConfig {
        self.config
    }
}
