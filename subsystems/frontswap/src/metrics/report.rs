//! Textual metrics report.

use core::fmt;

use super::breakdown::{PfPhase, PfType};
use super::counters::CounterKind;
use super::time_stat::TimeStatKind;
use super::SwapMetrics;

/// Point-in-time rendering of a [`SwapMetrics`]
///
/// Counters first, then one line per time statistic, then one block per
/// fault type with a phase breakdown. Means are in nanoseconds except for
/// count statistics.
#[derive(Debug)]
pub struct MetricsReport<'a> {
    metrics: &'a SwapMetrics,
}

impl<'a> MetricsReport<'a> {
    pub(super) fn new(metrics: &'a SwapMetrics) -> Self {
        Self { metrics }
    }

    fn write_counters(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = self.metrics.counters();
        for kind in CounterKind::ALL {
            writeln!(f, "{}: {}", kind.name(), counters.get(kind))?;
        }
        Ok(())
    }

    fn write_time_stats(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cal = self.metrics.calibration();
        for kind in TimeStatKind::ALL {
            let stat = self.metrics.time_stats().get(kind);
            let mean = if kind.is_duration() {
                stat.mean_ns(cal)
            } else {
                stat.mean()
            };
            let unit = if kind.is_duration() { "ns" } else { "" };
            writeln!(
                f,
                "{:<24}: {}{}, #{}",
                kind.name(),
                mean.unwrap_or(0),
                unit,
                stat.count()
            )?;
        }
        Ok(())
    }

    fn write_breakdown(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cal = self.metrics.calibration();
        for ty in PfType::ALL {
            let breakdown = self.metrics.breakdown().get(ty);
            writeln!(f, "{}: #{}", ty.name(), breakdown.count())?;
            if breakdown.count() == 0 {
                continue;
            }
            for phase in PfPhase::ALL {
                let mean = breakdown.mean(phase).unwrap_or(0);
                writeln!(f, "  {:<18}: {}ns", phase.name(), cal.cycles_to_ns(mean))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for MetricsReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_counters(f)?;
        self.write_time_stats(f)?;
        self.write_breakdown(f)?;
        if let Some(ring) = self.metrics.samples() {
            writeln!(
                f,
                "samples: {} stored, {} issued",
                ring.stored_count(),
                ring.logical_count()
            )?;
        }
        Ok(())
    }
}
