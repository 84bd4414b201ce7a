//! Translation statistics collection and reporting.
//!
//! Tracks what the compilation pipeline accomplished over a run:
//! 1. **Regions:** How many regions were compiled and installed.
//! 2. **Instructions:** Guest instructions consumed and IR instructions
//!    produced.
//! 3. **Code size:** Accumulated optimized/unoptimized size ratio.

/// Pipeline counters, owned by the manager and reported at shutdown.
#[derive(Debug, Default, Clone)]
pub struct DbtStats {
    /// Regions successfully compiled and installed.
    pub compiled_regions: u64,
    /// Guest (OI) instructions consumed by compiled regions.
    pub oi_compiled: u64,
    /// IR instructions emitted for compiled regions (after optimization).
    pub native_compiled: u64,
    /// Sum of per-region `optimized_size / lifted_size` ratios; divide by
    /// `compiled_regions` for the average.
    pub opt_size_ratio_sum: f64,
}

impl DbtStats {
    /// Average optimized-to-lifted code size ratio, or 0 with no regions.
    pub fn avg_opt_code_size(&self) -> f64 {
        if self.compiled_regions == 0 {
            0.0
        } else {
            self.opt_size_ratio_sum / self.compiled_regions as f64
        }
    }

    /// Logs the final counters.
    pub fn report(&self) {
        tracing::info!(
            compiled_regions = self.compiled_regions,
            oi_compiled = self.oi_compiled,
            native_compiled = self.native_compiled,
            avg_opt_code_size = self.avg_opt_code_size(),
            "pipeline statistics"
        );
    }
}
