use crate::{Histogram, HistogramConfig, HistogramWriter, PulseWindow};
use anyhow::Result;

/// Everything the console needs from the acquisition back end.
///
/// Implementations own device I/O, pulse integration and histogram
/// accumulation; all methods take `&self` so the engine can be shared between
/// the foreground form and the online updater thread.
pub trait AcquisitionEngine: Send + Sync {
    fn configure_histogram(&self, config: HistogramConfig);

    /// Event cap for the next run, 0 means unbounded.
    fn set_max_events(&self, n: u64);

    fn begin(&self, device: &str);

    fn end(&self);

    /// False once the run has ended, either by `end` or on the engine's own
    /// account (event cap reached, device fault).
    fn is_run_active(&self) -> bool;

    fn set_window(&self, window: PulseWindow);

    fn window(&self) -> PulseWindow;

    /// Latest pulse shape as `(time bin, ADC value)` points.
    fn trace(&self) -> Vec<(f64, f64)>;

    /// Snapshot of the ADC sum distribution.
    fn histogram(&self) -> Histogram;

    /// Events per second since the run began.
    fn capture_rate(&self) -> f64;

    fn histogram_entries(&self) -> u64 {
        self.histogram().entries()
    }

    fn histogram_underflow(&self) -> u64 {
        self.histogram().underflow()
    }

    fn histogram_overflow(&self) -> u64 {
        self.histogram().overflow()
    }

    fn persist_histogram(&self, out: &mut HistogramWriter) -> Result<()>;
}
