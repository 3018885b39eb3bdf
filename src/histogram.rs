use crate::HistogramConfig;
use ndarray::Array1;

/// Fixed-bin 1-D histogram with separate underflow and overflow counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    config: HistogramConfig,
    counts: Array1<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(HistogramConfig::default())
    }
}

impl Histogram {
    pub fn new(config: HistogramConfig) -> Self {
        Self {
            config,
            counts: Array1::zeros(config.n_bins),
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    pub fn config(&self) -> HistogramConfig {
        self.config
    }

    /// Add one value; values below `x_min` go to underflow, values at or above `x_max` to overflow.
    pub fn fill(&mut self, x: f64) {
        self.entries += 1;
        if x < self.config.x_min {
            self.underflow += 1.0;
        } else if x >= self.config.x_max {
            self.overflow += 1.0;
        } else {
            let bin = ((x - self.config.x_min) / self.config.bin_width()) as usize;
            // rounding at the upper edge
            let bin = bin.min(self.config.n_bins - 1);
            self.counts[bin] += 1.0;
        }
    }

    pub fn reset(&mut self) {
        self.counts.fill(0.0);
        self.underflow = 0.0;
        self.overflow = 0.0;
        self.entries = 0;
    }

    pub fn counts(&self) -> &Array1<f64> {
        &self.counts
    }

    /// Bin edges, `n_bins + 1` values from `x_min` to `x_max`.
    pub fn edges(&self) -> Array1<f64> {
        Array1::linspace(self.config.x_min, self.config.x_max, self.config.n_bins + 1)
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn underflow(&self) -> u64 {
        self.underflow as u64
    }

    pub fn overflow(&self) -> u64 {
        self.overflow as u64
    }

    pub fn max_count(&self) -> f64 {
        self.counts.iter().cloned().fold(0.0, f64::max)
    }

    /// Bin centres paired with their contents, for plotting.
    pub fn points(&self) -> Vec<(f64, f64)> {
        let width = self.config.bin_width();
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &c)| (self.config.x_min + (i as f64 + 0.5) * width, c))
            .collect()
    }
}
