/// Time window and discriminator level used for pulse integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseWindow {
    /// First time bin included in the integral.
    pub t_min: i32,
    /// Last time bin included in the integral.
    pub t_max: i32,
    /// Discriminator level in ADC units, subtracted from every accepted sample.
    pub threshold: i32,
}

impl Default for PulseWindow {
    fn default() -> Self {
        Self {
            t_min: 1,
            t_max: 1000,
            threshold: 0,
        }
    }
}

impl PulseWindow {
    /// Parse all three operator fields. Any malformed field rejects the whole window.
    pub fn parse(t_min: &str, t_max: &str, threshold: &str) -> Option<Self> {
        Some(Self {
            t_min: t_min.trim().parse().ok()?,
            t_max: t_max.trim().parse().ok()?,
            threshold: threshold.trim().parse().ok()?,
        })
    }

    pub fn contains(&self, time: i32) -> bool {
        time >= self.t_min && time <= self.t_max
    }
}

/// Largest bin count the console will allocate for one histogram.
pub const MAX_BINS: usize = 1 << 20;

/// Binning of the ADC sum distribution, fixed for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramConfig {
    pub n_bins: usize,
    pub x_min: f64,
    pub x_max: f64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            n_bins: 1000,
            x_min: 0.0,
            x_max: 1000.0,
        }
    }
}

impl HistogramConfig {
    /// `None` unless `0 < n_bins <= MAX_BINS` and `x_min < x_max`, both finite.
    pub fn new(n_bins: usize, x_min: f64, x_max: f64) -> Option<Self> {
        if n_bins == 0
            || n_bins > MAX_BINS
            || !x_min.is_finite()
            || !x_max.is_finite()
            || x_min >= x_max
        {
            return None;
        }
        Some(Self {
            n_bins,
            x_min,
            x_max,
        })
    }

    pub fn parse(n_bins: &str, x_min: &str, x_max: &str) -> Option<Self> {
        Self::new(
            n_bins.trim().parse().ok()?,
            x_min.trim().parse().ok()?,
            x_max.trim().parse().ok()?,
        )
    }

    pub fn bin_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.n_bins as f64
    }
}

/// Event cap for "Run for events"; only strictly positive counts are accepted.
pub fn parse_event_count(text: &str) -> Option<u64> {
    match text.trim().parse::<i64>() {
        Ok(n) if n > 0 => Some(n as u64),
        _ => None,
    }
}
