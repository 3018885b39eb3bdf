use confique::Config;
use std::{path::Path, time::Duration};

/// Console configuration. Every field has a default so the console runs
/// without a file; the TOML file only overrides what it names.
#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub pulse_settings: PulseSettings,
    #[config(nested)]
    pub histogram_settings: HistogramSettings,
    #[config(nested)]
    pub export_settings: ExportSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    /// Scope device node, or `sim://<events per second>` for the simulator.
    #[config(default = "/dev/usbtmc0")]
    pub device: String,
    #[config(default = 0)]
    pub max_events: u64,
    /// Online update period in milliseconds.
    #[config(default = 400)]
    pub update_period_ms: u64,
}

#[derive(Config, Debug, Clone)]
pub struct PulseSettings {
    #[config(default = 0)]
    pub t_min: i32,
    #[config(default = 1000)]
    pub t_max: i32,
    #[config(default = 0)]
    pub threshold: i32,
}

#[derive(Config, Debug, Clone)]
pub struct HistogramSettings {
    #[config(default = 1000)]
    pub n_bins: usize,
    #[config(default = 0.0)]
    pub x_min: f64,
    #[config(default = 1000.0)]
    pub x_max: f64,
}

#[derive(Config, Debug, Clone)]
pub struct ExportSettings {
    #[config(default = "adc_sum.h5")]
    pub file_name: String,
    #[config(default = "pulse_daq.log")]
    pub log_file: String,
}

impl Conf {
    /// Load from an optional TOML file layered over the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Conf::builder();
        if let Some(path) = path {
            // confique skips missing files, an explicit path must exist
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
            builder = builder.file(path);
        }
        Ok(builder.load()?)
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.run_settings.update_period_ms)
    }
}
