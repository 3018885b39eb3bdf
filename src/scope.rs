use crate::{AcquisitionEngine, Histogram, HistogramConfig, HistogramWriter, PulseWindow};
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use rand::Rng;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Samples in one scope waveform.
pub const WAVEFORM_LEN: usize = 1000;
/// Length of the `#9000001000` block header preceding the samples.
const BLOCK_HEADER_LEN: usize = 11;
const READ_BUFFER_LEN: usize = 2048;
const SIM_PREFIX: &str = "sim://";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Anything that delivers one waveform of 8-bit samples per call.
pub trait WaveformSource: Send {
    fn acquire(&mut self) -> Result<Vec<u8>>;
}

/// Scope attached through the USB test-and-measurement class device node.
pub struct UsbtmcSource {
    dev: File,
    buffer: [u8; READ_BUFFER_LEN],
}

impl UsbtmcSource {
    pub fn open(path: &str) -> Result<Self> {
        let dev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("cannot open scope device {path}"))?;
        Ok(Self {
            dev,
            buffer: [0; READ_BUFFER_LEN],
        })
    }
}

impl WaveformSource for UsbtmcSource {
    fn acquire(&mut self) -> Result<Vec<u8>> {
        self.dev.write_all(b":WAV:DATA?")?;
        let n = self.dev.read(&mut self.buffer)?;
        if n < BLOCK_HEADER_LEN + WAVEFORM_LEN {
            bail!("short waveform read, {n} bytes");
        }
        Ok(self.buffer[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + WAVEFORM_LEN].to_vec())
    }
}

/// Synthetic pulses on a noisy baseline, for running without a scope.
///
/// Selected with a device path `sim://<events per second>`.
pub struct SimulatedSource {
    interval: Duration,
}

impl SimulatedSource {
    pub fn new(rate: f64) -> Self {
        let interval = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::ZERO
        };
        Self { interval }
    }
}

impl WaveformSource for SimulatedSource {
    fn acquire(&mut self) -> Result<Vec<u8>> {
        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        let mut rng = rand::rng();
        let t0 = rng.random_range(200..600) as f64;
        let amplitude = rng.random_range(20.0..200.0);
        let tau = rng.random_range(20.0..60.0);
        let samples = (0..WAVEFORM_LEN)
            .map(|i| {
                let t = i as f64;
                let pulse = if t >= t0 {
                    amplitude * (-(t - t0) / tau).exp()
                } else {
                    0.0
                };
                let noise = rng.random_range(-2.0..2.0);
                (10.0 + pulse + noise).clamp(0.0, 255.0) as u8
            })
            .collect();
        Ok(samples)
    }
}

/// Pick the waveform source for a device path.
pub fn open_source(device: &str) -> Result<Box<dyn WaveformSource>> {
    match device.strip_prefix(SIM_PREFIX) {
        Some(rate) => {
            let rate = if rate.is_empty() {
                100.0
            } else {
                rate.parse::<f64>()
                    .with_context(|| format!("bad simulator rate {rate:?}"))?
            };
            Ok(Box::new(SimulatedSource::new(rate)))
        }
        None => Ok(Box::new(UsbtmcSource::open(device)?)),
    }
}

/// ADC sum of one waveform inside `window`, threshold subtracted, in units of 1000 counts.
pub fn integrate(samples: &[u8], window: PulseWindow) -> f64 {
    samples
        .iter()
        .enumerate()
        .filter(|&(time, _)| window.contains(time as i32))
        .map(|(_, &adc)| adc as i32)
        .filter(|&adc| adc >= window.threshold)
        .map(|adc| (adc - window.threshold) as f64 * 1e-3)
        .sum()
}

struct Shared {
    keep_read: AtomicBool,
    daq_active: AtomicBool,
    max_events: AtomicU64,
    t_min: AtomicI32,
    t_max: AtomicI32,
    threshold: AtomicI32,
    trace: Mutex<Vec<(f64, f64)>>,
    adc_sum: Mutex<Histogram>,
    capture_rate: Mutex<f64>,
}

impl Shared {
    fn window(&self) -> PulseWindow {
        PulseWindow {
            t_min: self.t_min.load(Ordering::Relaxed),
            t_max: self.t_max.load(Ordering::Relaxed),
            threshold: self.threshold.load(Ordering::Relaxed),
        }
    }
}

/// Engine reading the scope on its own DAQ thread and accumulating the ADC
/// sum distribution of every waveform.
pub struct ScopeEngine {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ScopeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeEngine {
    pub fn new() -> Self {
        let window = PulseWindow::default();
        let shared = Shared {
            keep_read: AtomicBool::new(false),
            daq_active: AtomicBool::new(false),
            max_events: AtomicU64::new(0),
            t_min: AtomicI32::new(window.t_min),
            t_max: AtomicI32::new(window.t_max),
            threshold: AtomicI32::new(window.threshold),
            trace: Mutex::new(Vec::with_capacity(WAVEFORM_LEN)),
            adc_sum: Mutex::new(Histogram::default()),
            capture_rate: Mutex::new(0.0),
        };
        Self {
            shared: Arc::new(shared),
            reader: Mutex::new(None),
        }
    }

    /// Start reading from an already opened source.
    pub fn begin_with(&self, source: Box<dyn WaveformSource>) {
        self.join_reader();
        self.shared.keep_read.store(true, Ordering::SeqCst);
        self.shared.daq_active.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.spawn_reader(move || read_loop(&shared, source));
    }

    fn spawn_reader<F: FnOnce() + Send + 'static>(&self, f: F) {
        match thread::Builder::new().name("scope-daq".into()).spawn(f) {
            Ok(handle) => *lock(&self.reader) = Some(handle),
            Err(e) => {
                error!("cannot spawn DAQ thread: {e}");
                self.shared.daq_active.store(false, Ordering::SeqCst);
            }
        }
    }

    fn join_reader(&self) {
        let handle = lock(&self.reader).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("DAQ thread panicked");
            }
        }
    }
}

impl Drop for ScopeEngine {
    fn drop(&mut self) {
        self.shared.keep_read.store(false, Ordering::SeqCst);
        self.join_reader();
    }
}

fn read_loop(shared: &Shared, mut source: Box<dyn WaveformSource>) {
    lock(&shared.adc_sum).reset();
    *lock(&shared.capture_rate) = 0.0;

    let t0 = Instant::now();
    let max_events = shared.max_events.load(Ordering::SeqCst);
    let mut n_events: u64 = 0;

    while shared.keep_read.load(Ordering::SeqCst) {
        let samples = match source.acquire() {
            Ok(samples) => samples,
            Err(e) => {
                error!("scope read failed: {e:#}");
                break;
            }
        };

        *lock(&shared.trace) = samples
            .iter()
            .enumerate()
            .map(|(t, &adc)| (t as f64, adc as f64))
            .collect();

        let adc_sum = integrate(&samples, shared.window());
        lock(&shared.adc_sum).fill(adc_sum);

        n_events += 1;
        let elapsed = t0.elapsed().as_secs_f64().max(1e-6);
        *lock(&shared.capture_rate) = n_events as f64 / elapsed;

        if max_events > 0 && n_events >= max_events {
            info!("event cap of {max_events} reached");
            shared.keep_read.store(false, Ordering::SeqCst);
        }
    }

    shared.daq_active.store(false, Ordering::SeqCst);
}

impl AcquisitionEngine for ScopeEngine {
    fn configure_histogram(&self, config: HistogramConfig) {
        *lock(&self.shared.adc_sum) = Histogram::new(config);
    }

    fn set_max_events(&self, n: u64) {
        self.shared.max_events.store(n, Ordering::SeqCst);
    }

    fn begin(&self, device: &str) {
        match open_source(device) {
            Ok(source) => self.begin_with(source),
            Err(e) => {
                // the updater sees the run inactive and ends it
                error!("{e:#}");
                self.shared.daq_active.store(false, Ordering::SeqCst);
            }
        }
    }

    fn end(&self) {
        self.shared.keep_read.store(false, Ordering::SeqCst);
    }

    fn is_run_active(&self) -> bool {
        self.shared.daq_active.load(Ordering::SeqCst)
    }

    fn set_window(&self, window: PulseWindow) {
        if window.t_min > window.t_max {
            warn!("pulse window {}..{} is empty", window.t_min, window.t_max);
        }
        self.shared.t_min.store(window.t_min, Ordering::Relaxed);
        self.shared.t_max.store(window.t_max, Ordering::Relaxed);
        self.shared.threshold.store(window.threshold, Ordering::Relaxed);
    }

    fn window(&self) -> PulseWindow {
        self.shared.window()
    }

    fn trace(&self) -> Vec<(f64, f64)> {
        lock(&self.shared.trace).clone()
    }

    fn histogram(&self) -> Histogram {
        lock(&self.shared.adc_sum).clone()
    }

    fn capture_rate(&self) -> f64 {
        *lock(&self.shared.capture_rate)
    }

    fn persist_histogram(&self, out: &mut HistogramWriter) -> Result<()> {
        out.write_histogram("adc_sum", &self.histogram())
    }
}
