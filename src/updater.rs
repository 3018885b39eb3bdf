use crate::{AcquisitionEngine, FormValues, Histogram, PulseWindow, RunController, RunSignal};
use log::debug;
use std::{sync::Arc, thread};

/// Full-scale ADC value of the 8-bit scope.
pub const ADC_RANGE: f64 = 255.0;
/// Samples per waveform.
pub const TRACE_LEN: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRole {
    LowerBound,
    UpperBound,
    Threshold,
}

/// Everything one redraw needs, published as a single message so the pulse
/// and histogram regions always repaint together.
#[derive(Debug, Clone, Default)]
pub struct PlotFrame {
    pub trace: Vec<(f64, f64)>,
    pub window: PulseWindow,
    pub capture_rate: f64,
    pub online: bool,
    pub histogram: Histogram,
}

impl PlotFrame {
    /// Collect the current engine state.
    pub fn capture(engine: &dyn AcquisitionEngine, online: bool) -> Self {
        Self {
            trace: engine.trace(),
            window: engine.window(),
            capture_rate: engine.capture_rate(),
            online,
            histogram: engine.histogram(),
        }
    }

    /// Marker lines over the pulse trace as two-point segments.
    pub fn markers(&self) -> [(MarkerRole, [(f64, f64); 2]); 3] {
        let t_min = self.window.t_min as f64;
        let t_max = self.window.t_max as f64;
        let thr = self.window.threshold as f64;
        [
            (MarkerRole::LowerBound, [(t_min, 0.0), (t_min, ADC_RANGE)]),
            (MarkerRole::UpperBound, [(t_max, 0.0), (t_max, ADC_RANGE)]),
            (MarkerRole::Threshold, [(0.0, thr), (TRACE_LEN, thr)]),
        ]
    }

    pub fn trace_summary(&self) -> [String; 2] {
        [
            format!("Samples/sec: {:.1}", self.capture_rate),
            format!("Online: {}", if self.online { "True" } else { "False" }),
        ]
    }

    pub fn histogram_summary(&self) -> [String; 3] {
        [
            format!("Entries: {}", self.histogram.entries()),
            format!("Underflow: {}", self.histogram.underflow()),
            format!("Overflow: {}", self.histogram.overflow()),
        ]
    }
}

/// Background loop of one run: pushes the operator's pulse window to the
/// engine and publishes a frame every update period, then one trailing frame
/// after the run ends.
pub struct OnlineUpdater {
    controller: Arc<RunController>,
    signal: Arc<RunSignal>,
}

impl OnlineUpdater {
    pub fn new(controller: Arc<RunController>, signal: Arc<RunSignal>) -> Self {
        Self { controller, signal }
    }

    pub fn run(self) {
        let period = self.controller.update_period();
        loop {
            // run ended by the engine, e.g. event cap reached
            if !self.controller.engine().is_run_active() {
                self.controller.stop_run(&self.signal);
            }
            if !self.signal.is_raised() {
                break;
            }
            if self.signal.wait_cleared(period) {
                break;
            }
            self.update();
        }

        // let the engine settle on its final event
        thread::sleep(period);
        self.update();
        debug!("online updater finished");
    }

    fn update(&self) {
        let engine = self.controller.engine();
        push_window(engine, &self.controller.form().snapshot());
        self.controller
            .publish(PlotFrame::capture(engine, self.controller.is_busy()));
    }
}

/// Forward the form's pulse window to the engine; malformed text leaves the
/// engine's previous window in effect.
pub fn push_window(engine: &dyn AcquisitionEngine, values: &FormValues) {
    match values.pulse_window() {
        Some(window) => engine.set_window(window),
        None => debug!(
            "pulse window unchanged, bad input {:?} {:?} {:?}",
            values.t_min, values.t_max, values.threshold
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::mock::MockEngine, Conf, HistogramConfig};

    #[test]
    fn empty_engine_renders() {
        let engine = MockEngine::default();
        let frame = PlotFrame::capture(&engine, false);
        assert!(frame.trace.is_empty());
        assert_eq!(
            frame.histogram_summary(),
            ["Entries: 0", "Underflow: 0", "Overflow: 0"]
        );
        assert_eq!(frame.trace_summary(), ["Samples/sec: 12.3", "Online: False"]);
    }

    #[test]
    fn summaries_follow_histogram() {
        let engine = MockEngine::default();
        engine.configure_histogram(HistogramConfig::new(10, 0.0, 1.0).unwrap());
        {
            let mut h = engine.histogram.lock().unwrap();
            h.fill(-1.0);
            h.fill(0.5);
            h.fill(2.0);
            h.fill(3.0);
        }
        let frame = PlotFrame::capture(&engine, true);
        assert_eq!(
            frame.histogram_summary(),
            ["Entries: 4", "Underflow: 1", "Overflow: 2"]
        );
    }

    #[test]
    fn push_window_applies_all_or_nothing() {
        let engine = MockEngine::default();
        let mut values = FormValues::from_config(&Conf::load(None).unwrap());
        values.t_min = "5".into();
        values.t_max = "50".into();
        values.threshold = "7".into();
        push_window(&engine, &values);
        let applied = engine.window();
        assert_eq!(applied.t_min, 5);

        values.t_min = "6".into();
        values.threshold = "seven".into();
        push_window(&engine, &values);
        assert_eq!(engine.window(), applied);
    }

    #[test]
    fn marker_geometry() {
        let frame = PlotFrame {
            window: PulseWindow {
                t_min: 100,
                t_max: 900,
                threshold: 50,
            },
            ..Default::default()
        };
        let [lo, hi, thr] = frame.markers();
        assert_eq!(lo, (MarkerRole::LowerBound, [(100.0, 0.0), (100.0, ADC_RANGE)]));
        assert_eq!(hi.0, MarkerRole::UpperBound);
        assert_eq!(thr.1, [(0.0, 50.0), (TRACE_LEN, 50.0)]);
    }
}
