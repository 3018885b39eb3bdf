use crate::{
    parse_event_count, AcquisitionEngine, HistogramWriter, OnlineUpdater, OperatorForm, PlotFrame,
};
use anyhow::Result;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_updater(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("online updater panicked");
    }
}

/// Join the updaters that already exited, without waiting on the others.
fn reap_finished(updaters: &mut Vec<JoinHandle<()>>) {
    let (done, running): (Vec<_>, Vec<_>) =
        updaters.drain(..).partition(|h| h.is_finished());
    *updaters = running;
    done.into_iter().for_each(join_updater);
}

/// Gate that keeps one run's online updater looping.
///
/// A fresh signal is raised for every run, so an updater still finishing its
/// trailing pass never sees the signal of the run that replaced it.
#[derive(Debug)]
pub struct RunSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl RunSignal {
    pub fn raised() -> Self {
        Self {
            raised: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    pub fn is_raised(&self) -> bool {
        *lock(&self.raised)
    }

    pub fn clear(&self) {
        *lock(&self.raised) = false;
        self.cond.notify_all();
    }

    /// Sleep for up to `timeout`, waking early if the signal is cleared.
    /// Returns true if the signal is cleared on return.
    pub fn wait_cleared(&self, timeout: Duration) -> bool {
        let guard = lock(&self.raised);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |raised| *raised)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}

/// Owns the acquisition lifecycle and the authoritative `busy` flag.
pub struct RunController {
    engine: Arc<dyn AcquisitionEngine>,
    form: Arc<OperatorForm>,
    frames: Sender<PlotFrame>,
    update_period: Duration,
    busy: AtomicBool,
    signal: Mutex<Option<Arc<RunSignal>>>,
    /// Updater threads not yet joined. Only the newest can belong to a live
    /// run; older ones have their signal cleared and are finishing.
    updaters: Mutex<Vec<JoinHandle<()>>>,
}

impl RunController {
    pub fn new(
        engine: Arc<dyn AcquisitionEngine>,
        form: Arc<OperatorForm>,
        frames: Sender<PlotFrame>,
        update_period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            form,
            frames,
            update_period,
            busy: AtomicBool::new(false),
            signal: Mutex::new(None),
            updaters: Mutex::new(Vec::new()),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn engine(&self) -> &dyn AcquisitionEngine {
        self.engine.as_ref()
    }

    pub fn form(&self) -> &OperatorForm {
        &self.form
    }

    pub fn update_period(&self) -> Duration {
        self.update_period
    }

    pub(crate) fn publish(&self, frame: PlotFrame) {
        if self.frames.send(frame).is_err() {
            debug!("display gone, frame dropped");
        }
    }

    /// Begin a run capped at `max_events` (0 = unbounded).
    ///
    /// Ignored while a run is in flight or when the histogram fields do not
    /// parse. Returns whether a run was started.
    pub fn start(self: &Arc<Self>, max_events: u64) -> bool {
        if self.is_busy() {
            debug!("start ignored, run already in progress");
            return false;
        }

        let values = self.form.snapshot();
        let Some(hist_config) = values.histogram_config() else {
            warn!(
                "start ignored, bad histogram settings: bins {:?}, min {:?}, max {:?}",
                values.n_bins, values.x_min, values.x_max
            );
            return false;
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.engine.configure_histogram(hist_config);
        self.engine.set_max_events(max_events);
        let device = values.device.trim();
        self.engine.begin(device);

        let signal = Arc::new(RunSignal::raised());
        *lock(&self.signal) = Some(Arc::clone(&signal));

        let updater = OnlineUpdater::new(Arc::clone(self), signal);
        match thread::Builder::new()
            .name("online-update".into())
            .spawn(move || updater.run())
        {
            Ok(handle) => {
                let mut updaters = lock(&self.updaters);
                reap_finished(&mut updaters);
                updaters.push(handle);
                drop(updaters);
                info!("run started on {device}, max events {max_events}");
                true
            }
            Err(e) => {
                error!("cannot spawn online updater: {e}");
                self.stop();
                false
            }
        }
    }

    /// "Run for events": start only if `text` is a positive integer.
    pub fn start_for_events(self: &Arc<Self>, text: &str) -> bool {
        match parse_event_count(text) {
            Some(n) => self.start(n),
            None => {
                warn!("run for events ignored, bad count {text:?}");
                false
            }
        }
    }

    /// End the current run. Safe to call in any state; does not wait for the updater.
    pub fn stop(&self) {
        let signal = lock(&self.signal).take();
        self.teardown(signal);
    }

    /// Stop on behalf of the updater owning `signal`, if its run is still the current one.
    pub(crate) fn stop_run(&self, signal: &Arc<RunSignal>) {
        let mut current = lock(&self.signal);
        if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, signal)) {
            let taken = current.take();
            drop(current);
            info!("run ended by the engine");
            self.teardown(taken);
        }
    }

    fn teardown(&self, signal: Option<Arc<RunSignal>>) {
        self.engine.end();
        if let Some(signal) = signal {
            signal.clear();
        }
        if self.busy.swap(false, Ordering::AcqRel) {
            info!("run stopped");
        }
    }

    /// Write the engine's current histogram to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut out = HistogramWriter::create(path)?;
        self.engine.persist_histogram(&mut out)?;
        out.close()?;
        info!("histogram saved to {}", path.display());
        Ok(())
    }

    /// Final forced stop at exit, waiting for every updater to finish.
    pub fn shutdown(&self) {
        self.stop();
        let updaters = std::mem::take(&mut *lock(&self.updaters));
        for handle in updaters {
            join_updater(handle);
        }
    }

    #[cfg(test)]
    fn current_signal(&self) -> Option<Arc<RunSignal>> {
        lock(&self.signal).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::mock::MockEngine, Conf, Field, FormValues, HistogramConfig, PulseWindow};
    use crossbeam_channel::{unbounded, Receiver};
    use std::time::Instant;

    const PERIOD: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_secs(3);

    fn setup(period: Duration) -> (Arc<MockEngine>, Arc<RunController>, Receiver<PlotFrame>) {
        let engine = Arc::new(MockEngine::default());
        let form = Arc::new(OperatorForm::new(FormValues::from_config(
            &Conf::load(None).unwrap(),
        )));
        let (tx, rx) = unbounded();
        let controller = RunController::new(engine.clone(), form, tx, period);
        (engine, controller, rx)
    }

    /// Frames left in the channel once the updater has been joined.
    fn drain(rx: &Receiver<PlotFrame>) -> Vec<PlotFrame> {
        rx.try_iter().collect()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let t0 = Instant::now();
        while !cond() {
            assert!(t0.elapsed() < WAIT, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn signal_wait_wakes_on_clear() {
        let signal = Arc::new(RunSignal::raised());
        assert!(!signal.wait_cleared(Duration::from_millis(5)));

        let s = Arc::clone(&signal);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            s.clear();
        });
        let t0 = Instant::now();
        assert!(signal.wait_cleared(Duration::from_secs(10)));
        assert!(t0.elapsed() < Duration::from_secs(5));
        assert!(!signal.is_raised());
        t.join().unwrap();
    }

    #[test]
    fn repeated_start_keeps_a_single_run() {
        let (engine, controller, rx) = setup(Duration::from_millis(150));

        assert!(controller.start(0));
        assert!(!controller.start(0));
        assert!(!controller.start(7));
        assert!(!controller.start_for_events("3"));
        assert_eq!(engine.begins(), 1);
        assert_eq!(engine.max_events.load(Ordering::SeqCst), 0);

        rx.recv_timeout(WAIT).unwrap();
        controller.shutdown();

        // one updater, so exactly one trailing frame
        let offline = drain(&rx).iter().filter(|f| !f.online).count();
        assert_eq!(offline, 1);
    }

    #[test]
    fn stop_in_any_state_leaves_run_idle() {
        let (engine, controller, _rx) = setup(PERIOD);

        controller.stop();
        controller.stop();
        assert!(!controller.is_busy());
        assert!(controller.current_signal().is_none());

        controller.start(0);
        let signal = controller.current_signal().unwrap();
        assert!(controller.is_busy());
        assert!(signal.is_raised());

        controller.stop();
        controller.stop();
        assert!(!controller.is_busy());
        assert!(!signal.is_raised());
        assert!(controller.current_signal().is_none());
        assert!(engine.ends() >= 2);
        controller.shutdown();
    }

    #[test]
    fn exactly_one_render_after_stop() {
        let (_engine, controller, rx) = setup(Duration::from_millis(150));

        controller.start(0);
        let first = rx.recv_timeout(WAIT).unwrap();
        assert!(first.online);

        // the updater is now in its period wait
        controller.stop();
        controller.shutdown();

        let after = drain(&rx);
        assert_eq!(after.len(), 1);
        assert!(!after[0].online);
    }

    #[test]
    fn malformed_window_keeps_previous_values() {
        let (engine, controller, rx) = setup(PERIOD);
        controller.form().set(Field::TMin, "abc");

        controller.start(0);
        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(engine.window_sets.load(Ordering::SeqCst), 0);
        assert_eq!(frame.window, PulseWindow::default());

        controller.form().set(Field::TMin, "10");
        wait_until(|| engine.window().t_min == 10);
        controller.form().set(Field::TMax, "");
        let before = engine.window();
        rx.recv_timeout(WAIT).unwrap();
        rx.recv_timeout(WAIT).unwrap();
        assert_eq!(engine.window(), before);
        controller.shutdown();
    }

    #[test]
    fn run_for_events_needs_positive_count() {
        let (engine, controller, _rx) = setup(PERIOD);

        assert!(!controller.start_for_events("0"));
        assert!(!controller.start_for_events("abc"));
        assert!(!controller.start_for_events("-4"));
        assert!(!controller.is_busy());
        assert_eq!(engine.begins(), 0);

        assert!(controller.start_for_events("5"));
        assert!(controller.is_busy());
        assert_eq!(engine.max_events.load(Ordering::SeqCst), 5);
        controller.shutdown();
    }

    #[test]
    fn bad_histogram_fields_drop_the_start() {
        let (engine, controller, _rx) = setup(PERIOD);
        controller.form().set(Field::NBins, "many");

        assert!(!controller.start(0));
        assert!(!controller.is_busy());
        assert_eq!(engine.begins(), 0);

        controller.form().set(Field::NBins, "18446744073709551615");
        assert!(!controller.start(0));
        assert!(!controller.is_busy());
        assert_eq!(engine.begins(), 0);
        assert_eq!(engine.histogram().config(), HistogramConfig::default());
    }

    #[test]
    fn operator_session_with_window_and_stop() {
        let (engine, controller, rx) = setup(PERIOD);
        controller.form().set(Field::TMin, "100");
        controller.form().set(Field::TMax, "900");
        controller.form().set(Field::Threshold, "50");

        controller.start(0);
        assert_eq!(engine.devices.lock().unwrap().as_slice(), ["/dev/usbtmc0"]);
        assert!(engine.is_run_active());

        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(
            frame.window,
            PulseWindow {
                t_min: 100,
                t_max: 900,
                threshold: 50
            }
        );
        let markers = frame.markers();
        assert_eq!(markers[0].1[0].0, 100.0);
        assert_eq!(markers[1].1[0].0, 900.0);
        assert_eq!(markers[2].1[0].1, 50.0);
        assert_eq!(frame.trace_summary()[1], "Online: True");

        controller.stop();
        assert!(!controller.is_busy());
        controller.shutdown();
        let last = drain(&rx).pop().unwrap();
        assert_eq!(last.trace_summary()[1], "Online: False");
    }

    #[test]
    fn engine_completion_stops_the_run() {
        let (engine, controller, rx) = setup(PERIOD);

        controller.start(0);
        rx.recv_timeout(WAIT).unwrap();
        engine.finish();

        wait_until(|| !controller.is_busy());
        assert!(controller.current_signal().is_none());
        controller.shutdown();

        let offline = rx.try_iter().filter(|f| !f.online).count();
        assert_eq!(offline, 1);
        assert!(engine.ends() >= 1);
    }

    #[test]
    fn restart_after_stop() {
        let (engine, controller, _rx) = setup(PERIOD);

        assert!(controller.start(0));
        controller.stop();
        assert!(controller.start(0));
        assert!(controller.is_busy());
        assert_eq!(engine.begins(), 2);
        controller.shutdown();
        assert!(!controller.is_busy());
    }

    #[test]
    fn start_after_stop_does_not_wait_for_the_old_updater() {
        let (engine, controller, rx) = setup(Duration::from_millis(400));

        assert!(controller.start(0));
        controller.stop();

        let t0 = Instant::now();
        assert!(controller.start(0));
        assert!(t0.elapsed() < Duration::from_millis(200));
        assert!(controller.is_busy());
        assert_eq!(engine.begins(), 2);

        // the first run's signal is gone, only the new run is live
        let signal = controller.current_signal().unwrap();
        assert!(signal.is_raised());

        controller.shutdown();
        assert!(!controller.is_busy());
        assert!(lock(&controller.updaters).is_empty());
        // one trailing frame per updater
        assert_eq!(drain(&rx).len(), 2);
    }

    #[test]
    fn save_writes_while_idle() {
        let (engine, controller, _rx) = setup(PERIOD);
        engine.histogram.lock().unwrap().fill(3.0);
        let path = std::env::temp_dir().join(format!("pulse_daq_save_{}.json", std::process::id()));

        controller.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("adc_sum"));
        std::fs::remove_file(&path).ok();
    }
}
