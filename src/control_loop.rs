//! Periodic temperature sampling and fan power control.
//!
//! All state shared between the loop and the lifecycle side sits in
//! [`ControlState`] behind one mutex, paired with one condition variable.
//! Waiters re-check their condition after every wake-up; state changes wake
//! all waiters.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicI16, Ordering},
    },
    time::Instant,
};

use log::{debug, info};

use crate::{
    drivers::{ButtonLine, FanBus},
    error::Result,
    sensors::{SampleWindow, TemperatureSource},
    settings::{FanMode, Settings},
};

/// State guarded by [`SharedControl`].
#[derive(Debug)]
pub struct ControlState {
    pub stopping: bool,
    pub quitting: bool,
    pub restarting: bool,
    /// Starts set so the first cycle runs right away.
    pub settings_changed: bool,
    pub settings: Arc<Settings>,
    pub bus: Box<dyn FanBus>,
    pub button: Option<Box<dyn ButtonLine>>,
}

/// The shared lock and its condition variable.
///
/// Status readers (D-Bus properties) use lock-free copies instead, since the
/// stop sequence holds the lock across bus writes and external commands.
#[derive(Debug)]
pub struct SharedControl {
    state: Mutex<ControlState>,
    cv: Condvar,
    /// Last power written to the bus, -1 before the first write.
    fan_power: AtomicI16,
    stopped: AtomicBool,
}

impl SharedControl {
    pub fn new(
        settings: Arc<Settings>,
        bus: Box<dyn FanBus>,
        button: Option<Box<dyn ButtonLine>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ControlState {
                stopping: false,
                quitting: false,
                restarting: false,
                settings_changed: true,
                settings,
                bus,
                button,
            }),
            cv: Condvar::new(),
            fan_power: AtomicI16::new(-1),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    pub fn wait<'a>(&self, guard: MutexGuard<'a, ControlState>) -> MutexGuard<'a, ControlState> {
        self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until notified or until `deadline`, whichever comes first.
    pub fn wait_until<'a>(
        &self,
        guard: MutexGuard<'a, ControlState>,
        deadline: Instant,
    ) -> MutexGuard<'a, ControlState> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.cv
            .wait_timeout(guard, timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0)
    }

    /// Enters the stop transition.
    ///
    /// Returns `None` when a stop already happened. Otherwise the returned
    /// guard holds the lock; dropping it marks the state as stopping and
    /// wakes every waiter, even when the cleanup in between fails.
    pub fn begin_stop(&self) -> Option<StopGuard<'_>> {
        let state = self.lock();
        if state.stopping {
            return None;
        }
        Some(StopGuard {
            state,
            shared: self,
        })
    }

    /// Set once the stop sequence has finished.
    pub fn is_stopping(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn record_fan_power(&self, power: u8) {
        self.fan_power.store(i16::from(power), Ordering::Release);
    }

    pub fn fan_power(&self) -> Option<u8> {
        u8::try_from(self.fan_power.load(Ordering::Acquire)).ok()
    }
}

/// Lock held for the duration of the stop sequence.
pub struct StopGuard<'a> {
    state: MutexGuard<'a, ControlState>,
    shared: &'a SharedControl,
}

impl Deref for StopGuard<'_> {
    type Target = ControlState;

    fn deref(&self) -> &ControlState {
        &self.state
    }
}

impl DerefMut for StopGuard<'_> {
    fn deref_mut(&mut self) -> &mut ControlState {
        &mut self.state
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.state.stopping = true;
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.cv.notify_all();
    }
}

/// The sampling loop. Runs on its own blocking thread until stopped.
pub struct ControlLoop<S> {
    shared: Arc<SharedControl>,
    source: S,
    window: SampleWindow,
    last_power: Option<u8>,
}

impl<S: TemperatureSource> ControlLoop<S> {
    pub fn new(shared: Arc<SharedControl>, source: S) -> Self {
        Self {
            shared,
            source,
            window: SampleWindow::new(),
            last_power: None,
        }
    }

    /// Runs until a stop is requested.
    ///
    /// A temperature or bus failure ends the loop with that error.
    pub fn run(&mut self) -> Result<()> {
        info!("control loop started");
        while let Some(settings) = self.wait_for_cycle() {
            self.cycle(&settings)?;
        }
        info!("control loop stopped");
        Ok(())
    }

    /// Blocks until the next cycle is due and returns the snapshot to use.
    ///
    /// Returns `None` once a stop has been requested.
    fn wait_for_cycle(&self) -> Option<Arc<Settings>> {
        let mut state = self.shared.lock();
        let wait_start = Instant::now();
        loop {
            if state.stopping {
                debug!("stop requested, leaving control loop");
                return None;
            }
            if state.settings_changed {
                break;
            }
            match state.settings.wait_deadline(wait_start) {
                Some(deadline) if Instant::now() >= deadline => break,
                Some(deadline) => state = self.shared.wait_until(state, deadline),
                None => state = self.shared.wait(state),
            }
        }
        state.settings_changed = false;
        Some(Arc::clone(&state.settings))
    }

    /// Samples (if needed) and applies the resulting power once.
    pub(crate) fn cycle(&mut self, settings: &Settings) -> Result<()> {
        let power = match &settings.mode {
            FanMode::Constant(power) => {
                self.window.clear();
                *power
            }
            FanMode::Thresholds(map) => {
                let reading = self.source.read_celsius()?;
                let effective = self.window.record(reading, settings.number_of_checks);
                debug!("cpu temperature {reading}°C, effective {effective}°C");
                map.power_for(effective)
            }
        };
        self.apply(power)
    }

    fn apply(&mut self, power: u8) -> Result<()> {
        if self.last_power == Some(power) {
            debug!("fan power unchanged at {power}%");
            return Ok(());
        }

        let mut state = self.shared.lock();
        if state.stopping {
            return Ok(());
        }
        state.bus.write_power(power)?;
        self.shared.record_fan_power(power);
        self.last_power = Some(power);
        info!("fan power set to {power}%");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        drivers::testing::RecordingBus,
        error::FanError,
        sensors::MockTemperatureSource,
        settings::tests::{constant_raw, threshold_raw},
    };
    use pretty_assertions::assert_eq;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    fn thresholds() -> Arc<Settings> {
        Arc::new(Settings::from_raw(&threshold_raw()).unwrap())
    }

    fn constant(power: u8) -> Arc<Settings> {
        Arc::new(Settings::from_raw(&constant_raw(power)).unwrap())
    }

    fn readings(values: Vec<i32>) -> MockTemperatureSource {
        let mut source = MockTemperatureSource::new();
        let mut values = values.into_iter();
        source
            .expect_read_celsius()
            .returning(move || Ok(values.next().unwrap_or(40)));
        source
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn request_stop(shared: &SharedControl) {
        drop(shared.begin_stop());
    }

    #[test]
    fn window_maximum_drives_power() {
        let bus = RecordingBus::new();
        let settings = thresholds();
        let shared = SharedControl::new(settings.clone(), Box::new(bus.clone()), None);
        let mut control = ControlLoop::new(shared, readings(vec![40, 55, 42, 30, 29, 28]));

        for _ in 0..6 {
            control.cycle(&settings).unwrap();
        }

        // 55°C holds 50% until it leaves the three-sample window
        assert_eq!(bus.writes(), vec![20, 50, 20]);
    }

    #[test]
    fn same_power_twice_writes_once() {
        let bus = RecordingBus::new();
        let settings = thresholds();
        let shared = SharedControl::new(settings.clone(), Box::new(bus.clone()), None);
        let mut control = ControlLoop::new(shared.clone(), readings(vec![55, 56]));

        control.cycle(&settings).unwrap();
        control.cycle(&settings).unwrap();

        assert_eq!(bus.writes(), vec![50]);
        assert_eq!(shared.fan_power(), Some(50));
    }

    #[test]
    fn constant_mode_skips_sampling() {
        let bus = RecordingBus::new();
        let settings = constant(35);
        let shared = SharedControl::new(settings.clone(), Box::new(bus.clone()), None);
        let mut source = MockTemperatureSource::new();
        source.expect_read_celsius().never();
        let mut control = ControlLoop::new(shared, source);

        control.cycle(&settings).unwrap();
        control.cycle(&settings).unwrap();
        assert_eq!(bus.writes(), vec![35]);
    }

    #[test]
    fn switching_to_constant_clears_window() {
        let bus = RecordingBus::new();
        let shared = SharedControl::new(thresholds(), Box::new(bus.clone()), None);
        let mut control = ControlLoop::new(shared, readings(vec![75, 20]));

        control.cycle(&thresholds()).unwrap();
        control.cycle(&constant(10)).unwrap();
        assert!(control.window.is_empty());
        // the 75°C spike is gone after switching back
        control.cycle(&thresholds()).unwrap();
        assert_eq!(bus.writes(), vec![80, 10, 0]);
    }

    #[test]
    fn no_write_after_stop() {
        let bus = RecordingBus::new();
        let settings = constant(60);
        let shared = SharedControl::new(settings.clone(), Box::new(bus.clone()), None);
        let mut control = ControlLoop::new(shared.clone(), readings(vec![]));

        request_stop(&shared);
        control.cycle(&settings).unwrap();
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn bus_failure_ends_loop() {
        let bus = RecordingBus::failing_on(50);
        let shared = SharedControl::new(thresholds(), Box::new(bus), None);
        let mut control = ControlLoop::new(shared, readings(vec![55]));

        let err = control.run().unwrap_err();
        assert!(matches!(err, FanError::BusTransport { .. }));
    }

    #[test]
    fn temperature_failure_ends_loop() {
        let bus = RecordingBus::new();
        let shared = SharedControl::new(thresholds(), Box::new(bus.clone()), None);
        let mut source = MockTemperatureSource::new();
        source.expect_read_celsius().times(1).returning(|| {
            Err(FanError::TemperatureRead {
                source_name: "zone".into(),
                reason: "unreadable".into(),
            })
        });
        let mut control = ControlLoop::new(shared, source);

        assert!(matches!(
            control.run(),
            Err(FanError::TemperatureRead { .. })
        ));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn stop_wakes_waiting_loop() {
        let bus = RecordingBus::new();
        let shared = SharedControl::new(constant(40), Box::new(bus.clone()), None);
        let mut control = ControlLoop::new(shared.clone(), readings(vec![]));
        let handle = thread::spawn(move || control.run());

        wait_for(|| bus.writes() == vec![40]);
        let started = Instant::now();
        request_stop(&shared);
        handle.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn settings_change_cuts_wait_short() {
        let bus = RecordingBus::new();
        let shared = SharedControl::new(thresholds(), Box::new(bus.clone()), None);
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let mut source = MockTemperatureSource::new();
        source.expect_read_celsius().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(55)
        });
        let mut control = ControlLoop::new(shared.clone(), source);
        let handle = thread::spawn(move || control.run());

        wait_for(|| bus.writes() == vec![50]);
        thread::sleep(Duration::from_secs(1));

        let changed_at = Instant::now();
        {
            let mut state = shared.lock();
            state.settings = constant(30);
            state.settings_changed = true;
        }
        shared.notify_all();

        wait_for(|| bus.writes() == vec![50, 30]);
        assert!(changed_at.elapsed() < Duration::from_secs(2));
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        request_stop(&shared);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn interval_expiry_samples_again() {
        let mut raw = threshold_raw();
        raw.insert("checkinterval", "1");
        let shared = SharedControl::new(
            Arc::new(Settings::from_raw(&raw).unwrap()),
            Box::new(RecordingBus::new()),
            None,
        );
        let reads = Arc::new(Mutex::new(Vec::new()));
        let log = reads.clone();
        let mut source = MockTemperatureSource::new();
        source.expect_read_celsius().returning(move || {
            log.lock().unwrap().push(Instant::now());
            Ok(45)
        });
        let mut control = ControlLoop::new(shared.clone(), source);
        let handle = thread::spawn(move || control.run());

        wait_for(|| reads.lock().unwrap().len() >= 2);
        request_stop(&shared);
        handle.join().unwrap().unwrap();

        let reads = reads.lock().unwrap();
        let gap = reads[1].duration_since(reads[0]);
        assert!(gap >= Duration::from_millis(900), "second sample after {gap:?}");
        assert!(gap < Duration::from_secs(3), "second sample after {gap:?}");
    }

    #[test]
    fn huge_interval_waits_without_deadline() {
        let bus = RecordingBus::new();
        let mut settings = Settings::from_raw(&threshold_raw()).unwrap();
        settings.check_interval = Duration::MAX;
        let shared = SharedControl::new(Arc::new(settings), Box::new(bus.clone()), None);
        let mut control = ControlLoop::new(shared.clone(), readings(vec![55]));
        let handle = thread::spawn(move || control.run());

        wait_for(|| bus.writes() == vec![50]);
        request_stop(&shared);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn status_is_readable_while_stop_holds_the_lock() {
        let shared = SharedControl::new(constant(10), Box::new(RecordingBus::new()), None);
        shared.record_fan_power(70);

        let guard = shared.begin_stop();
        assert!(guard.is_some());
        assert_eq!(shared.fan_power(), Some(70));
        assert!(!shared.is_stopping());
        drop(guard);

        assert!(shared.is_stopping());
    }

    #[test]
    fn begin_stop_runs_once() {
        let shared = SharedControl::new(constant(10), Box::new(RecordingBus::new()), None);
        assert!(!shared.is_stopping());
        {
            let guard = shared.begin_stop();
            assert!(guard.is_some());
        }
        assert!(shared.is_stopping());
        assert!(shared.begin_stop().is_none());
    }
}
