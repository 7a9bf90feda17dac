//! Per-channel replay scheduler.
//!
//! A [`ChannelScheduler`] owns one worker thread that executes a single channel's
//! translated events against an injector, each at `start + offset`:
//!
//! ```text
//! arm()  ──► Armed ──activate(start)──► Running ──last event + grace──► Draining ──► Stopped
//!              │                           │                                        ▲
//!              └──────── shutdown_now() ───┴────────────────────────────────────────┘
//! ```
//!
//! The worker blocks on a one-shot start gate until [`activate`](ChannelScheduler::activate)
//! publishes the shared start instant, then walks the plan in offset order (ties in
//! recorded order), waiting for each deadline with [`clock::wait_until`]. After the last
//! event plus the drain grace it force-releases whatever is still held and stops.
//!
//! Schedulers are single-use. The orchestrator builds a fresh one per channel per
//! iteration, so no held codes or timers carry over.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{self, Precision, Wait};
use crate::device::{Injector, InjectorSource, SharedInjector};
use crate::error::{Error, Result};
use crate::event::{Channel, Point};
use crate::held::HeldSet;
use crate::keycode::DeviceCode;
use crate::translate::{ReplayAction, TranslatedEvent};

/// Longest [`ChannelScheduler::force_release_held`] waits for a busy injector.
pub const FORCE_RELEASE_LOCK_WAIT: Duration = Duration::from_millis(20);

/// Lifecycle of a [`ChannelScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Armed = 1,
    Running = 2,
    Draining = 3,
    Stopped = 4,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Armed,
            2 => SchedulerState::Running,
            3 => SchedulerState::Draining,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Timing knobs shared by every scheduler of a replay.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerOptions {
    /// Delay between the last event and the drain.
    pub drain_grace: Duration,
    pub precision: Precision,
    /// Recorded coordinates are divided by this before injection.
    pub dpi_scale: f64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            drain_grace: Duration::from_millis(100),
            precision: Precision::default(),
            dpi_scale: 1.0,
        }
    }
}

/// Counters for one scheduler run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChannelReport {
    pub events: usize,
    pub fired: usize,
    /// Injection calls that returned an error.
    pub failed: usize,
    /// Codes released by a drain rather than by a recorded release.
    pub forced_releases: usize,
    pub cancelled: bool,
    /// Worst observed `fired − (start + offset)`, in microseconds.
    pub max_lateness_us: u64,
}

enum GateState {
    Closed,
    Open(Instant),
    Cancelled,
}

/// One-shot latch carrying the start instant.
struct StartGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            cv: Condvar::new(),
        }
    }

    /// Publish the start instant. Fails if the gate was already opened or cancelled.
    fn open(&self, start: Instant) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, GateState::Closed) {
            return false;
        }
        *state = GateState::Open(start);
        self.cv.notify_all();
        true
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if matches!(*state, GateState::Closed) {
            *state = GateState::Cancelled;
            self.cv.notify_all();
        }
    }

    /// Block until opened (`Some(start)`) or cancelled (`None`).
    fn wait(&self) -> Option<Instant> {
        let mut state = self.state.lock();
        loop {
            match *state {
                GateState::Open(start) => return Some(start),
                GateState::Cancelled => return None,
                GateState::Closed => self.cv.wait(&mut state),
            }
        }
    }
}

/// State shared between the scheduler handle and its worker.
struct Shared {
    channel: Channel,
    state: AtomicU8,
    cancel: AtomicBool,
    gate: StartGate,
    held: HeldSet,
    injector: SharedInjector,
    report: Mutex<ChannelReport>,
    gate_passed_at: Mutex<Option<Instant>>,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Worker-side drain. Blocks on the injector.
    fn release_held(&self) -> usize {
        let codes = self.held.drain();
        if codes.is_empty() {
            return 0;
        }
        let mut injector = self.injector.lock();
        self.release_codes(&mut **injector, &codes)
    }

    fn release_codes(&self, injector: &mut dyn Injector, codes: &[DeviceCode]) -> usize {
        for code in codes {
            warn!(channel = %self.channel, %code, "still held, releasing");
            if let Err(e) = injector.release(*code) {
                error!(channel = %self.channel, %code, error = %e, "forced release failed");
            }
        }
        self.report.lock().forced_releases += codes.len();
        codes.len()
    }
}

/// Executes one channel's events on a dedicated worker thread.
pub struct ChannelScheduler {
    shared: Arc<Shared>,
    expected: Duration,
    done_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl ChannelScheduler {
    /// Acquire an injector, pre-compute the plan and park the worker on the start gate.
    ///
    /// Fails with [`Error::InjectorUnavailable`] when the source cannot provide an
    /// injector; nothing is spawned in that case.
    pub fn arm(
        channel: Channel,
        events: Arc<[TranslatedEvent]>,
        source: &dyn InjectorSource,
        options: SchedulerOptions,
    ) -> Result<Self> {
        let injector = source
            .acquire(channel)
            .map_err(|source| Error::InjectorUnavailable { channel, source })?;

        // Stable: equal offsets keep recorded order. The shared list itself is untouched.
        let mut plan: Vec<usize> = (0..events.len()).collect();
        plan.sort_by_key(|&i| (events[i].offset, events[i].index));
        let max_offset = events.iter().map(|e| e.offset).max().unwrap_or_default();

        let shared = Arc::new(Shared {
            channel,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            cancel: AtomicBool::new(false),
            gate: StartGate::new(),
            held: HeldSet::new(),
            injector,
            report: Mutex::new(ChannelReport {
                events: events.len(),
                ..ChannelReport::default()
            }),
            gate_passed_at: Mutex::new(None),
        });

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("retrace-{channel}"))
            .spawn(move || run_worker(worker_shared, events, plan, max_offset, options, done_tx))?;

        shared.set_state(SchedulerState::Armed);
        debug!(%channel, max_offset_ms = max_offset.as_millis() as u64, "scheduler armed");

        Ok(Self {
            shared,
            expected: max_offset + options.drain_grace,
            done_rx,
            worker: Some(handle),
        })
    }

    pub fn channel(&self) -> Channel {
        self.shared.channel
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Time from the start instant until the drain runs.
    pub fn expected_duration(&self) -> Duration {
        self.expected
    }

    /// Release the worker at `start`. Returns the expected duration measured from `start`.
    pub fn activate(&self, start: Instant) -> Result<Duration> {
        let channel = self.shared.channel;
        if let Err(current) = self.shared.state.compare_exchange(
            SchedulerState::Armed as u8,
            SchedulerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match SchedulerState::from_u8(current) {
                SchedulerState::Stopped => Error::SchedulerStopped(channel),
                _ => Error::AlreadyActivated(channel),
            });
        }
        if !self.shared.gate.open(start) {
            // shutdown_now() won the race.
            return Err(Error::SchedulerStopped(channel));
        }
        Ok(self.expected)
    }

    /// Release every held code. Safe from any thread, any number of times.
    ///
    /// Waits at most [`FORCE_RELEASE_LOCK_WAIT`] for the injector. If a call in progress
    /// keeps it busy past that, the releases are handed to a background thread that
    /// performs them once the call returns. Returns how many codes were released before
    /// this call returned.
    pub fn force_release_held(&self) -> usize {
        let shared = &self.shared;
        let codes = shared.held.drain();
        if codes.is_empty() {
            return 0;
        }
        if let Some(mut injector) = shared.injector.try_lock_for(FORCE_RELEASE_LOCK_WAIT) {
            return shared.release_codes(&mut **injector, &codes);
        }

        let channel = shared.channel;
        warn!(%channel, held = codes.len(), "injector busy, releasing in the background");
        let deferred = Arc::clone(shared);
        let pending = codes.clone();
        let spawned = thread::Builder::new()
            .name(format!("retrace-{channel}-release"))
            .spawn(move || {
                let mut injector = deferred.injector.lock();
                deferred.release_codes(&mut **injector, &pending);
            });
        if let Err(e) = spawned {
            error!(
                %channel,
                error = %e,
                "cannot start release thread, leaving codes to the worker"
            );
            for code in codes {
                shared.held.press(code);
            }
        }
        0
    }

    /// Cancel every event that has not fired yet. Does not block; an injection call in
    /// progress is allowed to finish.
    pub fn shutdown_now(&self) {
        if !self.shared.cancel.swap(true, Ordering::AcqRel) {
            debug!(channel = %self.shared.channel, "shutdown requested");
        }
        self.shared.gate.cancel();
    }

    /// Wait up to `timeout` for the worker to reach `Stopped`.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        if self.state() == SchedulerState::Stopped {
            return true;
        }
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Instant at which the worker left the start gate.
    pub fn gate_passed_at(&self) -> Option<Instant> {
        *self.shared.gate_passed_at.lock()
    }

    pub fn held_count(&self) -> usize {
        self.shared.held.len()
    }

    pub fn report(&self) -> ChannelReport {
        self.shared.report.lock().clone()
    }
}

impl Drop for ChannelScheduler {
    fn drop(&mut self) {
        self.shutdown_now();
        // A worker stuck inside an injection call is detached rather than joined.
        if self.wait_stopped(Duration::from_millis(50)) {
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_worker(
    shared: Arc<Shared>,
    events: Arc<[TranslatedEvent]>,
    plan: Vec<usize>,
    max_offset: Duration,
    options: SchedulerOptions,
    done: Sender<()>,
) {
    let channel = shared.channel;
    let mut cancelled = true;

    if let Some(start) = shared.gate.wait() {
        *shared.gate_passed_at.lock() = Some(Instant::now());
        cancelled = false;

        for &i in &plan {
            let event = &events[i];
            let deadline = start + event.offset;
            if clock::wait_until(deadline, options.precision, &shared.cancel) == Wait::Cancelled {
                cancelled = true;
                break;
            }
            let lateness = Instant::now().saturating_duration_since(deadline);
            execute(&shared, event, options.dpi_scale);

            let mut report = shared.report.lock();
            report.fired += 1;
            report.max_lateness_us = report.max_lateness_us.max(lateness.as_micros() as u64);
        }

        if !cancelled {
            let drain_at = start + max_offset + options.drain_grace;
            cancelled =
                clock::wait_until(drain_at, options.precision, &shared.cancel) == Wait::Cancelled;
        }
    }

    shared.set_state(SchedulerState::Draining);
    if cancelled {
        info!(%channel, "replay cancelled");
    } else {
        info!(%channel, "replay finished");
    }
    shared.release_held();
    shared.report.lock().cancelled = cancelled;
    shared.set_state(SchedulerState::Stopped);
    let _ = done.send(());
}

fn execute(shared: &Shared, event: &TranslatedEvent, dpi_scale: f64) {
    debug!(
        channel = %shared.channel,
        offset_ms = event.offset.as_millis() as u64,
        action = ?event.action,
        "executing"
    );
    let mut injector = shared.injector.lock();
    let result = match event.action {
        ReplayAction::Press { code, at } => {
            if let Some(p) = at {
                let (x, y) = scale(p, dpi_scale);
                if let Err(e) = injector.move_cursor(x, y) {
                    error!(channel = %shared.channel, error = %e, "cursor move failed");
                }
            }
            shared.held.press(code);
            injector.press(code)
        }
        ReplayAction::Release { code, at } => {
            if let Some(p) = at {
                let (x, y) = scale(p, dpi_scale);
                if let Err(e) = injector.move_cursor(x, y) {
                    error!(channel = %shared.channel, error = %e, "cursor move failed");
                }
            }
            shared.held.release(code);
            injector.release(code)
        }
        ReplayAction::Move { to } => {
            let (x, y) = scale(to, dpi_scale);
            injector.move_cursor(x, y)
        }
    };
    drop(injector);

    if let Err(e) = result {
        error!(
            channel = %shared.channel,
            offset_ms = event.offset.as_millis() as u64,
            error = %e,
            "injection failed, continuing"
        );
        shared.report.lock().failed += 1;
    }
}

/// Map a recorded position to injection coordinates.
pub fn scale(p: Point, dpi_scale: f64) -> (i32, i32) {
    if dpi_scale == 1.0 {
        return (p.x, p.y);
    }
    (
        (f64::from(p.x) / dpi_scale).round() as i32,
        (f64::from(p.y) / dpi_scale).round() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Op, VirtualInjector, VirtualLog};
    use crate::device::{share, Connected};
    use crate::error::InjectError;
    use crate::event::{EventLog, InputEvent, KeyAction, PointerAction};
    use crate::keycode::{button, vc, Button, DeviceCode, Key};
    use crate::translate::translate;

    fn virtual_source() -> (Connected, VirtualLog) {
        let inj = VirtualInjector::new("virtual:test");
        let log = inj.log();
        (Connected::new(share(inj)), log)
    }

    fn fast() -> SchedulerOptions {
        SchedulerOptions {
            drain_grace: Duration::from_millis(20),
            ..SchedulerOptions::default()
        }
    }

    fn key_events(events: impl IntoIterator<Item = InputEvent>) -> Arc<[TranslatedEvent]> {
        translate(&EventLog::from_events(events).unwrap()).events(Channel::Key)
    }

    const A: DeviceCode = DeviceCode::Key(Key::Letter('a'));

    #[test]
    fn press_then_release_on_time() {
        let (source, log) = virtual_source();
        let events = key_events([
            InputEvent::key(0, KeyAction::Pressed, vc::A),
            InputEvent::key(100, KeyAction::Released, vc::A),
        ]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        assert_eq!(sched.state(), SchedulerState::Armed);

        let start = Instant::now() + Duration::from_millis(20);
        let expected = sched.activate(start).unwrap();
        assert_eq!(expected, Duration::from_millis(120));
        assert!(sched.wait_stopped(expected + Duration::from_secs(1)));

        let calls = log.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, Op::Press(A));
        assert_eq!(calls[1].op, Op::Release(A));
        let eps = Duration::from_millis(15);
        assert!(calls[0].at.saturating_duration_since(start) < eps);
        let release_target = start + Duration::from_millis(100);
        assert!(calls[1].at >= release_target);
        assert!(calls[1].at.saturating_duration_since(release_target) < eps);

        assert_eq!(sched.held_count(), 0);
        assert_eq!(sched.state(), SchedulerState::Stopped);
        let report = sched.report();
        assert_eq!(report.fired, 2);
        assert_eq!(report.forced_releases, 0);
        assert!(!report.cancelled);
    }

    #[test]
    fn dangling_press_is_released_by_drain() {
        let (source, log) = virtual_source();
        let events = key_events([InputEvent::key(0, KeyAction::Pressed, vc::A)]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        let expected = sched.activate(Instant::now()).unwrap();
        assert!(sched.wait_stopped(expected + Duration::from_secs(1)));

        assert_eq!(log.ops(), vec![Op::Press(A), Op::Release(A)]);
        assert_eq!(sched.held_count(), 0);
        assert_eq!(sched.report().forced_releases, 1);
        // Idempotent: nothing left to release.
        assert_eq!(sched.force_release_held(), 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn second_activation_is_rejected() {
        let (source, _log) = virtual_source();
        let events = key_events([InputEvent::key(0, KeyAction::Pressed, vc::A)]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        sched.activate(Instant::now()).unwrap();
        assert!(matches!(
            sched.activate(Instant::now()),
            Err(Error::AlreadyActivated(Channel::Key))
        ));
        assert!(sched.wait_stopped(Duration::from_secs(1)));
        assert!(matches!(
            sched.activate(Instant::now()),
            Err(Error::SchedulerStopped(Channel::Key))
        ));
    }

    #[test]
    fn shutdown_before_activation_stops_the_worker() {
        let (source, log) = virtual_source();
        let events = key_events([InputEvent::key(0, KeyAction::Pressed, vc::A)]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        sched.shutdown_now();
        assert!(sched.wait_stopped(Duration::from_secs(1)));
        assert!(matches!(
            sched.activate(Instant::now()),
            Err(Error::SchedulerStopped(Channel::Key))
        ));
        assert!(log.is_empty());
        assert!(sched.report().cancelled);
    }

    #[test]
    fn shutdown_mid_run_skips_the_rest_and_releases() {
        let (source, log) = virtual_source();
        let events = key_events([
            InputEvent::key(0, KeyAction::Pressed, vc::SHIFT),
            InputEvent::key(5_000, KeyAction::Released, vc::SHIFT),
        ]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        sched.activate(Instant::now()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let asked = Instant::now();
        sched.shutdown_now();
        assert!(asked.elapsed() < Duration::from_millis(5));
        assert!(sched.wait_stopped(Duration::from_secs(1)));

        let shift = DeviceCode::Key(Key::Shift);
        assert_eq!(log.ops(), vec![Op::Press(shift), Op::Release(shift)]);
        let report = sched.report();
        assert!(report.cancelled);
        assert_eq!(report.fired, 1);
        assert_eq!(report.forced_releases, 1);
    }

    #[test]
    fn failed_injection_does_not_stop_later_events() {
        let inj = VirtualInjector::new("virtual:test").fail_on(A);
        let log = inj.log();
        let source = Connected::new(share(inj));
        let events = key_events([
            InputEvent::key(0, KeyAction::Pressed, vc::A),
            InputEvent::key(5, KeyAction::Pressed, vc::B),
            InputEvent::key(10, KeyAction::Released, vc::B),
        ]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        let expected = sched.activate(Instant::now()).unwrap();
        assert!(sched.wait_stopped(expected + Duration::from_secs(1)));

        let b = DeviceCode::Key(Key::Letter('b'));
        assert_eq!(log.ops(), vec![Op::Press(b), Op::Release(b)]);
        let report = sched.report();
        assert_eq!(report.fired, 3);
        // The failed press of A plus its (also failing) forced release.
        assert_eq!(report.failed, 1);
        assert_eq!(report.forced_releases, 1);
    }

    #[test]
    fn acquisition_failure_is_reported() {
        struct NoDisplay;
        impl InjectorSource for NoDisplay {
            fn acquire(&self, _: Channel) -> std::result::Result<SharedInjector, InjectError> {
                Err(InjectError::Unavailable("no display".into()))
            }
        }
        let events = key_events([InputEvent::key(0, KeyAction::Pressed, vc::A)]);
        let err = ChannelScheduler::arm(Channel::Key, events, &NoDisplay, fast())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::InjectorUnavailable {
                channel: Channel::Key,
                ..
            }
        ));
    }

    #[test]
    fn pointer_events_move_then_click_with_scaling() {
        let (source, log) = virtual_source();
        let log_events = EventLog::from_events([
            InputEvent::pointer(0, PointerAction::Moved, button::NONE, 200, 100),
            InputEvent::pointer(5, PointerAction::Pressed, button::LEFT, 200, 100),
            InputEvent::pointer(10, PointerAction::Dragged, button::NONE, 300, 150),
            InputEvent::pointer(15, PointerAction::Released, button::LEFT, 300, 150),
        ])
        .unwrap();
        let events = translate(&log_events).events(Channel::Pointer);
        let options = SchedulerOptions {
            dpi_scale: 2.0,
            ..fast()
        };
        let sched = ChannelScheduler::arm(Channel::Pointer, events, &source, options).unwrap();
        let expected = sched.activate(Instant::now()).unwrap();
        assert!(sched.wait_stopped(expected + Duration::from_secs(1)));

        let left = DeviceCode::Button(Button::Left);
        assert_eq!(
            log.ops(),
            vec![
                Op::Move { x: 100, y: 50 },
                Op::Move { x: 100, y: 50 },
                Op::Press(left),
                Op::Move { x: 150, y: 75 },
                Op::Move { x: 150, y: 75 },
                Op::Release(left),
            ]
        );
    }

    #[test]
    fn scale_rounds_to_nearest() {
        assert_eq!(scale(Point::new(3, 5), 2.0), (2, 3));
        assert_eq!(scale(Point::new(-3, 7), 1.0), (-3, 7));
        assert_eq!(scale(Point::new(150, 96), 1.5), (100, 64));
    }

    #[test]
    fn force_release_does_not_wait_out_a_hung_call() {
        let inj = VirtualInjector::new("virtual:test").stall_on(A, Duration::from_millis(400));
        let log = inj.log();
        let source = Connected::new(share(inj));
        let events = key_events([InputEvent::key(0, KeyAction::Pressed, vc::A)]);
        let sched = ChannelScheduler::arm(Channel::Key, events, &source, fast()).unwrap();
        sched.activate(Instant::now()).unwrap();
        thread::sleep(Duration::from_millis(50));

        // The worker is inside press(A) and holds the injector.
        sched.shutdown_now();
        let asked = Instant::now();
        assert_eq!(sched.force_release_held(), 0);
        assert!(asked.elapsed() < FORCE_RELEASE_LOCK_WAIT + Duration::from_millis(30));
        assert_eq!(sched.held_count(), 0);

        assert!(sched.wait_stopped(Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.ops(), vec![Op::Press(A), Op::Release(A)]);
        assert_eq!(sched.report().forced_releases, 1);
    }
}
