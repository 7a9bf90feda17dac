//! Replay orchestration.
//!
//! [`Replayer`] owns the per-iteration protocol: arm one [`ChannelScheduler`] per
//! non-empty channel, activate them all with one shared start instant, wait (bounded)
//! for each to drain, then force-release whatever is still held. Iterations repeat
//! according to a [`RepeatPolicy`] until done or until a [`CancelHandle`] fires.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::device::InjectorSource;
use crate::error::{Error, Result};
use crate::event::{Channel, EventLog};
use crate::scheduler::{ChannelReport, ChannelScheduler, SchedulerOptions};
use crate::translate::{translate, Translation, TranslationReport};

/// Reports kept by an unbounded run; older ones are dropped.
const REPORT_HISTORY: usize = 1000;

/// How many times to replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatPolicy {
    Times(u64),
    Forever,
}

impl RepeatPolicy {
    /// `n > 0` replays `n` times and `-1` replays until cancelled. Anything else is rejected.
    pub fn from_count(count: i64) -> Result<Self> {
        match count {
            -1 => Ok(RepeatPolicy::Forever),
            n if n > 0 => Ok(RepeatPolicy::Times(n as u64)),
            n => Err(Error::InvalidRepeatCount(n)),
        }
    }

    fn allows(self, completed: u64) -> bool {
        match self {
            RepeatPolicy::Times(n) => completed < n,
            RepeatPolicy::Forever => true,
        }
    }
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        RepeatPolicy::Times(1)
    }
}

impl fmt::Display for RepeatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatPolicy::Times(1) => f.write_str("once"),
            RepeatPolicy::Times(n) => write!(f, "{n} times"),
            RepeatPolicy::Forever => f.write_str("until cancelled"),
        }
    }
}

/// Timing knobs of a replay run.
#[derive(Clone, Copy, Debug)]
pub struct ReplayOptions {
    pub scheduler: SchedulerOptions,
    /// Delay between computing the start instant and reaching it.
    pub start_lead: Duration,
    /// Extra time granted to a scheduler past its expected duration.
    pub wait_margin: Duration,
    /// Worker gate-pass lateness above which a warning is logged.
    pub max_start_skew: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            scheduler: SchedulerOptions::default(),
            start_lead: Duration::from_millis(50),
            wait_margin: Duration::from_secs(1),
            max_start_skew: Duration::from_millis(2),
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    active: Mutex<Vec<Arc<ChannelScheduler>>>,
}

/// Cloneable, idempotent cancellation of a running replay.
#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Stop the active schedulers and release their held codes. Only the first call acts;
    /// it returns `true`.
    pub fn cancel(&self) -> bool {
        if self
            .state
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let active = self.state.active.lock().clone();
        if active.is_empty() {
            debug!("cancel requested with no iteration running");
        } else {
            info!(schedulers = active.len(), "cancelling replay");
        }
        for scheduler in &active {
            scheduler.shutdown_now();
            scheduler.force_release_held();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Publish the schedulers of the current iteration. Returns `false` if a cancel
    /// already happened; the caller then stops them itself.
    fn register(&self, schedulers: &[Arc<ChannelScheduler>]) -> bool {
        self.state.active.lock().extend(schedulers.iter().cloned());
        !self.is_cancelled()
    }

    fn clear(&self) {
        self.state.active.lock().clear();
    }
}

/// Outcome of one iteration.
#[derive(Clone, Debug, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub channels: BTreeMap<Channel, ChannelReport>,
    /// Worst lateness of activation or of a worker leaving the start gate.
    pub start_skew_us: u64,
    /// Activation finished after the start instant, or a worker left the gate later
    /// than `max_start_skew`.
    pub start_skew_exceeded: bool,
    /// Channels that did not stop within their bounded wait.
    pub abandoned: Vec<Channel>,
    pub elapsed_ms: u64,
}

/// Outcome of [`Replayer::run`].
#[derive(Clone, Debug, Serialize)]
pub struct ReplaySummary {
    pub policy: RepeatPolicy,
    pub iterations: u64,
    pub cancelled: bool,
    pub translation: TranslationReport,
    /// Per-iteration reports, most recent last.
    pub reports: Vec<IterationReport>,
}

impl ReplaySummary {
    pub fn fired(&self) -> usize {
        self.channel_totals(|r| r.fired)
    }

    pub fn failed(&self) -> usize {
        self.channel_totals(|r| r.failed)
    }

    pub fn forced_releases(&self) -> usize {
        self.channel_totals(|r| r.forced_releases)
    }

    fn channel_totals(&self, f: impl Fn(&ChannelReport) -> usize) -> usize {
        self.reports
            .iter()
            .flat_map(|it| it.channels.values())
            .map(f)
            .sum()
    }
}

/// Drives channel schedulers through repeated, synchronized iterations.
pub struct Replayer {
    source: Arc<dyn InjectorSource>,
    options: ReplayOptions,
    cancel: CancelHandle,
}

impl Replayer {
    pub fn new(source: impl InjectorSource + 'static, options: ReplayOptions) -> Self {
        Self {
            source: Arc::new(source),
            options,
            cancel: CancelHandle::default(),
        }
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Handle that cancels this replayer's current and future iterations.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Translate `log` and replay it.
    pub fn run(&self, log: &EventLog, policy: RepeatPolicy) -> Result<ReplaySummary> {
        self.run_translated(&translate(log), policy)
    }

    /// Replay an already translated log.
    ///
    /// Returns normally when cancelled. Errors only for setup failures, such as an
    /// injector that cannot be acquired; the run is aborted in that case.
    pub fn run_translated(
        &self,
        translation: &Translation,
        policy: RepeatPolicy,
    ) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary {
            policy,
            iterations: 0,
            cancelled: false,
            translation: translation.report.clone(),
            reports: Vec::new(),
        };
        if translation.is_empty() {
            warn!("nothing to replay");
            summary.cancelled = self.cancel.is_cancelled();
            return Ok(summary);
        }

        info!(
            events = translation.len(),
            duration_ms = translation.duration().as_millis() as u64,
            %policy,
            "starting replay"
        );
        while policy.allows(summary.iterations) && !self.cancel.is_cancelled() {
            let iteration = summary.iterations + 1;
            let Some(report) = self.run_iteration(iteration, translation)? else {
                break;
            };
            summary.iterations = iteration;
            if summary.reports.len() == REPORT_HISTORY {
                summary.reports.remove(0);
            }
            summary.reports.push(report);
        }
        summary.cancelled = self.cancel.is_cancelled();
        info!(
            iterations = summary.iterations,
            cancelled = summary.cancelled,
            "replay done"
        );
        Ok(summary)
    }

    /// One synchronized pass over every channel. `None` if cancelled before starting.
    fn run_iteration(
        &self,
        iteration: u64,
        translation: &Translation,
    ) -> Result<Option<IterationReport>> {
        let began = Instant::now();
        let mut schedulers = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let events = translation.events(channel);
            if events.is_empty() {
                continue;
            }
            let scheduler =
                ChannelScheduler::arm(channel, events, &*self.source, self.options.scheduler)?;
            schedulers.push(Arc::new(scheduler));
        }

        if !self.cancel.register(&schedulers) {
            for scheduler in &schedulers {
                scheduler.shutdown_now();
            }
            self.cancel.clear();
            return Ok(None);
        }
        let result = self.drive(iteration, &schedulers, began);
        self.cancel.clear();
        result.map(Some)
    }

    fn drive(
        &self,
        iteration: u64,
        schedulers: &[Arc<ChannelScheduler>],
        began: Instant,
    ) -> Result<IterationReport> {
        let start = Instant::now() + self.options.start_lead;
        let mut expected = Vec::with_capacity(schedulers.len());
        for scheduler in schedulers {
            match scheduler.activate(start) {
                Ok(duration) => expected.push(duration),
                // A cancel raced the activation; the scheduler is already stopping.
                Err(Error::SchedulerStopped(_)) if self.cancel.is_cancelled() => {
                    expected.push(Duration::ZERO)
                }
                Err(e) => {
                    for s in schedulers {
                        s.shutdown_now();
                        s.force_release_held();
                    }
                    return Err(e);
                }
            }
        }
        let activated = Instant::now();
        debug!(iteration, "schedulers activated");

        let mut abandoned = Vec::new();
        for (scheduler, duration) in schedulers.iter().zip(&expected) {
            let deadline = start + *duration + self.options.wait_margin;
            let timeout = deadline.saturating_duration_since(Instant::now());
            if !scheduler.wait_stopped(timeout) {
                warn!(
                    channel = %scheduler.channel(),
                    "scheduler did not stop in time, abandoning it"
                );
                scheduler.shutdown_now();
                abandoned.push(scheduler.channel());
            }
        }
        for scheduler in schedulers {
            scheduler.force_release_held();
        }

        let (start_skew, start_skew_exceeded) = self.start_skew(start, activated, schedulers);
        let channels = schedulers
            .iter()
            .map(|s| (s.channel(), s.report()))
            .collect();
        info!(iteration, "iteration finished");
        Ok(IterationReport {
            iteration,
            channels,
            start_skew_us: start_skew.as_micros() as u64,
            start_skew_exceeded,
            abandoned,
            elapsed_ms: began.elapsed().as_millis() as u64,
        })
    }

    /// Worst start lateness, and whether it crossed the warning threshold.
    fn start_skew(
        &self,
        start: Instant,
        activated: Instant,
        schedulers: &[Arc<ChannelScheduler>],
    ) -> (Duration, bool) {
        let activation_late = activated.saturating_duration_since(start);
        let mut exceeded = !activation_late.is_zero();
        if exceeded {
            warn!(
                late_us = activation_late.as_micros() as u64,
                "activation finished after the start instant"
            );
        }
        let mut skew = activation_late;
        for scheduler in schedulers {
            let Some(passed) = scheduler.gate_passed_at() else {
                continue;
            };
            let late = passed.saturating_duration_since(start);
            if late > self.options.max_start_skew {
                warn!(
                    channel = %scheduler.channel(),
                    late_us = late.as_micros() as u64,
                    "worker left the start gate late"
                );
                exceeded = true;
            }
            skew = skew.max(late);
        }
        (skew, exceeded)
    }
}
