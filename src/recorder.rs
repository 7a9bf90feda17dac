//! Turning a capture stream into an [`EventLog`].
//!
//! The OS hook lives outside this crate. Whatever drives it sends [`CapturedInput`]
//! values over a `crossbeam_channel`; [`Recorder::record`] consumes them until the stop
//! key goes down or the sender hangs up.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::event::{EventLog, InputEvent, InputKind, KeyAction, Point, PointerAction};
use crate::keycode::vc;

/// One raw event from the capture hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapturedInput {
    pub kind: InputKind,
    /// Monotonic time at which the hook saw the event.
    pub at: Instant,
}

impl CapturedInput {
    pub fn key(action: KeyAction, code: u16, at: Instant) -> Self {
        Self {
            kind: InputKind::Key { action, code },
            at,
        }
    }

    pub fn pointer(action: PointerAction, button: u16, x: i32, y: i32, at: Instant) -> Self {
        Self {
            kind: InputKind::Pointer {
                action,
                button,
                at: Point::new(x, y),
            },
            at,
        }
    }
}

/// Why a recording ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    StopKey,
    Disconnected,
}

#[derive(Clone, Debug)]
pub struct Recording {
    pub log: EventLog,
    pub stopped_by: StopReason,
}

/// Records until a stop key.
#[derive(Clone, Copy, Debug)]
pub struct Recorder {
    stop_code: u16,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(vc::ESCAPE)
    }
}

impl Recorder {
    pub fn new(stop_code: u16) -> Self {
        Self { stop_code }
    }

    pub fn stop_code(&self) -> u16 {
        self.stop_code
    }

    /// Consume `rx` until the stop key is pressed or the stream closes.
    ///
    /// Offsets are measured from the first event received and truncated to whole
    /// milliseconds. A release of ENTER arriving
    /// first is the tail of the keystroke that started the recording and is dropped.
    pub fn record(&self, rx: &Receiver<CapturedInput>) -> Recording {
        let mut log = EventLog::new();
        let mut origin: Option<Instant> = None;
        info!(stop_code = self.stop_code, "recording");

        let stopped_by = loop {
            let Ok(input) = rx.recv() else {
                break StopReason::Disconnected;
            };
            let first = origin.is_none();
            let start = *origin.get_or_insert(input.at);

            match input.kind {
                InputKind::Key {
                    action: KeyAction::Pressed,
                    code,
                } if code == self.stop_code => break StopReason::StopKey,
                InputKind::Key {
                    action: KeyAction::Released,
                    code: vc::ENTER,
                } if first => {
                    debug!("dropping leading ENTER release");
                    continue;
                }
                _ => {}
            }

            let channel = input.kind.channel();
            let floor = log
                .events(channel)
                .last()
                .map(|e| e.offset)
                .unwrap_or(Duration::ZERO);
            // Whole milliseconds, the resolution of the saved format.
            let elapsed = input.at.saturating_duration_since(start).as_millis() as u64;
            let offset = Duration::from_millis(elapsed).max(floor);
            if let Err(e) = log.push(InputEvent {
                offset,
                kind: input.kind,
            }) {
                warn!(error = %e, "dropping captured event");
            }
        };

        info!(events = log.len(), reason = ?stopped_by, "recording stopped");
        Recording { log, stopped_by }
    }
}
