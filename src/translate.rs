//! Capture codes → injection vocabulary.
//!
//! [`translate`] rewrites every event of an [`EventLog`] into a [`TranslatedEvent`] the
//! schedulers can execute directly. Codes without a translation are dropped (one warning
//! per distinct code), never substituted. Surviving events keep their order and offsets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::event::{Channel, EventLog, InputKind, KeyAction, Point, PointerAction};
use crate::keycode::{self, DeviceCode};

/// What a scheduler does for one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayAction {
    /// Press `code`, moving the cursor to `at` first when present.
    Press { code: DeviceCode, at: Option<Point> },
    /// Release `code`, moving the cursor to `at` first when present.
    Release { code: DeviceCode, at: Option<Point> },
    /// Move the cursor (recorded moves and drags).
    Move { to: Point },
}

/// An event ready for injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslatedEvent {
    pub offset: Duration,
    /// Position in the recorded channel list; breaks ties between equal offsets.
    pub index: usize,
    pub action: ReplayAction,
}

/// A capture code that had no translation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnmappedCode {
    pub channel: Channel,
    pub code: u16,
    pub name: Option<&'static str>,
    /// Number of events dropped for this code.
    pub events: usize,
}

/// Outcome counters of one translation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TranslationReport {
    pub kept: usize,
    pub dropped: usize,
    pub unmapped: Vec<UnmappedCode>,
}

/// Translated, read-only per-channel event lists.
#[derive(Clone, Debug)]
pub struct Translation {
    keys: Arc<[TranslatedEvent]>,
    pointer: Arc<[TranslatedEvent]>,
    pub report: TranslationReport,
}

impl Translation {
    /// Shared handle to one channel's events.
    pub fn events(&self, channel: Channel) -> Arc<[TranslatedEvent]> {
        match channel {
            Channel::Key => Arc::clone(&self.keys),
            Channel::Pointer => Arc::clone(&self.pointer),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.pointer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest offset across both channels.
    pub fn duration(&self) -> Duration {
        [&self.keys, &self.pointer]
            .iter()
            .filter_map(|list| list.last())
            .map(|e| e.offset)
            .max()
            .unwrap_or_default()
    }
}

/// Translate a whole log.
pub fn translate(log: &EventLog) -> Translation {
    let mut unmapped: BTreeMap<(Channel, u16), usize> = BTreeMap::new();
    let mut keys = Vec::with_capacity(log.events(Channel::Key).len());
    let mut pointer = Vec::with_capacity(log.events(Channel::Pointer).len());

    for channel in Channel::ALL {
        let out = match channel {
            Channel::Key => &mut keys,
            Channel::Pointer => &mut pointer,
        };
        for (index, event) in log.events(channel).iter().enumerate() {
            match translate_kind(&event.kind) {
                Ok(action) => out.push(TranslatedEvent {
                    offset: event.offset,
                    index,
                    action,
                }),
                Err(code) => *unmapped.entry((channel, code)).or_default() += 1,
            }
        }
    }

    let mut report = TranslationReport {
        kept: keys.len() + pointer.len(),
        ..TranslationReport::default()
    };
    for ((channel, code), events) in unmapped {
        let name = match channel {
            Channel::Key => keycode::name_for_code(code),
            Channel::Pointer => None,
        };
        warn!(
            %channel,
            code,
            name = name.unwrap_or("?"),
            events,
            "unmapped code, dropping its events"
        );
        report.dropped += events;
        report.unmapped.push(UnmappedCode {
            channel,
            code,
            name,
            events,
        });
    }
    debug!(
        kept = report.kept,
        dropped = report.dropped,
        "translated event log"
    );

    Translation {
        keys: keys.into(),
        pointer: pointer.into(),
        report,
    }
}

/// Translate one event, or return the code that has no translation.
fn translate_kind(kind: &InputKind) -> Result<ReplayAction, u16> {
    match *kind {
        InputKind::Key { action, code } => {
            let key = keycode::key_for_code(code).ok_or(code)?;
            let code = DeviceCode::Key(key);
            Ok(match action {
                KeyAction::Pressed => ReplayAction::Press { code, at: None },
                KeyAction::Released => ReplayAction::Release { code, at: None },
            })
        }
        InputKind::Pointer { action, button, at } => {
            if !action.uses_button() {
                return Ok(ReplayAction::Move { to: at });
            }
            let code = DeviceCode::Button(keycode::button_for_code(button).ok_or(button)?);
            Ok(match action {
                PointerAction::Pressed => ReplayAction::Press { code, at: Some(at) },
                _ => ReplayAction::Release { code, at: Some(at) },
            })
        }
    }
}
