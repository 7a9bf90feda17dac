//! Recorded events and the per-channel event log.
//!
//! A recording is a list of small, device-agnostic actions ([`InputKind`]), each stamped
//! with its offset from the first event of the recording ([`InputEvent`]).
//!
//! ## Code conventions
//! - **Key codes** are the capture-side virtual codes written by the recorder
//!   (scan-code based, e.g. `A = 0x1E`, `UP = 0xE048`). See [`crate::keycode`].
//! - **Pointer buttons** follow the capture convention `0 = none`, `1 = left`,
//!   `2 = right`, `3 = middle`. Moves carry button `0`.
//! - **Positions** are absolute screen coordinates as captured, before any DPI scaling.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Independent input device category with its own ordered list and scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Key,
    Pointer,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Key, Channel::Pointer];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Key => f.write_str("key"),
            Channel::Pointer => f.write_str("pointer"),
        }
    }
}

/// Keyboard edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Pressed,
    Released,
}

/// Pointer action. `Moved` and `Dragged` only change the cursor position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerAction {
    Pressed,
    Released,
    Moved,
    Dragged,
}

impl PointerAction {
    /// `true` for actions that carry a meaningful button.
    #[inline]
    pub fn uses_button(self) -> bool {
        matches!(self, PointerAction::Pressed | PointerAction::Released)
    }
}

/// Absolute screen position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One captured action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// A keyboard key changed state.
    Key { action: KeyAction, code: u16 },

    /// A pointer button changed state, or the cursor moved.
    ///
    /// `button` is irrelevant (normally `0`) for `Moved`.
    Pointer {
        action: PointerAction,
        button: u16,
        at: Point,
    },
}

impl InputKind {
    pub fn channel(&self) -> Channel {
        match self {
            InputKind::Key { .. } => Channel::Key,
            InputKind::Pointer { .. } => Channel::Pointer,
        }
    }
}

/// Timestamped action: an [`InputKind`] plus its offset from the start of the recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEvent {
    /// Time since the first event of the recording.
    pub offset: Duration,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn key(offset_ms: u64, action: KeyAction, code: u16) -> Self {
        Self {
            offset: Duration::from_millis(offset_ms),
            kind: InputKind::Key { action, code },
        }
    }

    pub fn pointer(offset_ms: u64, action: PointerAction, button: u16, x: i32, y: i32) -> Self {
        Self {
            offset: Duration::from_millis(offset_ms),
            kind: InputKind::Pointer {
                action,
                button,
                at: Point::new(x, y),
            },
        }
    }

    #[inline]
    pub fn channel(&self) -> Channel {
        self.kind.channel()
    }
}

/// Ordered recording, grouped by channel.
///
/// Insertion order is capture order. Within a channel offsets never decrease; equal
/// offsets are allowed and keep their insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventLog {
    keys: Vec<InputEvent>,
    pointer: Vec<InputEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from events in capture order, rejecting any channel that goes back in time.
    pub fn from_events(events: impl IntoIterator<Item = InputEvent>) -> Result<Self> {
        let mut log = Self::new();
        for event in events {
            log.push(event)?;
        }
        Ok(log)
    }

    /// Append an event to its channel.
    pub fn push(&mut self, event: InputEvent) -> Result<()> {
        let channel = event.channel();
        let list = self.list_mut(channel);
        if let Some(prev) = list.last() {
            if event.offset < prev.offset {
                return Err(Error::OutOfOrder {
                    channel,
                    index: list.len(),
                    offset_ms: event.offset.as_millis(),
                    previous_ms: prev.offset.as_millis(),
                });
            }
        }
        list.push(event);
        Ok(())
    }

    /// Re-check the ordering invariant of every channel.
    pub fn validate(&self) -> Result<()> {
        for channel in Channel::ALL {
            let events = self.events(channel);
            for (index, pair) in events.windows(2).enumerate() {
                if pair[1].offset < pair[0].offset {
                    return Err(Error::OutOfOrder {
                        channel,
                        index: index + 1,
                        offset_ms: pair[1].offset.as_millis(),
                        previous_ms: pair[0].offset.as_millis(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Events of one channel, in capture order.
    pub fn events(&self, channel: Channel) -> &[InputEvent] {
        match channel {
            Channel::Key => &self.keys,
            Channel::Pointer => &self.pointer,
        }
    }

    fn list_mut(&mut self, channel: Channel) -> &mut Vec<InputEvent> {
        match channel {
            Channel::Key => &mut self.keys,
            Channel::Pointer => &mut self.pointer,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.pointer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.pointer.is_empty()
    }

    /// Largest offset across both channels.
    pub fn duration(&self) -> Duration {
        Channel::ALL
            .iter()
            .filter_map(|c| self.events(*c).last())
            .map(|e| e.offset)
            .max()
            .unwrap_or_default()
    }
}
