//! Text format for saved macros.
//!
//! ```text
//! START KEY EVENTS
//! 0 PRESSED 30
//! 120 RELEASED 30
//! END KEY EVENTS
//! START MOUSE EVENTS
//! 40 MOUSE MOVED 640,360 0
//! 80 MOUSE PRESSED 640,360 1
//! END MOUSE EVENTS
//! EOF
//! ```
//!
//! Offsets are whole milliseconds, key codes and buttons are decimal capture codes.
//! The reader is lenient: sections may come in either order or be missing, blank
//! lines and lines outside a section are ignored, and a malformed line is skipped with
//! a warning naming its line number. Keys or buttons still pressed at the end of the
//! file get a synthesized release 10ms after the channel's last event.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::{Channel, EventLog, InputEvent, InputKind, KeyAction, Point, PointerAction};

const KEY_START: &str = "START KEY EVENTS";
const KEY_END: &str = "END KEY EVENTS";
const MOUSE_START: &str = "START MOUSE EVENTS";
const MOUSE_END: &str = "END MOUSE EVENTS";
const EOF_MARKER: &str = "EOF";

/// Delay after a channel's last event at which a dangling press is released.
pub const DANGLING_RELEASE_DELAY: Duration = Duration::from_millis(10);

/// What the reader had to fix up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Lines skipped because they could not be parsed.
    pub malformed: usize,
    /// Releases added for presses that never ended.
    pub synthesized: usize,
}

/// A parsed macro.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loaded {
    pub log: EventLog,
    pub report: LoadReport,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Keys,
    Mouse,
}

/// Write `log` in the text format. Both sections are always present.
pub fn write_log(log: &EventLog, mut out: impl Write) -> io::Result<()> {
    writeln!(out, "{KEY_START}")?;
    for event in log.events(Channel::Key) {
        if let InputKind::Key { action, code } = event.kind {
            let action = match action {
                KeyAction::Pressed => "PRESSED",
                KeyAction::Released => "RELEASED",
            };
            writeln!(out, "{} {action} {code}", event.offset.as_millis())?;
        }
    }
    writeln!(out, "{KEY_END}")?;

    writeln!(out, "{MOUSE_START}")?;
    for event in log.events(Channel::Pointer) {
        if let InputKind::Pointer { action, button, at } = event.kind {
            writeln!(
                out,
                "{} MOUSE {} {},{} {button}",
                event.offset.as_millis(),
                pointer_action_name(action),
                at.x,
                at.y
            )?;
        }
    }
    writeln!(out, "{MOUSE_END}")?;
    writeln!(out, "{EOF_MARKER}")?;
    out.flush()
}

fn pointer_action_name(action: PointerAction) -> &'static str {
    match action {
        PointerAction::Pressed => "PRESSED",
        PointerAction::Released => "RELEASED",
        PointerAction::Moved => "MOVED",
        PointerAction::Dragged => "DRAGGED",
    }
}

/// Parse a macro from text.
pub fn parse_log(text: &str) -> Loaded {
    let mut parser = Parser::default();
    for (i, line) in text.lines().enumerate() {
        if !parser.line(i + 1, line) {
            break;
        }
    }
    parser.finish()
}

/// Parse a macro from a reader. Only I/O errors fail.
pub fn read_log(reader: impl BufRead) -> Result<Loaded> {
    let mut parser = Parser::default();
    for (i, line) in reader.lines().enumerate() {
        if !parser.line(i + 1, &line?) {
            break;
        }
    }
    Ok(parser.finish())
}

pub fn load_file(path: &Path) -> Result<Loaded> {
    let loaded = read_log(BufReader::new(File::open(path)?))?;
    info!(
        path = %path.display(),
        events = loaded.log.len(),
        malformed = loaded.report.malformed,
        "loaded macro"
    );
    Ok(loaded)
}

pub fn save_file(path: &Path, log: &EventLog) -> Result<()> {
    write_log(log, BufWriter::new(File::create(path)?))?;
    info!(path = %path.display(), events = log.len(), "saved macro");
    Ok(())
}

#[derive(Default)]
struct Parser {
    log: EventLog,
    report: LoadReport,
    section: Option<Section>,
    keys_done: bool,
    mouse_done: bool,
}

impl Parser {
    /// Feed one line. Returns `false` once the end marker is reached.
    fn line(&mut self, number: usize, raw: &str) -> bool {
        let line = raw.trim();
        if line.is_empty() {
            return true;
        }
        let section = self.section.unwrap_or(Section::Outside);
        match line {
            EOF_MARKER => return false,
            KEY_START if section == Section::Outside => {
                if self.keys_done {
                    warn!(line = number, "repeated key section ignored");
                }
                self.section = Some(Section::Keys);
            }
            MOUSE_START if section == Section::Outside => {
                if self.mouse_done {
                    warn!(line = number, "repeated mouse section ignored");
                }
                self.section = Some(Section::Mouse);
            }
            KEY_END if section == Section::Keys => {
                self.keys_done = true;
                self.section = None;
            }
            MOUSE_END if section == Section::Mouse => {
                self.mouse_done = true;
                self.section = None;
            }
            _ => match section {
                Section::Outside => debug!(line = number, "ignoring line outside a section"),
                Section::Keys if self.keys_done => {}
                Section::Mouse if self.mouse_done => {}
                Section::Keys => self.event(number, line, parse_key_line(line)),
                Section::Mouse => self.event(number, line, parse_mouse_line(line)),
            },
        }
        true
    }

    fn event(&mut self, number: usize, line: &str, parsed: Option<InputEvent>) {
        let Some(event) = parsed else {
            warn!(line = number, content = line, "skipping malformed line");
            self.report.malformed += 1;
            return;
        };
        if let Err(e) = self.log.push(event) {
            warn!(line = number, error = %e, "skipping out-of-order line");
            self.report.malformed += 1;
        }
    }

    fn finish(mut self) -> Loaded {
        if self.section.is_some() {
            warn!("macro ended inside a section");
        }
        self.report.synthesized = release_dangling(&mut self.log);
        Loaded {
            log: self.log,
            report: self.report,
        }
    }
}

fn parse_key_line(line: &str) -> Option<InputEvent> {
    let mut parts = line.split_whitespace();
    let offset = parts.next()?.parse().ok()?;
    let action = match parts.next()? {
        "PRESSED" => KeyAction::Pressed,
        "RELEASED" => KeyAction::Released,
        _ => return None,
    };
    let code = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(InputEvent::key(offset, action, code))
}

fn parse_mouse_line(line: &str) -> Option<InputEvent> {
    let mut parts = line.split_whitespace();
    let offset = parts.next()?.parse().ok()?;
    if parts.next()? != "MOUSE" {
        return None;
    }
    let action = match parts.next()? {
        "PRESSED" => PointerAction::Pressed,
        "RELEASED" => PointerAction::Released,
        "MOVED" => PointerAction::Moved,
        "DRAGGED" => PointerAction::Dragged,
        _ => return None,
    };
    let (x, y) = parts.next()?.split_once(',')?;
    let (x, y) = (x.parse().ok()?, y.parse().ok()?);
    let button = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(InputEvent::pointer(offset, action, button, x, y))
}

/// Append a release for every key or button left pressed. Returns how many were added.
fn release_dangling(log: &mut EventLog) -> usize {
    let mut keys: BTreeMap<u16, bool> = BTreeMap::new();
    for event in log.events(Channel::Key) {
        if let InputKind::Key { action, code } = event.kind {
            keys.insert(code, action == KeyAction::Pressed);
        }
    }
    let mut buttons: BTreeMap<u16, bool> = BTreeMap::new();
    let mut last_position = Point::default();
    for event in log.events(Channel::Pointer) {
        if let InputKind::Pointer { action, button, at } = event.kind {
            last_position = at;
            match action {
                PointerAction::Pressed => {
                    buttons.insert(button, true);
                }
                PointerAction::Released => {
                    buttons.insert(button, false);
                }
                PointerAction::Moved | PointerAction::Dragged => {}
            }
        }
    }

    let mut added = Vec::new();
    let key_at = last_offset(log, Channel::Key) + DANGLING_RELEASE_DELAY;
    for code in keys.into_iter().filter(|(_, down)| *down).map(|(c, _)| c) {
        warn!(code, "key never released, adding a release");
        added.push(InputEvent {
            offset: key_at,
            kind: InputKind::Key {
                action: KeyAction::Released,
                code,
            },
        });
    }
    let pointer_at = last_offset(log, Channel::Pointer) + DANGLING_RELEASE_DELAY;
    for button in buttons.into_iter().filter(|(_, down)| *down).map(|(b, _)| b) {
        warn!(button, "pointer button never released, adding a release");
        added.push(InputEvent {
            offset: pointer_at,
            kind: InputKind::Pointer {
                action: PointerAction::Released,
                button,
                at: last_position,
            },
        });
    }

    let count = added.len();
    for event in added {
        // Later than every event of its channel, so never out of order.
        let _ = log.push(event);
    }
    count
}

fn last_offset(log: &EventLog, channel: Channel) -> Duration {
    log.events(channel)
        .last()
        .map(|e| e.offset)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::{button, vc};

    fn written(log: &EventLog) -> String {
        let mut out = Vec::new();
        write_log(log, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn writes_both_sections_and_eof() {
        let log = EventLog::from_events([
            InputEvent::key(0, KeyAction::Pressed, vc::A),
            InputEvent::pointer(15, PointerAction::Moved, button::NONE, -4, 900),
            InputEvent::key(120, KeyAction::Released, vc::A),
        ])
        .unwrap();
        assert_eq!(
            written(&log),
            "START KEY EVENTS\n\
             0 PRESSED 30\n\
             120 RELEASED 30\n\
             END KEY EVENTS\n\
             START MOUSE EVENTS\n\
             15 MOUSE MOVED -4,900 0\n\
             END MOUSE EVENTS\n\
             EOF\n"
        );
        assert_eq!(
            written(&EventLog::new()),
            "START KEY EVENTS\nEND KEY EVENTS\nSTART MOUSE EVENTS\nEND MOUSE EVENTS\nEOF\n"
        );
    }

    #[test]
    fn reads_what_it_writes() {
        let log = EventLog::from_events([
            InputEvent::key(0, KeyAction::Pressed, vc::SHIFT),
            InputEvent::pointer(3, PointerAction::Pressed, button::RIGHT, 10, 20),
            InputEvent::pointer(9, PointerAction::Dragged, button::NONE, 30, 40),
            InputEvent::pointer(12, PointerAction::Released, button::RIGHT, 30, 40),
            InputEvent::key(20, KeyAction::Released, vc::SHIFT),
        ])
        .unwrap();
        let loaded = parse_log(&written(&log));
        assert_eq!(loaded.log, log);
        assert_eq!(loaded.report, LoadReport::default());
    }

    #[test]
    fn dangling_key_gets_a_release_after_the_last_key_event() {
        let text = "START KEY EVENTS\n0 PRESSED 30\n40 PRESSED 48\n55 RELEASED 48\nEND KEY EVENTS\nEOF\n";
        let loaded = parse_log(text);
        assert_eq!(loaded.report.synthesized, 1);
        let keys = loaded.log.events(Channel::Key);
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[3], InputEvent::key(65, KeyAction::Released, 30));
    }

    #[test]
    fn dangling_button_is_released_at_the_last_position() {
        let text = "START MOUSE EVENTS\n\
                    5 MOUSE PRESSED 1,2 1\n\
                    9 MOUSE DRAGGED 7,8 0\n\
                    END MOUSE EVENTS\nEOF";
        let loaded = parse_log(text);
        let pointer = loaded.log.events(Channel::Pointer);
        assert_eq!(
            pointer.last(),
            Some(&InputEvent::pointer(19, PointerAction::Released, button::LEFT, 7, 8))
        );
    }

    #[test]
    fn mouse_first_blank_lines_and_missing_key_section() {
        let text = "\nSTART MOUSE EVENTS\n\n0 MOUSE MOVED 1,1 0\nEND MOUSE EVENTS\nEOF\n";
        let loaded = parse_log(text);
        assert_eq!(loaded.log.events(Channel::Key).len(), 0);
        assert_eq!(loaded.log.events(Channel::Pointer).len(), 1);
        assert_eq!(loaded.report.malformed, 0);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = "START KEY EVENTS\n\
                    0 PRESSED 30\n\
                    x PRESSED 31\n\
                    5 HELD 31\n\
                    7 PRESSED\n\
                    9 RELEASED 30\n\
                    3 RELEASED 30\n\
                    END KEY EVENTS\n\
                    START MOUSE EVENTS\n\
                    1 MOUSE MOVED 1;1 0\n\
                    2 MOVED 1,1 0\n\
                    END MOUSE EVENTS\n";
        let loaded = parse_log(text);
        // Four bad key lines (one of them out of order) and two bad mouse lines.
        assert_eq!(loaded.report.malformed, 6);
        assert_eq!(
            loaded.log.events(Channel::Key),
            &[
                InputEvent::key(0, KeyAction::Pressed, 30),
                InputEvent::key(9, KeyAction::Released, 30),
            ]
        );
        assert!(loaded.log.events(Channel::Pointer).is_empty());
    }

    #[test]
    fn content_after_end_markers_is_ignored() {
        let text = "START KEY EVENTS\n0 PRESSED 30\n1 RELEASED 30\nEND KEY EVENTS\n\
                    2 PRESSED 31\n\
                    EOF\n\
                    START MOUSE EVENTS\n0 MOUSE MOVED 1,1 0\nEND MOUSE EVENTS\n";
        let loaded = parse_log(text);
        assert_eq!(loaded.log.len(), 2);
        assert_eq!(loaded.report.synthesized, 0);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap");
        let log = EventLog::from_events([
            InputEvent::key(0, KeyAction::Pressed, vc::ENTER),
            InputEvent::key(8, KeyAction::Released, vc::ENTER),
        ])
        .unwrap();
        save_file(&path, &log).unwrap();
        assert_eq!(load_file(&path).unwrap().log, log);
    }
}
