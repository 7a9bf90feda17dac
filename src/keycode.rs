//! Capture-side key codes and the injection-side key vocabulary.
//!
//! Recordings store keys as the capture hook's virtual codes ([`vc`]), which are
//! scan-code based: the low byte is the set-1 scancode, extended keys carry an
//! `0x0E00`/`0xE000` prefix. Injection backends speak [`Key`] and [`Button`] instead.
//!
//! Everything here is a constant table. Nothing is built or mutated at runtime.

use std::fmt;

use crate::error::UnknownKeyName;

/// Capture-side virtual key codes.
pub mod vc {
    pub const ESCAPE: u16 = 0x0001;

    pub const F1: u16 = 0x003B;
    pub const F2: u16 = 0x003C;
    pub const F3: u16 = 0x003D;
    pub const F4: u16 = 0x003E;
    pub const F5: u16 = 0x003F;
    pub const F6: u16 = 0x0040;
    pub const F7: u16 = 0x0041;
    pub const F8: u16 = 0x0042;
    pub const F9: u16 = 0x0043;
    pub const F10: u16 = 0x0044;
    pub const F11: u16 = 0x0057;
    pub const F12: u16 = 0x0058;
    pub const F13: u16 = 0x005B;
    pub const F14: u16 = 0x005C;
    pub const F15: u16 = 0x005D;
    pub const F16: u16 = 0x0063;
    pub const F17: u16 = 0x0064;
    pub const F18: u16 = 0x0065;
    pub const F19: u16 = 0x0066;
    pub const F20: u16 = 0x0067;
    pub const F21: u16 = 0x0068;
    pub const F22: u16 = 0x0069;
    pub const F23: u16 = 0x006A;
    pub const F24: u16 = 0x006B;

    pub const BACKQUOTE: u16 = 0x0029;
    pub const N1: u16 = 0x0002;
    pub const N2: u16 = 0x0003;
    pub const N3: u16 = 0x0004;
    pub const N4: u16 = 0x0005;
    pub const N5: u16 = 0x0006;
    pub const N6: u16 = 0x0007;
    pub const N7: u16 = 0x0008;
    pub const N8: u16 = 0x0009;
    pub const N9: u16 = 0x000A;
    pub const N0: u16 = 0x000B;
    pub const MINUS: u16 = 0x000C;
    pub const EQUALS: u16 = 0x000D;
    pub const BACKSPACE: u16 = 0x000E;

    pub const TAB: u16 = 0x000F;
    pub const CAPS_LOCK: u16 = 0x003A;

    pub const A: u16 = 0x001E;
    pub const B: u16 = 0x0030;
    pub const C: u16 = 0x002E;
    pub const D: u16 = 0x0020;
    pub const E: u16 = 0x0012;
    pub const F: u16 = 0x0021;
    pub const G: u16 = 0x0022;
    pub const H: u16 = 0x0023;
    pub const I: u16 = 0x0017;
    pub const J: u16 = 0x0024;
    pub const K: u16 = 0x0025;
    pub const L: u16 = 0x0026;
    pub const M: u16 = 0x0032;
    pub const N: u16 = 0x0031;
    pub const O: u16 = 0x0018;
    pub const P: u16 = 0x0019;
    pub const Q: u16 = 0x0010;
    pub const R: u16 = 0x0013;
    pub const S: u16 = 0x001F;
    pub const T: u16 = 0x0014;
    pub const U: u16 = 0x0016;
    pub const V: u16 = 0x002F;
    pub const W: u16 = 0x0011;
    pub const X: u16 = 0x002D;
    pub const Y: u16 = 0x0015;
    pub const Z: u16 = 0x002C;

    pub const OPEN_BRACKET: u16 = 0x001A;
    pub const CLOSE_BRACKET: u16 = 0x001B;
    pub const BACK_SLASH: u16 = 0x002B;
    pub const SEMICOLON: u16 = 0x0027;
    pub const QUOTE: u16 = 0x0028;
    pub const ENTER: u16 = 0x001C;
    pub const COMMA: u16 = 0x0033;
    pub const PERIOD: u16 = 0x0034;
    pub const SLASH: u16 = 0x0035;
    pub const SPACE: u16 = 0x0039;

    pub const PRINTSCREEN: u16 = 0x0E37;
    pub const SCROLL_LOCK: u16 = 0x0046;
    pub const PAUSE: u16 = 0x0E45;
    pub const NUM_LOCK: u16 = 0x0045;

    pub const INSERT: u16 = 0x0E52;
    pub const DELETE: u16 = 0x0E53;
    pub const HOME: u16 = 0x0E47;
    pub const END: u16 = 0x0E4F;
    pub const PAGE_UP: u16 = 0x0E49;
    pub const PAGE_DOWN: u16 = 0x0E51;

    pub const UP: u16 = 0xE048;
    pub const LEFT: u16 = 0xE04B;
    pub const RIGHT: u16 = 0xE04D;
    pub const DOWN: u16 = 0xE050;

    pub const SHIFT: u16 = 0x002A;
    pub const CONTROL: u16 = 0x001D;
    pub const ALT: u16 = 0x0038;
    pub const META: u16 = 0x0E5B;
    pub const CONTEXT_MENU: u16 = 0x0E5D;
}

/// Capture-side pointer button codes.
pub mod button {
    pub const NONE: u16 = 0;
    pub const LEFT: u16 = 1;
    pub const RIGHT: u16 = 2;
    pub const MIDDLE: u16 = 3;
}

/// Key as understood by injection backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Lowercase ASCII letter `'a'..='z'`.
    Letter(char),
    /// Top-row digit `0..=9`.
    Digit(u8),
    /// Function key `1..=24`.
    F(u8),
    Shift,
    Control,
    Alt,
    Meta,
    Space,
    Enter,
    Tab,
    Backspace,
    Escape,
    Comma,
    Period,
    Slash,
    Semicolon,
    Quote,
    OpenBracket,
    CloseBracket,
    Backslash,
    Minus,
    Equals,
    Backquote,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
}

impl Key {
    /// Character produced by the unshifted key, when it is a printable key.
    pub fn as_char(self) -> Option<char> {
        Some(match self {
            Key::Letter(c) => c,
            Key::Digit(d) => char::from(b'0' + d),
            Key::Space => ' ',
            Key::Comma => ',',
            Key::Period => '.',
            Key::Slash => '/',
            Key::Semicolon => ';',
            Key::Quote => '\'',
            Key::OpenBracket => '[',
            Key::CloseBracket => ']',
            Key::Backslash => '\\',
            Key::Minus => '-',
            Key::Equals => '=',
            Key::Backquote => '`',
            _ => return None,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Letter(c) => write!(f, "{}", c.to_ascii_uppercase()),
            Key::Digit(d) => write!(f, "{d}"),
            Key::F(n) => write!(f, "F{n}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Pointer button as understood by injection backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    Left,
    Right,
    Middle,
}

/// Code in the injection vocabulary: what a scheduler presses and releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceCode {
    Key(Key),
    Button(Button),
}

impl fmt::Display for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCode::Key(k) => write!(f, "key {k}"),
            DeviceCode::Button(b) => write!(f, "button {b:?}"),
        }
    }
}

/// Translate a capture key code into an injectable key.
pub fn key_for_code(code: u16) -> Option<Key> {
    let key = match code {
        vc::A => Key::Letter('a'),
        vc::B => Key::Letter('b'),
        vc::C => Key::Letter('c'),
        vc::D => Key::Letter('d'),
        vc::E => Key::Letter('e'),
        vc::F => Key::Letter('f'),
        vc::G => Key::Letter('g'),
        vc::H => Key::Letter('h'),
        vc::I => Key::Letter('i'),
        vc::J => Key::Letter('j'),
        vc::K => Key::Letter('k'),
        vc::L => Key::Letter('l'),
        vc::M => Key::Letter('m'),
        vc::N => Key::Letter('n'),
        vc::O => Key::Letter('o'),
        vc::P => Key::Letter('p'),
        vc::Q => Key::Letter('q'),
        vc::R => Key::Letter('r'),
        vc::S => Key::Letter('s'),
        vc::T => Key::Letter('t'),
        vc::U => Key::Letter('u'),
        vc::V => Key::Letter('v'),
        vc::W => Key::Letter('w'),
        vc::X => Key::Letter('x'),
        vc::Y => Key::Letter('y'),
        vc::Z => Key::Letter('z'),

        vc::N0 => Key::Digit(0),
        vc::N1 => Key::Digit(1),
        vc::N2 => Key::Digit(2),
        vc::N3 => Key::Digit(3),
        vc::N4 => Key::Digit(4),
        vc::N5 => Key::Digit(5),
        vc::N6 => Key::Digit(6),
        vc::N7 => Key::Digit(7),
        vc::N8 => Key::Digit(8),
        vc::N9 => Key::Digit(9),

        vc::F1 => Key::F(1),
        vc::F2 => Key::F(2),
        vc::F3 => Key::F(3),
        vc::F4 => Key::F(4),
        vc::F5 => Key::F(5),
        vc::F6 => Key::F(6),
        vc::F7 => Key::F(7),
        vc::F8 => Key::F(8),
        vc::F9 => Key::F(9),
        vc::F10 => Key::F(10),
        vc::F11 => Key::F(11),
        vc::F12 => Key::F(12),
        vc::F13 => Key::F(13),
        vc::F14 => Key::F(14),
        vc::F15 => Key::F(15),
        vc::F16 => Key::F(16),
        vc::F17 => Key::F(17),
        vc::F18 => Key::F(18),
        vc::F19 => Key::F(19),
        vc::F20 => Key::F(20),
        vc::F21 => Key::F(21),
        vc::F22 => Key::F(22),
        vc::F23 => Key::F(23),
        vc::F24 => Key::F(24),

        vc::SHIFT => Key::Shift,
        vc::CONTROL => Key::Control,
        vc::ALT => Key::Alt,
        vc::META => Key::Meta,

        vc::SPACE => Key::Space,
        vc::ENTER => Key::Enter,
        vc::TAB => Key::Tab,
        vc::BACKSPACE => Key::Backspace,
        vc::COMMA => Key::Comma,
        vc::PERIOD => Key::Period,
        vc::SLASH => Key::Slash,
        vc::SEMICOLON => Key::Semicolon,
        vc::QUOTE => Key::Quote,
        vc::OPEN_BRACKET => Key::OpenBracket,
        vc::CLOSE_BRACKET => Key::CloseBracket,
        vc::BACK_SLASH => Key::Backslash,
        vc::MINUS => Key::Minus,
        vc::EQUALS => Key::Equals,
        vc::BACKQUOTE => Key::Backquote,

        vc::UP => Key::Up,
        vc::DOWN => Key::Down,
        vc::LEFT => Key::Left,
        vc::RIGHT => Key::Right,
        vc::HOME => Key::Home,
        vc::END => Key::End,
        vc::PAGE_UP => Key::PageUp,
        vc::PAGE_DOWN => Key::PageDown,
        vc::INSERT => Key::Insert,
        vc::DELETE => Key::Delete,
        vc::ESCAPE => Key::Escape,

        _ => return None,
    };
    Some(key)
}

/// Translate a capture button code into an injectable button.
pub fn button_for_code(code: u16) -> Option<Button> {
    match code {
        button::LEFT => Some(Button::Left),
        button::RIGHT => Some(Button::Right),
        button::MIDDLE => Some(Button::Middle),
        _ => None,
    }
}

/// Every key name accepted by [`code_for_name`], without the `VC_` prefix.
pub const KEY_NAMES: &[(&str, u16)] = &[
    ("ESCAPE", vc::ESCAPE),
    ("F1", vc::F1),
    ("F2", vc::F2),
    ("F3", vc::F3),
    ("F4", vc::F4),
    ("F5", vc::F5),
    ("F6", vc::F6),
    ("F7", vc::F7),
    ("F8", vc::F8),
    ("F9", vc::F9),
    ("F10", vc::F10),
    ("F11", vc::F11),
    ("F12", vc::F12),
    ("F13", vc::F13),
    ("F14", vc::F14),
    ("F15", vc::F15),
    ("F16", vc::F16),
    ("F17", vc::F17),
    ("F18", vc::F18),
    ("F19", vc::F19),
    ("F20", vc::F20),
    ("F21", vc::F21),
    ("F22", vc::F22),
    ("F23", vc::F23),
    ("F24", vc::F24),
    ("BACKQUOTE", vc::BACKQUOTE),
    ("1", vc::N1),
    ("2", vc::N2),
    ("3", vc::N3),
    ("4", vc::N4),
    ("5", vc::N5),
    ("6", vc::N6),
    ("7", vc::N7),
    ("8", vc::N8),
    ("9", vc::N9),
    ("0", vc::N0),
    ("MINUS", vc::MINUS),
    ("EQUALS", vc::EQUALS),
    ("BACKSPACE", vc::BACKSPACE),
    ("TAB", vc::TAB),
    ("CAPS_LOCK", vc::CAPS_LOCK),
    ("A", vc::A),
    ("B", vc::B),
    ("C", vc::C),
    ("D", vc::D),
    ("E", vc::E),
    ("F", vc::F),
    ("G", vc::G),
    ("H", vc::H),
    ("I", vc::I),
    ("J", vc::J),
    ("K", vc::K),
    ("L", vc::L),
    ("M", vc::M),
    ("N", vc::N),
    ("O", vc::O),
    ("P", vc::P),
    ("Q", vc::Q),
    ("R", vc::R),
    ("S", vc::S),
    ("T", vc::T),
    ("U", vc::U),
    ("V", vc::V),
    ("W", vc::W),
    ("X", vc::X),
    ("Y", vc::Y),
    ("Z", vc::Z),
    ("OPEN_BRACKET", vc::OPEN_BRACKET),
    ("CLOSE_BRACKET", vc::CLOSE_BRACKET),
    ("BACK_SLASH", vc::BACK_SLASH),
    ("SEMICOLON", vc::SEMICOLON),
    ("QUOTE", vc::QUOTE),
    ("ENTER", vc::ENTER),
    ("COMMA", vc::COMMA),
    ("PERIOD", vc::PERIOD),
    ("SLASH", vc::SLASH),
    ("SPACE", vc::SPACE),
    ("PRINTSCREEN", vc::PRINTSCREEN),
    ("SCROLL_LOCK", vc::SCROLL_LOCK),
    ("PAUSE", vc::PAUSE),
    ("NUM_LOCK", vc::NUM_LOCK),
    ("INSERT", vc::INSERT),
    ("DELETE", vc::DELETE),
    ("HOME", vc::HOME),
    ("END", vc::END),
    ("PAGE_UP", vc::PAGE_UP),
    ("PAGE_DOWN", vc::PAGE_DOWN),
    ("UP", vc::UP),
    ("LEFT", vc::LEFT),
    ("RIGHT", vc::RIGHT),
    ("DOWN", vc::DOWN),
    ("SHIFT", vc::SHIFT),
    ("CONTROL", vc::CONTROL),
    ("ALT", vc::ALT),
    ("META", vc::META),
    ("CONTEXT_MENU", vc::CONTEXT_MENU),
];

/// Resolve a key name (`"escape"`, `"F5"`, `"VC_NUM_LOCK"`, ...) to its capture code.
///
/// Matching is case-insensitive and the `VC_` prefix is optional. There is no fallback:
/// an unknown name is an error the caller has to handle.
pub fn code_for_name(name: &str) -> Result<u16, UnknownKeyName> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("VC_").unwrap_or(&upper);
    KEY_NAMES
        .iter()
        .find(|(n, _)| *n == bare)
        .map(|(_, code)| *code)
        .ok_or_else(|| UnknownKeyName(name.to_string()))
}

/// Name of a capture code, for diagnostics.
pub fn name_for_code(code: u16) -> Option<&'static str> {
    KEY_NAMES.iter().find(|(_, c)| *c == code).map(|(n, _)| *n)
}
