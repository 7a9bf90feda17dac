//! Injection through the `enigo` crate (X11/Wayland, Windows `SendInput`, macOS CGEvent).

use enigo::{Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};

use crate::device::Injector;
use crate::error::InjectError;
use crate::keycode::{Button, DeviceCode, Key};

/// OS-level injector.
pub struct EnigoInjector {
    enigo: Enigo,
}

impl EnigoInjector {
    /// Connect to the display/session. Fails when there is none (headless, no permissions).
    pub fn connect() -> Result<Self, InjectError> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| InjectError::Unavailable(e.to_string()))?;
        Ok(Self { enigo })
    }

    fn send(&mut self, code: DeviceCode, direction: Direction) -> Result<(), InjectError> {
        let result = match code {
            DeviceCode::Key(key) => self.enigo.key(map_key(key)?, direction),
            DeviceCode::Button(button) => self.enigo.button(map_button(button), direction),
        };
        result.map_err(|e| InjectError::Call(e.to_string()))
    }
}

impl Injector for EnigoInjector {
    fn press(&mut self, code: DeviceCode) -> Result<(), InjectError> {
        self.send(code, Direction::Press)
    }

    fn release(&mut self, code: DeviceCode) -> Result<(), InjectError> {
        self.send(code, Direction::Release)
    }

    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), InjectError> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| InjectError::Call(e.to_string()))
    }

    fn name(&self) -> &str {
        "enigo"
    }
}

fn map_button(button: Button) -> enigo::Button {
    match button {
        Button::Left => enigo::Button::Left,
        Button::Right => enigo::Button::Right,
        Button::Middle => enigo::Button::Middle,
    }
}

fn map_key(key: Key) -> Result<enigo::Key, InjectError> {
    use enigo::Key as E;

    if let Some(c) = key.as_char() {
        return Ok(match key {
            Key::Space => E::Space,
            _ => E::Unicode(c),
        });
    }
    Ok(match key {
        Key::F(n) => function_key(n).ok_or_else(|| InjectError::Unsupported(key.to_string()))?,
        Key::Shift => E::Shift,
        Key::Control => E::Control,
        Key::Alt => E::Alt,
        Key::Meta => E::Meta,
        Key::Enter => E::Return,
        Key::Tab => E::Tab,
        Key::Backspace => E::Backspace,
        Key::Escape => E::Escape,
        Key::Up => E::UpArrow,
        Key::Down => E::DownArrow,
        Key::Left => E::LeftArrow,
        Key::Right => E::RightArrow,
        Key::Home => E::Home,
        Key::End => E::End,
        Key::PageUp => E::PageUp,
        Key::PageDown => E::PageDown,
        Key::Delete => E::Delete,
        #[cfg(not(target_os = "macos"))]
        Key::Insert => E::Insert,
        _ => return Err(InjectError::Unsupported(key.to_string())),
    })
}

fn function_key(n: u8) -> Option<enigo::Key> {
    use enigo::Key as E;

    Some(match n {
        1 => E::F1,
        2 => E::F2,
        3 => E::F3,
        4 => E::F4,
        5 => E::F5,
        6 => E::F6,
        7 => E::F7,
        8 => E::F8,
        9 => E::F9,
        10 => E::F10,
        11 => E::F11,
        12 => E::F12,
        13 => E::F13,
        14 => E::F14,
        15 => E::F15,
        16 => E::F16,
        17 => E::F17,
        18 => E::F18,
        19 => E::F19,
        20 => E::F20,
        // F21..F24 only exist on some enigo platforms.
        _ => return None,
    })
}
