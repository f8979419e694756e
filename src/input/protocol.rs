//! Binary input protocol for `/api/ws`
//!
//! Every message is `[event code: u8][payload]`, little-endian:
//!
//! | Code | Event              | Direction        | Payload                         |
//! |------|--------------------|------------------|---------------------------------|
//! | 0    | mouse move         | client -> server | `x: f32`, `y: f32` in `[0, 1)`  |
//! | 1    | mouse click        | client -> server | `button: u8`, `down: u8`        |
//! | 2    | key press          | client -> server | `keysym: u32`, `down: u8`       |
//! | 3    | scroll             | client -> server | `down: u8` (1 = down)           |
//! | 4    | clipboard upload   | client -> server | UTF-8 text                      |
//! | 5    | clipboard download | both             | empty request / UTF-8 reply     |
//! | 6    | viewer count       | server -> client | `count: u32`                    |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::config::ScreenSize;

pub const EVENT_MOUSE_MOVE: u8 = 0;
pub const EVENT_MOUSE_CLICK: u8 = 1;
pub const EVENT_KEY_PRESS: u8 = 2;
pub const EVENT_SCROLL: u8 = 3;
pub const EVENT_CLIPBOARD_UPLOAD: u8 = 4;
pub const EVENT_CLIPBOARD_DOWNLOAD: u8 = 5;
pub const EVENT_VIEWER_COUNT: u8 = 6;

/// Pointer button, numbered as the browser's `MouseEvent.button`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn from_browser(button: u8) -> Option<Self> {
        match button {
            0 => Some(MouseButton::Left),
            1 => Some(MouseButton::Middle),
            2 => Some(MouseButton::Right),
            _ => None,
        }
    }

    /// X11 core button number
    pub fn x11_button(&self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// X11 wheel buttons: 4 scrolls up, 5 scrolls down
    pub fn x11_button(&self) -> u8 {
        match self {
            ScrollDirection::Up => 4,
            ScrollDirection::Down => 5,
        }
    }
}

/// Messages sent by the browser
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Normalized pointer position
    MouseMove { x: f32, y: f32 },
    MouseButton { button: MouseButton, down: bool },
    Key { keysym: u32, down: bool },
    Scroll(ScrollDirection),
    ClipboardUpload(String),
    ClipboardRequest,
}

impl InputEvent {
    /// Decode one message. Truncated, unknown or server-only messages give `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut buf = data;
        if !buf.has_remaining() {
            return None;
        }

        let event = match buf.get_u8() {
            EVENT_MOUSE_MOVE => {
                if buf.remaining() < 8 {
                    return None;
                }
                let x = buf.get_f32_le();
                let y = buf.get_f32_le();
                InputEvent::MouseMove { x, y }
            }
            EVENT_MOUSE_CLICK => {
                if buf.remaining() < 2 {
                    return None;
                }
                let raw = buf.get_u8();
                let down = buf.get_u8() != 0;
                let Some(button) = MouseButton::from_browser(raw) else {
                    debug!("Ignoring unsupported mouse button {}", raw);
                    return None;
                };
                InputEvent::MouseButton { button, down }
            }
            EVENT_KEY_PRESS => {
                if buf.remaining() < 5 {
                    return None;
                }
                let keysym = buf.get_u32_le();
                let down = buf.get_u8() != 0;
                InputEvent::Key { keysym, down }
            }
            EVENT_SCROLL => {
                if !buf.has_remaining() {
                    return None;
                }
                if buf.get_u8() == 1 {
                    InputEvent::Scroll(ScrollDirection::Down)
                } else {
                    InputEvent::Scroll(ScrollDirection::Up)
                }
            }
            EVENT_CLIPBOARD_UPLOAD => {
                let text = std::str::from_utf8(buf).ok()?;
                InputEvent::ClipboardUpload(text.to_string())
            }
            EVENT_CLIPBOARD_DOWNLOAD => InputEvent::ClipboardRequest,
            other => {
                debug!("Unknown input event code {}", other);
                return None;
            }
        };

        Some(event)
    }
}

/// Messages sent to the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Clipboard(String),
    ViewerCount(u32),
}

impl ServerMessage {
    pub fn encode(&self) -> Bytes {
        match self {
            ServerMessage::Clipboard(text) => {
                let mut buf = BytesMut::with_capacity(1 + text.len());
                buf.put_u8(EVENT_CLIPBOARD_DOWNLOAD);
                buf.put_slice(text.as_bytes());
                buf.freeze()
            }
            ServerMessage::ViewerCount(count) => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u8(EVENT_VIEWER_COUNT);
                buf.put_u32_le(*count);
                buf.freeze()
            }
        }
    }
}

/// Map normalized coordinates onto the screen.
///
/// `None` unless both resolve inside `[0, width) x [0, height)`.
pub fn scale_pointer(x: f32, y: f32, screen: ScreenSize) -> Option<(u32, u32)> {
    fn axis(v: f32, extent: u32) -> Option<u32> {
        if !v.is_finite() {
            return None;
        }
        let px = (f64::from(v) * f64::from(extent)).floor();
        if px < 0.0 || px >= f64::from(extent) {
            return None;
        }
        Some(px as u32)
    }

    Some((axis(x, screen.width)?, axis(y, screen.height)?))
}
