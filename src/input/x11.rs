//! X11 input through the XTest extension, clipboard through `xclip`
//!
//! One connection to the display is kept open and shared by every input
//! socket. When a request fails the connection is dropped and reopened on
//! the next event, so injection recovers once the X server is back.

use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, ConnectionExt as _};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use super::backend::InputBackend;
use super::protocol::{MouseButton, ScrollDirection};
use crate::error::{AppError, Result};

/// Display the virtual framebuffer runs on
pub const DEFAULT_DISPLAY: &str = ":0";

fn x11_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("X11: {}", e))
}

/// Keysym table of the server, one row of `per_keycode` entries per keycode
#[derive(Debug, Clone)]
struct KeyMap {
    min_keycode: u8,
    per_keycode: u8,
    keysyms: Vec<u32>,
}

impl KeyMap {
    /// First keycode producing `keysym` in any column
    fn keycode(&self, keysym: u32) -> Option<u8> {
        if self.per_keycode == 0 {
            return None;
        }
        let index = self.keysyms.iter().position(|&k| k == keysym)?;
        let offset = u8::try_from(index / self.per_keycode as usize).ok()?;
        self.min_keycode.checked_add(offset)
    }
}

/// A fake input event in XTest terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeEvent {
    Motion { x: i16, y: i16 },
    Button { button: u8, down: bool },
    Key { keycode: u8, down: bool },
}

impl FakeEvent {
    fn motion(x: u32, y: u32) -> Self {
        FakeEvent::Motion {
            x: i16::try_from(x).unwrap_or(i16::MAX),
            y: i16::try_from(y).unwrap_or(i16::MAX),
        }
    }

    /// `(type, detail, x, y)` for `xtest_fake_input`
    fn wire(self) -> (u8, u8, i16, i16) {
        match self {
            FakeEvent::Motion { x, y } => (xproto::MOTION_NOTIFY_EVENT, 0, x, y),
            FakeEvent::Button { button, down: true } => (xproto::BUTTON_PRESS_EVENT, button, 0, 0),
            FakeEvent::Button { button, down: false } => {
                (xproto::BUTTON_RELEASE_EVENT, button, 0, 0)
            }
            FakeEvent::Key { keycode, down: true } => (xproto::KEY_PRESS_EVENT, keycode, 0, 0),
            FakeEvent::Key { keycode, down: false } => (xproto::KEY_RELEASE_EVENT, keycode, 0, 0),
        }
    }
}

/// An open display with XTest available
struct Display {
    conn: RustConnection,
    root: xproto::Window,
    keymap: KeyMap,
}

impl Display {
    fn open(name: &str) -> Result<Self> {
        let (conn, screen) = x11rb::connect(Some(name)).map_err(x11_error)?;
        let setup = conn.setup();
        let root = setup
            .roots
            .get(screen)
            .map(|s| s.root)
            .ok_or_else(|| x11_error(format!("no screen {} on {}", screen, name)))?;
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);

        let version = conn
            .xtest_get_version(2, 2)
            .map_err(x11_error)?
            .reply()
            .map_err(x11_error)?;

        let mapping = conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)
            .map_err(x11_error)?
            .reply()
            .map_err(x11_error)?;

        info!(
            "Connected to X display {} (XTest {}.{})",
            name, version.major_version, version.minor_version
        );

        Ok(Self {
            conn,
            root,
            keymap: KeyMap {
                min_keycode,
                per_keycode: mapping.keysyms_per_keycode,
                keysyms: mapping.keysyms,
            },
        })
    }

    fn send(&self, events: &[FakeEvent]) -> Result<()> {
        for event in events {
            let (kind, detail, x, y) = event.wire();
            self.conn
                .xtest_fake_input(kind, detail, x11rb::CURRENT_TIME, self.root, x, y, 0)
                .map_err(x11_error)?
                .ignore_error();
        }
        self.conn.flush().map_err(x11_error)
    }
}

/// Drives the X server of the virtual desktop
pub struct X11Backend {
    display_name: String,
    display: Mutex<Option<Display>>,
}

impl X11Backend {
    pub fn new(display: impl Into<String>) -> Self {
        Self {
            display_name: display.into(),
            display: Mutex::new(None),
        }
    }

    /// Run `op` on the open display, opening it first if needed.
    /// A failed operation closes the display for the next call to reopen.
    fn with_display<T>(&self, op: impl FnOnce(&Display) -> Result<T>) -> Result<T> {
        let mut guard = self.display.lock();
        let display = match guard.take() {
            Some(display) => display,
            None => Display::open(&self.display_name).map_err(|e| {
                debug!("Cannot open X display {}: {}", self.display_name, e);
                e
            })?,
        };

        let result = op(&display);
        match &result {
            Ok(_) => *guard = Some(display),
            Err(e) => warn!("Closing X display {} after error: {}", self.display_name, e),
        }
        result
    }

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .env("DISPLAY", &self.display_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for X11Backend {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY)
    }
}

fn scroll_events(direction: ScrollDirection) -> [FakeEvent; 2] {
    let button = direction.x11_button();
    [
        FakeEvent::Button { button, down: true },
        FakeEvent::Button { button, down: false },
    ]
}

#[async_trait]
impl InputBackend for X11Backend {
    fn name(&self) -> &'static str {
        "xtest"
    }

    async fn move_pointer(&self, x: u32, y: u32) -> Result<()> {
        self.with_display(|d| d.send(&[FakeEvent::motion(x, y)]))
    }

    async fn button(&self, button: MouseButton, down: bool) -> Result<()> {
        let event = FakeEvent::Button {
            button: button.x11_button(),
            down,
        };
        self.with_display(|d| d.send(&[event]))
    }

    async fn key(&self, keysym: u32, down: bool) -> Result<()> {
        self.with_display(|d| match d.keymap.keycode(keysym) {
            Some(keycode) => d.send(&[FakeEvent::Key { keycode, down }]),
            None => {
                debug!("No keycode for keysym 0x{:x}", keysym);
                Ok(())
            }
        })
    }

    async fn scroll(&self, direction: ScrollDirection) -> Result<()> {
        self.with_display(|d| d.send(&scroll_events(direction)))
    }

    async fn set_clipboard(&self, text: &str) -> Result<()> {
        let mut child = self
            .command("xclip")
            .args(["-selection", "clipboard", "-in"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Internal(format!("xclip: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        // xclip forks to serve the selection; the parent exits once the data is read
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::Internal(format!("xclip exited with {}", status)))
        }
    }

    async fn clipboard(&self) -> Result<String> {
        let output = self
            .command("xclip")
            .args(["-selection", "clipboard", "-out"])
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("xclip: {}", e)))?;

        if !output.status.success() {
            // Empty selection
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
