//! Browser input: protocol decoding and injection into the desktop
//!
//! Each WebSocket connection owns an [`InputHandler`], which scales pointer
//! coordinates, forwards events to the shared [`InputBackend`] and remembers
//! what is held down so a dropped connection can release it.

pub mod backend;
pub mod protocol;
pub mod websocket;
pub mod x11;

pub use backend::{InputBackend, NoopBackend};
pub use protocol::{InputEvent, MouseButton, ScrollDirection, ServerMessage};
pub use x11::X11Backend;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::ScreenSize;
use crate::error::Result;

/// Per-connection event dispatcher
pub struct InputHandler {
    backend: Arc<dyn InputBackend>,
    screen: ScreenSize,
    held_buttons: HashSet<MouseButton>,
    held_keys: HashSet<u32>,
}

impl InputHandler {
    pub fn new(backend: Arc<dyn InputBackend>, screen: ScreenSize) -> Self {
        Self {
            backend,
            screen,
            held_buttons: HashSet::new(),
            held_keys: HashSet::new(),
        }
    }

    /// Apply one event. Returns the reply to send back, if any.
    pub async fn handle(&mut self, event: InputEvent) -> Result<Option<ServerMessage>> {
        match event {
            InputEvent::MouseMove { x, y } => {
                match protocol::scale_pointer(x, y, self.screen) {
                    Some((px, py)) => self.backend.move_pointer(px, py).await?,
                    None => debug!("Pointer ({}, {}) outside the screen", x, y),
                }
            }
            InputEvent::MouseButton { button, down } => {
                self.backend.button(button, down).await?;
                if down {
                    self.held_buttons.insert(button);
                } else {
                    self.held_buttons.remove(&button);
                }
            }
            InputEvent::Key { keysym, down } => {
                self.backend.key(keysym, down).await?;
                if down {
                    self.held_keys.insert(keysym);
                } else {
                    self.held_keys.remove(&keysym);
                }
            }
            InputEvent::Scroll(direction) => self.backend.scroll(direction).await?,
            InputEvent::ClipboardUpload(text) => self.backend.set_clipboard(&text).await?,
            InputEvent::ClipboardRequest => {
                let text = self.backend.clipboard().await?;
                return Ok(Some(ServerMessage::Clipboard(text)));
            }
        }
        Ok(None)
    }

    /// Release every key and button this connection left pressed
    pub async fn release_all(&mut self) {
        for keysym in self.held_keys.drain() {
            if let Err(e) = self.backend.key(keysym, false).await {
                debug!("Failed to release key 0x{:x}: {}", keysym, e);
            }
        }
        for button in self.held_buttons.drain() {
            if let Err(e) = self.backend.button(button, false).await {
                debug!("Failed to release {:?}: {}", button, e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every call as a short string
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub calls: Mutex<Vec<String>>,
        pub clipboard: Mutex<String>,
    }

    impl RecordingBackend {
        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    #[async_trait]
    impl InputBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn move_pointer(&self, x: u32, y: u32) -> Result<()> {
            self.calls.lock().push(format!("move {} {}", x, y));
            Ok(())
        }

        async fn button(&self, button: MouseButton, down: bool) -> Result<()> {
            self.calls
                .lock()
                .push(format!("button {} {}", button.x11_button(), down));
            Ok(())
        }

        async fn key(&self, keysym: u32, down: bool) -> Result<()> {
            self.calls.lock().push(format!("key 0x{:x} {}", keysym, down));
            Ok(())
        }

        async fn scroll(&self, direction: ScrollDirection) -> Result<()> {
            self.calls
                .lock()
                .push(format!("scroll {}", direction.x11_button()));
            Ok(())
        }

        async fn set_clipboard(&self, text: &str) -> Result<()> {
            *self.clipboard.lock() = text.to_string();
            self.calls.lock().push("set_clipboard".to_string());
            Ok(())
        }

        async fn clipboard(&self) -> Result<String> {
            Ok(self.clipboard.lock().clone())
        }
    }
}
