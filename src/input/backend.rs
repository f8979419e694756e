//! Input injection backend trait definition

use async_trait::async_trait;

use super::protocol::{MouseButton, ScrollDirection};
use crate::error::Result;

/// Synthesizes pointer, keyboard and clipboard input on the desktop
#[async_trait]
pub trait InputBackend: Send + Sync {
    /// Get backend name
    fn name(&self) -> &'static str;

    /// Warp the pointer to absolute screen coordinates
    async fn move_pointer(&self, x: u32, y: u32) -> Result<()>;

    async fn button(&self, button: MouseButton, down: bool) -> Result<()>;

    /// Press or release the key producing `keysym`
    async fn key(&self, keysym: u32, down: bool) -> Result<()>;

    /// One wheel notch
    async fn scroll(&self, direction: ScrollDirection) -> Result<()>;

    async fn set_clipboard(&self, text: &str) -> Result<()>;

    async fn clipboard(&self) -> Result<String>;
}

/// Backend used outside a container: accepts everything, injects nothing
#[derive(Debug, Default)]
pub struct NoopBackend;

#[async_trait]
impl InputBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn move_pointer(&self, _x: u32, _y: u32) -> Result<()> {
        Ok(())
    }

    async fn button(&self, _button: MouseButton, _down: bool) -> Result<()> {
        Ok(())
    }

    async fn key(&self, _keysym: u32, _down: bool) -> Result<()> {
        Ok(())
    }

    async fn scroll(&self, _direction: ScrollDirection) -> Result<()> {
        Ok(())
    }

    async fn set_clipboard(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn clipboard(&self) -> Result<String> {
        Ok(String::new())
    }
}
