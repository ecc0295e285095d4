//! The local screen, as seen by the orchestrators.
//!
//! Capturing and injecting input is platform work that lives outside this
//! workspace.  Both orchestrators talk to the local machine only through the
//! [`ScreenBackend`] trait, chosen once at startup:
//!
//! - [`HeadlessScreen`] keeps a fixed shape and logs every call; the binaries
//!   use it when no platform backend is linked in;
//! - [`mock::RecordingScreen`] records every call for tests.

pub mod mock;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::domain::geometry::ScreenShape;
use crate::keymap::{ButtonId, ModifierMask};
use crate::protocol::messages::{ClipboardId, KeyEvent};

/// Errors reported by a screen backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScreenError {
    #[error("platform error: {0}")]
    Platform(String),

    #[error("not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// Which key transition to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Down,
    Up,
    /// Auto-repeat, `count` presses.
    Repeat(u16),
}

/// Input injection, clipboard access and geometry for the local screen.
#[cfg_attr(test, mockall::automock)]
pub trait ScreenBackend {
    /// The cursor entered this screen at `(x, y)` with `mask` held.
    fn enter(&mut self, x: i32, y: i32, mask: ModifierMask) -> Result<(), ScreenError>;

    /// The cursor left this screen.
    fn leave(&mut self) -> Result<(), ScreenError>;

    /// Moves the cursor to an absolute position.
    fn apply_motion(&mut self, x: i32, y: i32) -> Result<(), ScreenError>;

    /// Moves the cursor by a delta.
    fn apply_relative_motion(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError>;

    fn apply_key(&mut self, key: KeyEvent, phase: KeyPhase) -> Result<(), ScreenError>;

    fn apply_button(&mut self, button: ButtonId, down: bool) -> Result<(), ScreenError>;

    fn apply_wheel(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError>;

    fn set_clipboard(&mut self, id: ClipboardId, data: &[u8]) -> Result<(), ScreenError>;

    /// Current contents of clipboard `id`, if any.
    fn get_clipboard(&self, id: ClipboardId) -> Option<Vec<u8>>;

    fn shape(&self) -> ScreenShape;

    fn cursor_position(&self) -> (i32, i32);

    /// Moves the local cursor without generating input events.
    fn warp(&mut self, x: i32, y: i32) -> Result<(), ScreenError>;

    fn screensaver(&mut self, on: bool) -> Result<(), ScreenError>;
}

/// A screen with a fixed shape that only logs what it is asked to do.
#[derive(Debug, Clone)]
pub struct HeadlessScreen {
    shape: ScreenShape,
    cursor: (i32, i32),
    clipboards: HashMap<ClipboardId, Vec<u8>>,
}

impl HeadlessScreen {
    pub fn new(shape: ScreenShape) -> Self {
        Self {
            shape,
            cursor: shape.center(),
            clipboards: HashMap::new(),
        }
    }
}

impl ScreenBackend for HeadlessScreen {
    fn enter(&mut self, x: i32, y: i32, mask: ModifierMask) -> Result<(), ScreenError> {
        debug!(x, y, %mask, "enter");
        self.cursor = self.shape.clamp(x, y);
        Ok(())
    }

    fn leave(&mut self) -> Result<(), ScreenError> {
        debug!("leave");
        Ok(())
    }

    fn apply_motion(&mut self, x: i32, y: i32) -> Result<(), ScreenError> {
        trace!(x, y, "motion");
        self.cursor = self.shape.clamp(x, y);
        Ok(())
    }

    fn apply_relative_motion(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError> {
        trace!(dx, dy, "relative motion");
        let (x, y) = self.cursor;
        self.cursor = self.shape.clamp(x.saturating_add(dx), y.saturating_add(dy));
        Ok(())
    }

    fn apply_key(&mut self, key: KeyEvent, phase: KeyPhase) -> Result<(), ScreenError> {
        trace!(key = %key.id, mask = %key.mask, ?phase, "key");
        Ok(())
    }

    fn apply_button(&mut self, button: ButtonId, down: bool) -> Result<(), ScreenError> {
        trace!(button, down, "button");
        Ok(())
    }

    fn apply_wheel(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError> {
        trace!(dx, dy, "wheel");
        Ok(())
    }

    fn set_clipboard(&mut self, id: ClipboardId, data: &[u8]) -> Result<(), ScreenError> {
        debug!(%id, len = data.len(), "clipboard set");
        self.clipboards.insert(id, data.to_vec());
        Ok(())
    }

    fn get_clipboard(&self, id: ClipboardId) -> Option<Vec<u8>> {
        self.clipboards.get(&id).cloned()
    }

    fn shape(&self) -> ScreenShape {
        self.shape
    }

    fn cursor_position(&self) -> (i32, i32) {
        self.cursor
    }

    fn warp(&mut self, x: i32, y: i32) -> Result<(), ScreenError> {
        self.cursor = self.shape.clamp(x, y);
        Ok(())
    }

    fn screensaver(&mut self, on: bool) -> Result<(), ScreenError> {
        debug!(on, "screensaver");
        Ok(())
    }
}
