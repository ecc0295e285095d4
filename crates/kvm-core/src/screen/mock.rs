//! Recording [`ScreenBackend`] for orchestrator tests in any crate.

use std::collections::HashMap;

use crate::domain::geometry::ScreenShape;
use crate::keymap::{ButtonId, ModifierMask};
use crate::protocol::messages::{ClipboardId, KeyEvent};
use crate::screen::{KeyPhase, ScreenBackend, ScreenError};

/// One call made on a [`RecordingScreen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenCall {
    Enter { x: i32, y: i32, mask: ModifierMask },
    Leave,
    Motion { x: i32, y: i32 },
    RelativeMotion { dx: i32, dy: i32 },
    Key { key: KeyEvent, phase: KeyPhase },
    Button { button: ButtonId, down: bool },
    Wheel { dx: i32, dy: i32 },
    SetClipboard { id: ClipboardId, data: Vec<u8> },
    Warp { x: i32, y: i32 },
    Screensaver(bool),
}

/// Remembers every call, tracks the cursor and clipboards like a real screen.
#[derive(Debug, Clone)]
pub struct RecordingScreen {
    shape: ScreenShape,
    cursor: (i32, i32),
    clipboards: HashMap<ClipboardId, Vec<u8>>,
    calls: Vec<ScreenCall>,
}

impl RecordingScreen {
    pub fn new(shape: ScreenShape) -> Self {
        Self {
            shape,
            cursor: shape.center(),
            clipboards: HashMap::new(),
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[ScreenCall] {
        &self.calls
    }

    /// Returns and forgets the calls recorded so far.
    pub fn take_calls(&mut self) -> Vec<ScreenCall> {
        std::mem::take(&mut self.calls)
    }

    /// Puts data on a clipboard without recording a call, as if the user
    /// had copied something locally.
    pub fn preset_clipboard(&mut self, id: ClipboardId, data: &[u8]) {
        self.clipboards.insert(id, data.to_vec());
    }

    /// Moves the cursor without recording a call, as if the user moved it.
    pub fn place_cursor(&mut self, x: i32, y: i32) {
        self.cursor = (x, y);
    }
}

impl ScreenBackend for RecordingScreen {
    fn enter(&mut self, x: i32, y: i32, mask: ModifierMask) -> Result<(), ScreenError> {
        self.cursor = (x, y);
        self.calls.push(ScreenCall::Enter { x, y, mask });
        Ok(())
    }

    fn leave(&mut self) -> Result<(), ScreenError> {
        self.calls.push(ScreenCall::Leave);
        Ok(())
    }

    fn apply_motion(&mut self, x: i32, y: i32) -> Result<(), ScreenError> {
        self.cursor = (x, y);
        self.calls.push(ScreenCall::Motion { x, y });
        Ok(())
    }

    fn apply_relative_motion(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError> {
        self.cursor = (self.cursor.0 + dx, self.cursor.1 + dy);
        self.calls.push(ScreenCall::RelativeMotion { dx, dy });
        Ok(())
    }

    fn apply_key(&mut self, key: KeyEvent, phase: KeyPhase) -> Result<(), ScreenError> {
        self.calls.push(ScreenCall::Key { key, phase });
        Ok(())
    }

    fn apply_button(&mut self, button: ButtonId, down: bool) -> Result<(), ScreenError> {
        self.calls.push(ScreenCall::Button { button, down });
        Ok(())
    }

    fn apply_wheel(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError> {
        self.calls.push(ScreenCall::Wheel { dx, dy });
        Ok(())
    }

    fn set_clipboard(&mut self, id: ClipboardId, data: &[u8]) -> Result<(), ScreenError> {
        self.clipboards.insert(id, data.to_vec());
        self.calls.push(ScreenCall::SetClipboard {
            id,
            data: data.to_vec(),
        });
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
        self.cursor = (x, y);
        self.calls.push(ScreenCall::Warp { x, y });
        Ok(())
    }

    fn screensaver(&mut self, on: bool) -> Result<(), ScreenError> {
        self.calls.push(ScreenCall::Screensaver(on));
        Ok(())
    }
}
