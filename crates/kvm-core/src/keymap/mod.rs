//! Key identifiers, modifier masks and hotkey parsing.
//!
//! Keys travel on the wire as 16-bit *key ids*.  Printable keys use their
//! Unicode code point (`'a'` is `0x0061`); special keys live in the `0xEFxx`
//! block, which mirrors the X11 keysym range `0xFFxx` shifted down by `0x1000`.
//! Both ends of a session agree on this space, so no per-platform table is
//! needed inside the core: the platform backends translate at their boundary.
//!
//! # Hotkey strings (for beginners)
//!
//! Rules in the server configuration name their trigger as text, e.g.
//! `"Control+Alt+F1"` or `"Super+Left"`.  [`parse_hotkey`] splits the string on
//! `+`, folds every modifier name into a [`ModifierMask`] and resolves the final
//! part to a [`KeyId`].  Mouse bindings use `"Button3"` style names and go
//! through [`parse_button_binding`].

pub mod modifiers;
pub mod names;

pub use modifiers::ModifierMask;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A 16-bit key identifier as carried by key messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub u16);

impl KeyId {
    pub const NONE: KeyId = KeyId(0x0000);
    pub const BACKSPACE: KeyId = KeyId(0xEF08);
    pub const TAB: KeyId = KeyId(0xEF09);
    pub const RETURN: KeyId = KeyId(0xEF0D);
    pub const PAUSE: KeyId = KeyId(0xEF13);
    pub const SCROLL_LOCK: KeyId = KeyId(0xEF14);
    pub const ESCAPE: KeyId = KeyId(0xEF1B);
    pub const HOME: KeyId = KeyId(0xEF50);
    pub const LEFT: KeyId = KeyId(0xEF51);
    pub const UP: KeyId = KeyId(0xEF52);
    pub const RIGHT: KeyId = KeyId(0xEF53);
    pub const DOWN: KeyId = KeyId(0xEF54);
    pub const PAGE_UP: KeyId = KeyId(0xEF55);
    pub const PAGE_DOWN: KeyId = KeyId(0xEF56);
    pub const END: KeyId = KeyId(0xEF57);
    pub const PRINT: KeyId = KeyId(0xEF61);
    pub const INSERT: KeyId = KeyId(0xEF63);
    pub const MENU: KeyId = KeyId(0xEF67);
    pub const NUM_LOCK: KeyId = KeyId(0xEF7F);
    pub const F1: KeyId = KeyId(0xEFBE);
    pub const F12: KeyId = KeyId(0xEFC9);
    pub const SHIFT_L: KeyId = KeyId(0xEFE1);
    pub const SHIFT_R: KeyId = KeyId(0xEFE2);
    pub const CONTROL_L: KeyId = KeyId(0xEFE3);
    pub const CONTROL_R: KeyId = KeyId(0xEFE4);
    pub const CAPS_LOCK: KeyId = KeyId(0xEFE5);
    pub const META_L: KeyId = KeyId(0xEFE7);
    pub const META_R: KeyId = KeyId(0xEFE8);
    pub const ALT_L: KeyId = KeyId(0xEFE9);
    pub const ALT_R: KeyId = KeyId(0xEFEA);
    pub const SUPER_L: KeyId = KeyId(0xEFEB);
    pub const SUPER_R: KeyId = KeyId(0xEFEC);
    pub const DELETE: KeyId = KeyId(0xEFFF);

    /// Returns the function key `F{n}` for `n` in `1..=12`.
    pub fn function(n: u8) -> Option<KeyId> {
        (1..=12)
            .contains(&n)
            .then(|| KeyId(Self::F1.0 + u16::from(n) - 1))
    }

    /// Returns the key id for a printable character.
    ///
    /// Letters are folded to lower case, matching what the capture side
    /// reports for an unshifted key press.
    pub fn from_char(c: char) -> Option<KeyId> {
        let c = c.to_ascii_lowercase();
        u16::try_from(u32::from(c)).ok().map(KeyId)
    }

    /// Returns `true` for the modifier keys themselves (Shift, Control, ...).
    pub fn is_modifier(self) -> bool {
        (Self::SHIFT_L.0..=Self::SUPER_R.0).contains(&self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match names::key_name(*self) {
            Some(name) => f.write_str(name),
            None => match char::from_u32(u32::from(self.0)) {
                Some(c) if self.0 < 0xE000 && !c.is_control() => write!(f, "{c}"),
                _ => write!(f, "0x{:04X}", self.0),
            },
        }
    }
}

/// Mouse button identifier: 1 = left, 2 = middle, 3 = right, 4/5 = extra buttons.
pub type ButtonId = u8;

pub const BUTTON_LEFT: ButtonId = 1;
pub const BUTTON_MIDDLE: ButtonId = 2;
pub const BUTTON_RIGHT: ButtonId = 3;

/// Errors produced while parsing hotkey strings from configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("empty hotkey")]
    Empty,

    #[error("unknown key name: {0:?}")]
    UnknownKey(String),

    #[error("unknown modifier: {0:?}")]
    UnknownModifier(String),

    #[error("invalid mouse button: {0:?}")]
    InvalidButton(String),
}

/// Parses `"Modifier+...+Key"` into a key id and modifier mask.
///
/// # Errors
///
/// Returns [`KeyParseError`] when a part is empty, names an unknown modifier,
/// or the final part is not a known key.
///
/// # Examples
///
/// ```rust
/// use kvm_core::keymap::{parse_hotkey, KeyId, ModifierMask};
///
/// let (key, mask) = parse_hotkey("Control+F1").unwrap();
/// assert_eq!(key, KeyId::F1);
/// assert_eq!(mask, ModifierMask::CONTROL);
/// ```
pub fn parse_hotkey(text: &str) -> Result<(KeyId, ModifierMask), KeyParseError> {
    let (key_part, mask) = split_modifiers(text)?;
    let key = names::key_from_name(key_part)
        .ok_or_else(|| KeyParseError::UnknownKey(key_part.to_string()))?;
    Ok((key, mask))
}

/// Parses `"Modifier+...+ButtonN"` into a button id and modifier mask.
///
/// # Errors
///
/// Returns [`KeyParseError::InvalidButton`] unless the final part is
/// `Button1` .. `Button5` (case-insensitive).
pub fn parse_button_binding(text: &str) -> Result<(ButtonId, ModifierMask), KeyParseError> {
    let (button_part, mask) = split_modifiers(text)?;
    let digits = button_part
        .get(..6)
        .filter(|prefix| prefix.eq_ignore_ascii_case("button"))
        .map(|_| &button_part[6..])
        .ok_or_else(|| KeyParseError::InvalidButton(button_part.to_string()))?;
    match digits.parse::<u8>() {
        Ok(n) if (1..=5).contains(&n) => Ok((n, mask)),
        _ => Err(KeyParseError::InvalidButton(button_part.to_string())),
    }
}

/// Splits off leading modifier names and returns the last part with the mask.
fn split_modifiers(text: &str) -> Result<(&str, ModifierMask), KeyParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(KeyParseError::Empty);
    }
    // "Control++" binds the plus key itself.
    let (head, last) = match text.strip_suffix("++") {
        Some(head) => (head, "+"),
        None => match text.rsplit_once('+') {
            Some((head, last)) => (head, last),
            None => ("", text),
        },
    };
    let last = last.trim();
    if last.is_empty() {
        return Err(KeyParseError::Empty);
    }

    let mut mask = ModifierMask::NONE;
    for part in head.split('+').map(str::trim).filter(|p| !p.is_empty()) {
        let bit = ModifierMask::from_name(part)
            .ok_or_else(|| KeyParseError::UnknownModifier(part.to_string()))?;
        mask |= bit;
    }
    Ok((last, mask))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
