//! Modifier key mask carried by enter and key messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bit set of active modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ModifierMask(pub u16);

impl ModifierMask {
    pub const NONE: ModifierMask = ModifierMask(0x0000);
    pub const SHIFT: ModifierMask = ModifierMask(0x0001);
    pub const CONTROL: ModifierMask = ModifierMask(0x0002);
    pub const ALT: ModifierMask = ModifierMask(0x0004);
    pub const META: ModifierMask = ModifierMask(0x0008);
    pub const SUPER: ModifierMask = ModifierMask(0x0010);
    pub const ALT_GR: ModifierMask = ModifierMask(0x0020);
    pub const LEVEL5_LOCK: ModifierMask = ModifierMask(0x0040);
    pub const CAPS_LOCK: ModifierMask = ModifierMask(0x1000);
    pub const NUM_LOCK: ModifierMask = ModifierMask(0x2000);
    pub const SCROLL_LOCK: ModifierMask = ModifierMask(0x4000);

    /// The toggle modifiers, ignored when matching hotkeys.
    pub const LOCKS: ModifierMask = ModifierMask(0x7000);

    /// Returns `true` when every bit of `other` is set in `self`.
    pub fn contains(self, other: ModifierMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Drops the lock bits (Caps/Num/Scroll Lock).
    pub fn without_locks(self) -> ModifierMask {
        self & !Self::LOCKS
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Resolves a modifier name as written in hotkey strings.
    pub fn from_name(name: &str) -> Option<ModifierMask> {
        let mask = match name.to_ascii_lowercase().as_str() {
            "shift" => Self::SHIFT,
            "control" | "ctrl" => Self::CONTROL,
            "alt" | "option" => Self::ALT,
            "meta" => Self::META,
            "super" | "win" | "cmd" | "command" => Self::SUPER,
            "altgr" => Self::ALT_GR,
            _ => return None,
        };
        Some(mask)
    }
}

impl BitOr for ModifierMask {
    type Output = ModifierMask;

    fn bitor(self, rhs: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifierMask {
    fn bitor_assign(&mut self, rhs: ModifierMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ModifierMask {
    type Output = ModifierMask;

    fn bitand(self, rhs: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 & rhs.0)
    }
}

impl Not for ModifierMask {
    type Output = ModifierMask;

    fn not(self) -> ModifierMask {
        ModifierMask(!self.0)
    }
}

impl fmt::Display for ModifierMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ModifierMask, &str); 6] = [
            (ModifierMask::SHIFT, "Shift"),
            (ModifierMask::CONTROL, "Control"),
            (ModifierMask::ALT, "Alt"),
            (ModifierMask::META, "Meta"),
            (ModifierMask::SUPER, "Super"),
            (ModifierMask::ALT_GR, "AltGr"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}
