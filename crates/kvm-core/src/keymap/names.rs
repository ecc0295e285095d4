//! Name table for special keys used in hotkey strings and log output.

use super::KeyId;

/// Named keys.  The first entry for an id is its canonical display name.
const KEY_NAMES: &[(&str, KeyId)] = &[
    ("BackSpace", KeyId::BACKSPACE),
    ("Tab", KeyId::TAB),
    ("Return", KeyId::RETURN),
    ("Enter", KeyId::RETURN),
    ("Pause", KeyId::PAUSE),
    ("ScrollLock", KeyId::SCROLL_LOCK),
    ("Escape", KeyId::ESCAPE),
    ("Esc", KeyId::ESCAPE),
    ("Home", KeyId::HOME),
    ("Left", KeyId::LEFT),
    ("Up", KeyId::UP),
    ("Right", KeyId::RIGHT),
    ("Down", KeyId::DOWN),
    ("PageUp", KeyId::PAGE_UP),
    ("PageDown", KeyId::PAGE_DOWN),
    ("End", KeyId::END),
    ("Print", KeyId::PRINT),
    ("Insert", KeyId::INSERT),
    ("Menu", KeyId::MENU),
    ("NumLock", KeyId::NUM_LOCK),
    ("Shift_L", KeyId::SHIFT_L),
    ("Shift_R", KeyId::SHIFT_R),
    ("Control_L", KeyId::CONTROL_L),
    ("Control_R", KeyId::CONTROL_R),
    ("CapsLock", KeyId::CAPS_LOCK),
    ("Meta_L", KeyId::META_L),
    ("Meta_R", KeyId::META_R),
    ("Alt_L", KeyId::ALT_L),
    ("Alt_R", KeyId::ALT_R),
    ("Super_L", KeyId::SUPER_L),
    ("Super_R", KeyId::SUPER_R),
    ("Delete", KeyId::DELETE),
    ("Space", KeyId(0x0020)),
];

/// Resolves a key name (case-insensitive), a function key `F1`..`F12`, or a
/// single printable character.
pub fn key_from_name(name: &str) -> Option<KeyId> {
    if let Some((_, id)) = KEY_NAMES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
    {
        return Some(*id);
    }

    if let Some(n) = name
        .strip_prefix('F')
        .or_else(|| name.strip_prefix('f'))
        .and_then(|digits| digits.parse::<u8>().ok())
    {
        return KeyId::function(n);
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => KeyId::from_char(c),
        _ => None,
    }
}

/// Returns the canonical name of a special key, if it has one.
pub fn key_name(id: KeyId) -> Option<&'static str> {
    if (KeyId::F1.0..=KeyId::F12.0).contains(&id.0) {
        const FUNCTION_NAMES: [&str; 12] = [
            "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12",
        ];
        return Some(FUNCTION_NAMES[usize::from(id.0 - KeyId::F1.0)]);
    }
    KEY_NAMES
        .iter()
        .find(|(_, candidate)| *candidate == id)
        .map(|(name, _)| *name)
}
