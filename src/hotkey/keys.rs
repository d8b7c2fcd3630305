//! Key chord definitions and parsing
//!
//! A chord is a set of held modifiers plus one key, written the usual way:
//! `ctrl+shift+q`, `ctrl+right`. Parsing is case-insensitive and modifier
//! order does not matter.

use std::str::FromStr;

/// Tracks which modifier keys are held
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierState {
    /// Control key is held
    pub control: bool,
    /// Shift key is held
    pub shift: bool,
    /// Alt/Option key is held
    pub alt: bool,
}

impl ModifierState {
    pub const CONTROL: Self = Self {
        control: true,
        shift: false,
        alt: false,
    };

    pub const CONTROL_SHIFT: Self = Self {
        control: true,
        shift: true,
        alt: false,
    };

    pub const CONTROL_ALT: Self = Self {
        control: true,
        shift: false,
        alt: true,
    };
}

/// The non-modifier key of a chord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// A letter or digit, stored lowercase
    Char(char),
    Left,
    Right,
    Up,
    Down,
}

/// Modifiers plus a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub modifiers: ModifierState,
    pub key: Key,
}

impl KeyChord {
    pub const fn new(modifiers: ModifierState, key: Key) -> Self {
        Self { modifiers, key }
    }
}

/// Errors from parsing a chord
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChordParseError {
    #[error("empty key chord")]
    Empty,

    #[error("unknown key `{0}`")]
    UnknownKey(String),

    #[error("chord `{0}` has more than one non-modifier key")]
    MultipleKeys(String),

    #[error("chord `{0}` has no non-modifier key")]
    MissingKey(String),
}

impl FromStr for KeyChord {
    type Err = ChordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ChordParseError::Empty);
        }

        let mut modifiers = ModifierState::default();
        let mut key = None;

        for part in normalized.split('+').map(str::trim) {
            match part {
                "ctrl" | "control" => modifiers.control = true,
                "shift" => modifiers.shift = true,
                "alt" | "option" => modifiers.alt = true,
                other => {
                    let parsed = parse_key(other)?;
                    if key.replace(parsed).is_some() {
                        return Err(ChordParseError::MultipleKeys(s.trim().to_string()));
                    }
                }
            }
        }

        match key {
            Some(key) => Ok(KeyChord { modifiers, key }),
            None => Err(ChordParseError::MissingKey(s.trim().to_string())),
        }
    }
}

fn parse_key(name: &str) -> Result<Key, ChordParseError> {
    let key = match name {
        "left" => Key::Left,
        "right" => Key::Right,
        "up" => Key::Up,
        "down" => Key::Down,
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Key::Char(c),
                _ => return Err(ChordParseError::UnknownKey(name.to_string())),
            }
        }
    };
    Ok(key)
}

impl std::fmt::Display for KeyChord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifiers.control {
            write!(f, "ctrl+")?;
        }
        if self.modifiers.shift {
            write!(f, "shift+")?;
        }
        if self.modifiers.alt {
            write!(f, "alt+")?;
        }
        match self.key {
            Key::Char(c) => write!(f, "{}", c),
            Key::Left => write!(f, "left"),
            Key::Right => write!(f, "right"),
            Key::Up => write!(f, "up"),
            Key::Down => write!(f, "down"),
        }
    }
}
