//! Hotkey module for key chord intake
//!
//! Turns raw input lines into [`KeyChord`]s and forwards them to the
//! dispatcher without ever waiting on it.

mod keys;
mod listener;

pub use keys::{Key, KeyChord, ModifierState};
pub use listener::{HotkeyEvent, HotkeyListener};
