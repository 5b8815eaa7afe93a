// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Maps pointer, keyboard and MIDI input onto pad indices.

use midly::{live::LiveEvent, MidiMessage};
use tracing::debug;

use crate::kit::PAD_COUNT;

/// MIDI note that triggers pad 0 unless configured otherwise.
pub const DEFAULT_BASE_NOTE: u8 = 36;

/// Physical key codes in a 4x4 grid. The bottom row plays the first pads.
const KEY_MAP: [(&str, usize); PAD_COUNT] = [
    ("Digit1", 12),
    ("Digit2", 13),
    ("Digit3", 14),
    ("Digit4", 15),
    ("KeyQ", 8),
    ("KeyW", 9),
    ("KeyE", 10),
    ("KeyR", 11),
    ("KeyA", 4),
    ("KeyS", 5),
    ("KeyD", 6),
    ("KeyF", 7),
    ("KeyZ", 0),
    ("KeyX", 1),
    ("KeyC", 2),
    ("KeyV", 3),
];

/// Where a key press landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    /// The pad surface or anything else that isn't editable.
    Surface,
    /// A text field, e.g. a kit name being typed. Never triggers pads.
    TextEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: String,
    pub target: KeyTarget,
}

impl KeyEvent {
    pub fn new(code: &str, target: KeyTarget) -> KeyEvent {
        KeyEvent {
            code: code.to_string(),
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A pad that was already hit-tested.
    Pointer(usize),
    Key(KeyEvent),
    /// A raw MIDI message.
    Midi(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
pub struct InputRouter {
    base_note: u8,
}

impl Default for InputRouter {
    fn default() -> Self {
        InputRouter::new(DEFAULT_BASE_NOTE)
    }
}

impl InputRouter {
    pub fn new(base_note: u8) -> InputRouter {
        InputRouter { base_note }
    }

    pub fn base_note(&self) -> u8 {
        self.base_note
    }

    /// The pad an event should trigger, if any. Out of range input is just "no pad".
    pub fn route(&self, event: &InputEvent) -> Option<usize> {
        let pad = match event {
            InputEvent::Pointer(index) => Some(*index),
            InputEvent::Key(key) => self.route_key(key),
            InputEvent::Midi(raw) => self.route_midi(raw),
        };
        pad.filter(|pad| *pad < PAD_COUNT)
    }

    fn route_key(&self, key: &KeyEvent) -> Option<usize> {
        if key.target == KeyTarget::TextEntry {
            return None;
        }
        KEY_MAP
            .iter()
            .find(|(code, _)| *code == key.code)
            .map(|(_, pad)| *pad)
    }

    fn route_midi(&self, raw: &[u8]) -> Option<usize> {
        let event = match LiveEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(err = format!("{:?}", e), "Ignoring unparseable MIDI message.");
                return None;
            }
        };
        match event {
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } if vel.as_int() > 0 => {
                let note = key.as_int();
                note.checked_sub(self.base_note).map(usize::from)
            }
            _ => None,
        }
    }
}

/// The key code a terminal character stands for, using the same layout as a keyboard.
pub fn key_code_for_char(c: char) -> Option<String> {
    match c.to_ascii_uppercase() {
        digit @ '0'..='9' => Some(format!("Digit{}", digit)),
        letter @ 'A'..='Z' => Some(format!("Key{}", letter)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{key_code_for_char, InputEvent, InputRouter, KeyEvent, KeyTarget};

    fn note_on(note: u8, velocity: u8) -> InputEvent {
        InputEvent::Midi(vec![0x90, note, velocity])
    }

    #[test]
    fn test_midi_notes() {
        let router = InputRouter::default();
        let base = router.base_note();

        assert_eq!(router.route(&note_on(base + 5, 64)), Some(5));
        assert_eq!(router.route(&note_on(base + 5, 0)), None);
        assert_eq!(router.route(&note_on(base - 1, 64)), None);
        assert_eq!(router.route(&note_on(base + 16, 64)), None);
        // Any channel.
        assert_eq!(router.route(&InputEvent::Midi(vec![0x9A, base, 1])), Some(0));
        // Note off and garbage.
        assert_eq!(router.route(&InputEvent::Midi(vec![0x80, base, 64])), None);
        assert_eq!(router.route(&InputEvent::Midi(vec![0xFF, 0xFF])), None);
        assert_eq!(router.route(&InputEvent::Midi(Vec::new())), None);
    }

    #[test]
    fn test_custom_base_note() {
        let router = InputRouter::new(60);
        assert_eq!(router.route(&note_on(60, 100)), Some(0));
        assert_eq!(router.route(&note_on(36, 100)), None);
    }

    #[test]
    fn test_keyboard_grid() {
        let router = InputRouter::default();
        let route = |code: &str| router.route(&InputEvent::Key(KeyEvent::new(code, KeyTarget::Surface)));

        assert_eq!(route("KeyZ"), Some(0));
        assert_eq!(route("KeyV"), Some(3));
        assert_eq!(route("KeyA"), Some(4));
        assert_eq!(route("KeyR"), Some(11));
        assert_eq!(route("Digit1"), Some(12));
        assert_eq!(route("Digit4"), Some(15));
        assert_eq!(route("KeyP"), None);
        assert_eq!(
            router.route(&InputEvent::Key(KeyEvent::new("KeyZ", KeyTarget::TextEntry))),
            None
        );
    }

    #[test]
    fn test_pointer() {
        let router = InputRouter::default();
        assert_eq!(router.route(&InputEvent::Pointer(7)), Some(7));
        assert_eq!(router.route(&InputEvent::Pointer(16)), None);
    }

    #[test]
    fn test_key_code_for_char() {
        assert_eq!(key_code_for_char('q').as_deref(), Some("KeyQ"));
        assert_eq!(key_code_for_char('Z').as_deref(), Some("KeyZ"));
        assert_eq!(key_code_for_char('3').as_deref(), Some("Digit3"));
        assert_eq!(key_code_for_char(' '), None);
    }
}
