//! Keyboard fallback input for setups without MIDI hardware.
//!
//! Key events are translated into synthetic controller messages and fed
//! through the normal dispatch path, so bindings and learning behave the
//! same with or without a device:
//!
//! - Digits act as buttons: control change 0-9 with value 127 on press,
//!   nothing on release.
//! - Letters act as pads: note on (velocity 127) at note 36 + offset on
//!   press, note off on release.
//!
//! OS key autorepeat is suppressed; a held key fires once.

use std::sync::Arc;

use dashmap::DashMap;

use crate::midi::dispatcher::MidiDispatcher;
use crate::midi::message::{ControlKind, ControlMessage};
use crate::utils::now_millis;

/// First note number of the letter row ("a").
const LETTER_NOTE_BASE: u8 = 36;

/// Translates key events into synthetic MIDI messages.
pub struct KeyboardFallback {
    dispatcher: Arc<MidiDispatcher>,
    held: DashMap<char, ()>,
}

impl KeyboardFallback {
    /// Creates a fallback feeding the given dispatcher.
    pub fn new(dispatcher: Arc<MidiDispatcher>) -> Self {
        Self {
            dispatcher,
            held: DashMap::new(),
        }
    }

    /// Handles a key press. Returns true if the key produced a message.
    pub fn key_down(&self, key: &str) -> bool {
        let Some(c) = normalize_key(key) else {
            return false;
        };
        if self.held.insert(c, ()).is_some() {
            // Autorepeat while held
            return false;
        }

        let msg = match c {
            '0'..='9' => synthesize(ControlKind::ControlChange, digit_controller(c), 127),
            'a'..='z' => synthesize(ControlKind::NoteOn, letter_note(c), 127),
            _ => unreachable!("normalize_key only passes ascii alphanumerics"),
        };
        log::debug!("[Keyboard] {} -> {:?} {}", c, msg.kind, msg.control_number);
        self.dispatcher.handle_message(msg);
        true
    }

    /// Handles a key release. Only letter keys produce a message.
    pub fn key_up(&self, key: &str) -> bool {
        let Some(c) = normalize_key(key) else {
            return false;
        };
        if self.held.remove(&c).is_none() {
            return false;
        }

        match c {
            'a'..='z' => {
                self.dispatcher
                    .handle_message(synthesize(ControlKind::NoteOff, letter_note(c), 0));
                true
            }
            _ => false,
        }
    }

    /// Clears held-key state, e.g. when the window loses focus.
    pub fn release_all(&self) {
        self.held.clear();
    }
}

fn normalize_key(key: &str) -> Option<char> {
    let mut chars = key.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let c = c.to_ascii_lowercase();
    c.is_ascii_alphanumeric().then_some(c)
}

fn digit_controller(c: char) -> u8 {
    c as u8 - b'0'
}

fn letter_note(c: char) -> u8 {
    LETTER_NOTE_BASE + (c as u8 - b'a')
}

fn synthesize(kind: ControlKind, control_number: u8, value: u8) -> ControlMessage {
    ControlMessage {
        kind,
        channel: 0,
        control_number,
        value,
        timestamp_ms: now_millis(),
    }
}
