//! Control-key to action bindings and the mapping store.
//!
//! A [`MappingKey`](derive_mapping_key) is a deterministic string derived
//! from a message's kind and control number: control changes use the plain
//! number ("7"), notes share a `note_` prefix (on/off intentionally land on
//! the same key), program changes use `prog_`. Different kind/number pairs
//! never collide; identical pairs always do, last write wins.
//!
//! The store layers user bindings over a built-in default table and
//! persists the user layer as a whole through a [`MappingRepository`]
//! on every mutation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::events::{EventEmitter, MidiEvent};
use crate::midi::message::{ControlKind, ControlMessage};
use crate::store::MappingRepository;
use crate::utils::now_millis;

/// What a binding does when its key fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    /// Translate the controller value to dB for a mixer target.
    Volume,
    /// Emit a hotkey action on press (value > 0).
    Hotkey,
}

/// Where a binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingSource {
    /// Built-in default table.
    Default,
    /// Captured through a learning session.
    Learned,
    /// Set explicitly by the user/UI.
    User,
}

fn default_range_max() -> u8 {
    127
}

/// One control-key → action binding.
///
/// Owned by the [`MappingStore`]; mutated only via explicit set/remove,
/// never by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// The action kind.
    pub kind: BindingKind,
    /// Volume: the mixer source name. Hotkey: the receiving subsystem.
    pub target: String,
    /// Hotkey action verb (e.g. "next_mood"). Unused for volume bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Lower bound of the controller range.
    #[serde(default)]
    pub min: u8,
    /// Upper bound of the controller range.
    #[serde(default = "default_range_max")]
    pub max: u8,
    /// Originating subsystem tag.
    pub source: BindingSource,
}

impl Binding {
    /// Creates a user volume binding for a mixer target with the full range.
    #[must_use]
    pub fn volume(target: &str) -> Self {
        Self {
            kind: BindingKind::Volume,
            target: target.to_string(),
            action: None,
            min: 0,
            max: 127,
            source: BindingSource::User,
        }
    }

    /// Creates a user hotkey binding for an action verb.
    #[must_use]
    pub fn hotkey(action: &str, target: &str) -> Self {
        Self {
            kind: BindingKind::Hotkey,
            target: target.to_string(),
            action: Some(action.to_string()),
            min: 0,
            max: 127,
            source: BindingSource::User,
        }
    }
}

/// Derives the mapping key for a message, or `None` for unmappable kinds.
///
/// Pitch bend and system/pressure messages never resolve to a binding.
#[must_use]
pub fn derive_mapping_key(msg: &ControlMessage) -> Option<String> {
    match msg.kind {
        ControlKind::ControlChange => Some(msg.control_number.to_string()),
        ControlKind::NoteOn | ControlKind::NoteOff => Some(format!("note_{}", msg.control_number)),
        ControlKind::ProgramChange => Some(format!("prog_{}", msg.control_number)),
        ControlKind::PitchBend | ControlKind::Other => None,
    }
}

/// The built-in default table.
///
/// Volume rows sit on the plain numeric keys of the first fader bank.
/// Hotkey rows also use plain numeric keys ("16"-"18"), which CC buttons
/// reach but note pads never do (notes derive `note_` keys); pads need a
/// learned binding. That asymmetry is shipped behavior.
fn default_bindings() -> HashMap<String, Binding> {
    let volume = |target: &str| Binding {
        kind: BindingKind::Volume,
        target: target.to_string(),
        action: None,
        min: 0,
        max: 127,
        source: BindingSource::Default,
    };
    let hotkey = |action: &str| Binding {
        kind: BindingKind::Hotkey,
        target: "player".to_string(),
        action: Some(action.to_string()),
        min: 0,
        max: 127,
        source: BindingSource::Default,
    };

    HashMap::from([
        ("1".to_string(), volume("master")),
        ("2".to_string(), volume("music")),
        ("3".to_string(), volume("mic")),
        ("4".to_string(), volume("desktop")),
        ("16".to_string(), hotkey("play_pause")),
        ("17".to_string(), hotkey("next_mood")),
        ("18".to_string(), hotkey("prev_mood")),
    ])
}

/// In-memory mapping table with a persistent user layer.
///
/// Lookups check user bindings first, then the default table, and return
/// exactly one binding or none. Every mutation of the user layer persists
/// the whole layer through the repository and emits a MappingChanged event.
pub struct MappingStore {
    custom: DashMap<String, Binding>,
    defaults: HashMap<String, Binding>,
    repository: Arc<dyn MappingRepository>,
    emitter: Arc<dyn EventEmitter>,
}

impl MappingStore {
    /// Creates a store over the given repository; user layer starts empty
    /// until [`load`](Self::load) is called.
    pub fn new(repository: Arc<dyn MappingRepository>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            custom: DashMap::new(),
            defaults: default_bindings(),
            repository,
            emitter,
        }
    }

    /// Replaces the user layer with the persisted one.
    ///
    /// Returns the number of user bindings loaded.
    pub fn load(&self) -> BridgeResult<usize> {
        let bindings = self.repository.load()?;
        self.custom.clear();
        let count = bindings.len();
        for (key, binding) in bindings {
            self.custom.insert(key, binding);
        }
        Ok(count)
    }

    /// Looks up the binding for a key: user bindings shadow defaults.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<Binding> {
        if let Some(binding) = self.custom.get(key) {
            return Some(binding.clone());
        }
        self.defaults.get(key).cloned()
    }

    /// Sets (or replaces) a user binding and persists the user layer.
    pub fn set_binding(&self, key: &str, binding: Binding) -> BridgeResult<()> {
        self.custom.insert(key.to_string(), binding);
        self.persist()?;
        log::info!("[MappingStore] Binding set for key {}", key);
        self.emitter.emit_midi(MidiEvent::MappingChanged {
            key: key.to_string(),
            removed: false,
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Removes a user binding if present and persists the user layer.
    ///
    /// Returns true if a binding was removed. Default-table rows cannot be
    /// removed; they are only shadowed.
    pub fn remove_binding(&self, key: &str) -> BridgeResult<bool> {
        if self.custom.remove(key).is_none() {
            return Ok(false);
        }
        self.persist()?;
        log::info!("[MappingStore] Binding removed for key {}", key);
        self.emitter.emit_midi(MidiEvent::MappingChanged {
            key: key.to_string(),
            removed: true,
            timestamp: now_millis(),
        });
        Ok(true)
    }

    /// Snapshot of the user layer for UI display.
    #[must_use]
    pub fn custom_bindings(&self) -> HashMap<String, Binding> {
        self.custom
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of user bindings.
    #[must_use]
    pub fn custom_len(&self) -> usize {
        self.custom.len()
    }

    fn persist(&self) -> BridgeResult<()> {
        let snapshot = self.custom_bindings();
        self.repository.save(&snapshot)
    }
}
