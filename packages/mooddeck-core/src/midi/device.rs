//! Control-surface device registry.
//!
//! The host layer owns the OS MIDI handles and pushes enumeration results
//! here; the registry tracks the known ports, their open state, and
//! announces set changes so UI surfaces can re-render device pickers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::events::{EventEmitter, MidiEvent};
use crate::utils::now_millis;

/// Direction of a MIDI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MidiPortDirection {
    Input,
    Output,
}

/// Whether the host currently holds the port open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MidiPortState {
    Available,
    Open,
}

/// One enumerated MIDI port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiDeviceInfo {
    /// Host-assigned stable port identifier.
    pub id: String,
    /// Human-readable port name.
    pub name: String,
    /// Manufacturer string as reported by the OS, often empty.
    pub manufacturer: String,
    pub direction: MidiPortDirection,
    pub state: MidiPortState,
}

/// Tracks the known MIDI ports and their open state.
pub struct DeviceRegistry {
    ports: DashMap<String, MidiDeviceInfo>,
    emitter: Arc<dyn EventEmitter>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            ports: DashMap::new(),
            emitter,
        }
    }

    /// Replaces the known port set with a fresh enumeration.
    ///
    /// Emits a DevicesChanged event only when the set actually differs, so
    /// periodic re-enumeration stays quiet. Returns true on change.
    pub fn sync(&self, ports: Vec<MidiDeviceInfo>) -> bool {
        let mut incoming = ports;
        incoming.sort_by(|a, b| a.id.cmp(&b.id));

        let current = self.list_by_id();
        if current == incoming {
            return false;
        }

        self.ports.clear();
        let mut inputs = 0;
        let mut outputs = 0;
        for port in incoming {
            match port.direction {
                MidiPortDirection::Input => inputs += 1,
                MidiPortDirection::Output => outputs += 1,
            }
            self.ports.insert(port.id.clone(), port);
        }

        log::info!(
            "[DeviceRegistry] Ports changed: {} input(s), {} output(s)",
            inputs,
            outputs
        );
        self.emitter.emit_midi(MidiEvent::DevicesChanged {
            inputs,
            outputs,
            timestamp: now_millis(),
        });
        true
    }

    /// Marks a port as held open by the host. Returns false if unknown.
    pub fn mark_open(&self, id: &str) -> bool {
        self.set_state(id, MidiPortState::Open)
    }

    /// Marks a port as released. Returns false if unknown.
    pub fn mark_closed(&self, id: &str) -> bool {
        self.set_state(id, MidiPortState::Available)
    }

    fn set_state(&self, id: &str, state: MidiPortState) -> bool {
        match self.ports.get_mut(id) {
            Some(mut port) => {
                port.state = state;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the known ports, sorted by name for display.
    #[must_use]
    pub fn list(&self) -> Vec<MidiDeviceInfo> {
        let mut ports: Vec<_> = self.ports.iter().map(|p| p.value().clone()).collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        ports
    }

    /// True when at least one input port is known.
    ///
    /// Hosts use this to decide whether the keyboard fallback is needed.
    #[must_use]
    pub fn has_inputs(&self) -> bool {
        self.ports
            .iter()
            .any(|p| p.direction == MidiPortDirection::Input)
    }

    fn list_by_id(&self) -> Vec<MidiDeviceInfo> {
        let mut ports: Vec<_> = self.ports.iter().map(|p| p.value().clone()).collect();
        ports.sort_by(|a, b| a.id.cmp(&b.id));
        ports
    }
}
