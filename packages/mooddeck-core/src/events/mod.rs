//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for fan-out to subscribed transports
//! - Event types for the bridge domains (MIDI, connection, audio, display)

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::midi::learn::LearnPhase;
use crate::state::ConnectionStatus;

/// Events broadcast to clients.
///
/// This enum categorizes all real-time events the bridge can emit. Each
/// category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// Events from the MIDI pipeline (dispatch, learning, mappings, devices).
    Midi(MidiEvent),

    /// OBS connection lifecycle events.
    Connection(ConnectionEvent),

    /// Audio source events mirrored from OBS (levels, volume, mute).
    Audio(AudioEvent),

    /// Now-playing display and overlay refresh events.
    Display(DisplayEvent),
}

/// Left/right channel pair in dB, used for levels and peaks.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelLevels {
    /// Left channel value in dB.
    pub left: f64,
    /// Right channel value in dB (mirrors left for mono sources).
    pub right: f64,
}

/// Events produced by the MIDI decode/dispatch pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MidiEvent {
    /// A volume binding fired.
    VolumeChange {
        /// The bound mixer target (e.g. "music").
        target: String,
        /// Smoothed volume in dB, rounded to 2 decimals for display.
        value: f64,
        /// The raw controller value that triggered the change.
        #[serde(rename = "midiValue")]
        midi_value: u8,
        /// The mapping key that resolved the binding.
        key: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A hotkey binding fired.
    HotkeyAction {
        /// The action verb (e.g. "next_mood").
        action: String,
        /// The receiving subsystem (e.g. "player").
        target: String,
        /// The controller value / note velocity (always > 0).
        velocity: u8,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The learning state machine transitioned.
    LearnState {
        /// The new phase.
        phase: LearnPhase,
        /// Human-readable status for UI surfaces.
        status: String,
        /// The captured mapping key, present on completion.
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A mapping was added, replaced, or removed.
    MappingChanged {
        /// The affected mapping key.
        key: String,
        /// True when the binding was removed rather than set.
        removed: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The set of known control-surface devices changed.
    DevicesChanged {
        /// Number of known input ports.
        inputs: usize,
        /// Number of known output ports.
        outputs: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// OBS connection lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// The connection status changed.
    StateChanged {
        /// The new status.
        status: ConnectionStatus,
        /// Host of the current/last session.
        host: String,
        /// Port of the current/last session.
        port: u16,
        /// Human-readable detail (close reason, error), if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Audio source events mirrored from the OBS side.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AudioEvent {
    /// Instantaneous meter levels for one source.
    Levels {
        /// The OBS input name.
        #[serde(rename = "sourceName")]
        source_name: String,
        /// Current levels in dB.
        levels: ChannelLevels,
        /// Peak levels in dB.
        peak: ChannelLevels,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A source's volume changed (from either direction).
    VolumeChanged {
        /// The OBS input name.
        #[serde(rename = "sourceName")]
        source_name: String,
        /// New volume in dB, clamped to [-60, 0].
        #[serde(rename = "volumeDb")]
        volume_db: f64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A source's mute state changed.
    MuteChanged {
        /// The OBS input name.
        #[serde(rename = "sourceName")]
        source_name: String,
        /// New mute state.
        muted: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A new source appeared remotely.
    SourceAdded {
        /// The OBS input name.
        #[serde(rename = "sourceName")]
        source_name: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A source was removed remotely.
    SourceRemoved {
        /// The OBS input name.
        #[serde(rename = "sourceName")]
        source_name: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A discovery pass rebuilt the audio source set.
    SourcesSynced {
        /// Number of audio sources now tracked.
        count: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Now-playing display and overlay refresh events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DisplayEvent {
    /// A display payload was written with showDisplay = true.
    Published {
        /// The song identifier of the payload.
        #[serde(rename = "songId")]
        song_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The auto-hide timer rewrote the payload with showDisplay = false.
    Hidden {
        /// The song identifier of the payload.
        #[serde(rename = "songId")]
        song_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A cache-busting refresh sweep ran against browser sources.
    OverlayRefreshed {
        /// The song identifier that triggered the sweep.
        #[serde(rename = "songId")]
        song_id: String,
        /// Number of sources successfully refreshed.
        refreshed: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// From implementations for converting inner events to BridgeEvent
impl From<MidiEvent> for BridgeEvent {
    fn from(event: MidiEvent) -> Self {
        BridgeEvent::Midi(event)
    }
}

impl From<ConnectionEvent> for BridgeEvent {
    fn from(event: ConnectionEvent) -> Self {
        BridgeEvent::Connection(event)
    }
}

impl From<AudioEvent> for BridgeEvent {
    fn from(event: AudioEvent) -> Self {
        BridgeEvent::Audio(event)
    }
}

impl From<DisplayEvent> for BridgeEvent {
    fn from(event: DisplayEvent) -> Self {
        BridgeEvent::Display(event)
    }
}
