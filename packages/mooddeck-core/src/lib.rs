//! MoodDeck Core - device and broadcast bridge for MoodDeck.
//!
//! This crate provides the core functionality of the MoodDeck bridge: it
//! connects a MIDI control surface and a keyboard fallback to OBS audio
//! sources and the now-playing overlay of a mood-based music player. It is
//! designed to be used by both the desktop app and a standalone headless
//! bridge.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for real-time client communication
//! - [`state`]: Bridge configuration and the mirrored OBS runtime state
//! - [`midi`]: Frame decoding, mapping, learning, and dispatch
//! - [`volume`]: Controller-to-decibel translation and smoothing
//! - [`obs`]: obs-websocket v5 session, typed client, and reconnect policy
//! - [`services`]: Audio mirroring, overlay refresh, display publishing
//! - [`store`]: Persistence for user MIDI bindings
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from
//! platform-specific implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`PayloadWriter`](services::PayloadWriter): Writing display payloads
//! - [`MappingRepository`](store::MappingRepository): Binding persistence
//!
//! Each trait has a default implementation suitable for the standalone
//! bridge. The desktop app provides its own implementations where needed.

#![warn(clippy::all)]

pub mod bootstrap;
pub mod error;
pub mod events;
pub mod midi;
pub mod obs;
pub mod runtime;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod volume;

// Re-export commonly used types at the crate root
pub use error::{BridgeError, BridgeResult, ErrorCode, ObsError, ObsResult};
pub use events::{
    AudioEvent, BridgeEvent, BroadcastEventBridge, ChannelLevels, ConnectionEvent, DisplayEvent,
    EventEmitter, MidiEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{
    AudioSourceRecord, BridgeConfig, BrowserSourceRecord, ChannelConfig, ConnectParams,
    ConnectionStatus, ObsState,
};
pub use utils::now_millis;

// Re-export MIDI types
pub use midi::{
    decode_frame, derive_mapping_key, Binding, BindingKind, BindingSource, ControlKind,
    ControlMessage, DeviceRegistry, KeyboardFallback, LearnPhase, LearningCoordinator,
    MappingStore, MidiDeviceInfo, MidiDispatcher, VolumeCommand,
};

// Re-export OBS types
pub use obs::{ObsClient, ObsClientImpl, ObsConnectionManager, ObsSocket};

// Re-export service types
pub use services::{
    AudioMixerBridge, DisplayPayload, DisplayPublisher, DisplaySettings, JsonFilePayloadWriter,
    MoodDescriptor, OverlayRefreshCoordinator, PayloadWriter, SongDescriptor,
};

// Re-export store types
pub use store::{JsonFileMappingRepository, MappingRepository, MemoryMappingRepository};

// Re-export volume translation helpers
pub use volume::{from_multiplier, to_decibel, to_multiplier, VolumeSmoother};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_bridge, BootstrappedBridge};
