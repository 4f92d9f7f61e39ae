//! MIDI control-surface pipeline.
//!
//! Raw protocol frames enter through [`message::decode_frame`], become
//! canonical [`ControlMessage`]s, and flow through the [`MidiDispatcher`]:
//! an active learning session captures the message, otherwise the mapping
//! store resolves a binding and the dispatcher emits the corresponding
//! domain action. The keyboard adapter feeds the same pipeline when no
//! physical control surface is present.

pub mod device;
pub mod dispatcher;
pub mod keyboard;
pub mod learn;
pub mod mapping;
pub mod message;

pub use device::{DeviceRegistry, MidiDeviceInfo, MidiPortDirection, MidiPortState};
pub use dispatcher::{MidiDispatcher, VolumeCommand};
pub use keyboard::KeyboardFallback;
pub use learn::{LearnPhase, LearningCoordinator};
pub use mapping::{derive_mapping_key, Binding, BindingKind, BindingSource, MappingStore};
pub use message::{decode_frame, ControlKind, ControlMessage};
