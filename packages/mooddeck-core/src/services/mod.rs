//! Domain services on top of the OBS client traits.
//!
//! - [`AudioMixerBridge`]: mirrors audio sources and meters, applies
//!   volume commands from the MIDI dispatcher
//! - [`OverlayRefreshCoordinator`]: finds overlay browser sources and
//!   cache-busts them once per song change
//! - [`DisplayPublisher`]: writes the now-playing payload the overlay
//!   renderer consumes, with timed auto-hide

pub mod audio_bridge;
pub mod display_publisher;
pub mod overlay_refresh;

pub use audio_bridge::{AudioBridgeDeps, AudioMixerBridge};
pub use display_publisher::{
    DisplayPayload, DisplayPublisher, DisplaySettings, JsonFilePayloadWriter, MoodDescriptor,
    PayloadWriter, SongDescriptor,
};
pub use overlay_refresh::OverlayRefreshCoordinator;
