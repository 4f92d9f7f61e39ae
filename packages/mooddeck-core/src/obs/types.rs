//! Typed payloads for the OBS requests and events the bridge consumes.
//!
//! Requests serialize into `requestData`; responses deserialize out of
//! `responseData`. Events arrive as raw payloads and are narrowed by
//! [`parse_event`] into the [`ObsEvent`] variants the audio bridge handles.

use serde::{Deserialize, Serialize};

use crate::obs::protocol::EventPayload;

// ─────────────────────────────────────────────────────────────────────────────
// Request payloads
// ─────────────────────────────────────────────────────────────────────────────

/// GetInputList, optionally filtered to one input kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInputListRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_kind: Option<String>,
}

/// Requests addressing one input by name (GetInputVolume, GetInputMute).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputNameRequest {
    pub input_name: String,
}

/// SetInputVolume with an absolute dB level.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInputVolumeRequest {
    pub input_name: String,
    pub input_volume_db: f64,
}

/// SetInputMute.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInputMuteRequest {
    pub input_name: String,
    pub input_muted: bool,
}

/// PressInputPropertiesButton, e.g. the browser source refresh button.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PressInputPropertiesButtonRequest {
    pub input_name: String,
    pub property_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response payloads
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a GetInputList response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputInfo {
    pub input_name: String,
    #[serde(default)]
    pub input_kind: String,
}

/// GetInputList response.
#[derive(Debug, Clone, Deserialize)]
pub struct InputListResponse {
    pub inputs: Vec<InputInfo>,
}

/// GetInputVolume response.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputVolumeResponse {
    pub input_volume_mul: f64,
    pub input_volume_db: f64,
}

/// GetInputMute response.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMuteResponse {
    pub input_muted: bool,
}

/// GetInputKindList response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputKindListResponse {
    pub input_kinds: Vec<String>,
}

/// GetInputSettings response. `input_settings` stays untyped; the bridge
/// only picks out individual keys (e.g. a browser source's "url").
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSettingsResponse {
    #[serde(default)]
    pub input_settings: serde_json::Value,
    #[serde(default)]
    pub input_kind: String,
}

/// One entry of a GetSceneList response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneInfo {
    pub scene_name: String,
}

/// GetSceneList response.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneListResponse {
    pub scenes: Vec<SceneInfo>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Per-source entry of an InputVolumeMeters event.
///
/// `input_levels_mul` holds one `[magnitude, peak, input_peak]` triple per
/// channel, as linear multipliers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    pub input_name: String,
    #[serde(default)]
    pub input_levels_mul: Vec<Vec<f64>>,
}

impl MeterReading {
    /// Magnitude multiplier of one channel, if reported.
    #[must_use]
    pub fn channel_magnitude(&self, channel: usize) -> Option<f64> {
        self.input_levels_mul.get(channel)?.first().copied()
    }

    /// Peak multiplier of one channel, if reported.
    #[must_use]
    pub fn channel_peak(&self, channel: usize) -> Option<f64> {
        self.input_levels_mul.get(channel)?.get(1).copied()
    }
}

/// The OBS events the bridge reacts to.
#[derive(Debug, Clone)]
pub enum ObsEvent {
    /// Meter batch for all audio sources (~20 Hz).
    VolumeMeters { inputs: Vec<MeterReading> },
    /// A source's volume changed (from any client, including us).
    VolumeChanged { input_name: String, volume_db: f64 },
    /// A source's mute state changed.
    MuteChanged { input_name: String, muted: bool },
    /// A source was created.
    InputCreated {
        input_name: String,
        input_kind: String,
    },
    /// A source was removed.
    InputRemoved { input_name: String },
    /// A source's video became active or hidden.
    ActiveStateChanged { input_name: String, active: bool },
    /// A subscribed event the bridge doesn't consume.
    Unhandled { event_type: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeMetersData {
    inputs: Vec<MeterReading>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeChangedData {
    input_name: String,
    input_volume_db: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MuteChangedData {
    input_name: String,
    input_muted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputCreatedData {
    input_name: String,
    #[serde(default)]
    input_kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputRemovedData {
    input_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveStateChangedData {
    input_name: String,
    video_active: bool,
}

/// Narrows an event payload to the variants the bridge handles.
///
/// Payloads that fail to parse are downgraded to `Unhandled` with a
/// warning instead of tearing down the session.
#[must_use]
pub fn parse_event(payload: EventPayload) -> ObsEvent {
    let event_type = payload.event_type;
    let data = payload.event_data;

    macro_rules! parse_or_unhandled {
        ($ty:ty, $build:expr) => {
            match serde_json::from_value::<$ty>(data) {
                Ok(parsed) => $build(parsed),
                Err(e) => {
                    log::warn!("[ObsEvent] Malformed {} payload: {}", event_type, e);
                    ObsEvent::Unhandled { event_type }
                }
            }
        };
    }

    match event_type.as_str() {
        "InputVolumeMeters" => parse_or_unhandled!(VolumeMetersData, |d: VolumeMetersData| {
            ObsEvent::VolumeMeters { inputs: d.inputs }
        }),
        "InputVolumeChanged" => parse_or_unhandled!(VolumeChangedData, |d: VolumeChangedData| {
            ObsEvent::VolumeChanged {
                input_name: d.input_name,
                volume_db: d.input_volume_db,
            }
        }),
        "InputMuteStateChanged" => parse_or_unhandled!(MuteChangedData, |d: MuteChangedData| {
            ObsEvent::MuteChanged {
                input_name: d.input_name,
                muted: d.input_muted,
            }
        }),
        "InputCreated" => parse_or_unhandled!(InputCreatedData, |d: InputCreatedData| {
            ObsEvent::InputCreated {
                input_name: d.input_name,
                input_kind: d.input_kind,
            }
        }),
        "InputRemoved" => parse_or_unhandled!(InputRemovedData, |d: InputRemovedData| {
            ObsEvent::InputRemoved {
                input_name: d.input_name,
            }
        }),
        "InputActiveStateChanged" => {
            parse_or_unhandled!(ActiveStateChangedData, |d: ActiveStateChangedData| {
                ObsEvent::ActiveStateChanged {
                    input_name: d.input_name,
                    active: d.video_active,
                }
            })
        }
        _ => ObsEvent::Unhandled { event_type },
    }
}
