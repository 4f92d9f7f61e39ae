//! Client traits for OBS operations.
//!
//! Split by concern so services depend only on the operations they use:
//!
//! - [`ObsAudioControl`]: volume and mute of audio inputs
//! - [`ObsSourceControl`]: input enumeration and property actions
//!
//! [`ObsClient`] combines them for wiring; a blanket impl covers any type
//! implementing both, including test mocks.

use async_trait::async_trait;

use crate::error::ObsResult;
use crate::obs::types::{InputInfo, InputSettingsResponse, InputVolumeResponse};

/// Volume and mute operations on audio inputs.
#[async_trait]
pub trait ObsAudioControl: Send + Sync {
    /// Reads the current volume of an input.
    async fn input_volume(&self, input_name: &str) -> ObsResult<InputVolumeResponse>;

    /// Sets an input's volume to an absolute dB level.
    async fn set_input_volume_db(&self, input_name: &str, volume_db: f64) -> ObsResult<()>;

    /// Reads the current mute state of an input.
    async fn input_muted(&self, input_name: &str) -> ObsResult<bool>;

    /// Sets an input's mute state.
    async fn set_input_muted(&self, input_name: &str, muted: bool) -> ObsResult<()>;
}

/// Input enumeration and property actions.
#[async_trait]
pub trait ObsSourceControl: Send + Sync {
    /// Lists inputs, optionally restricted to one input kind.
    async fn list_inputs(&self, input_kind: Option<&str>) -> ObsResult<Vec<InputInfo>>;

    /// Lists the input kinds available on this OBS install.
    async fn input_kinds(&self) -> ObsResult<Vec<String>>;

    /// Lists scene names. Scene switching itself is host territory; the
    /// bridge only surfaces the call.
    async fn list_scenes(&self) -> ObsResult<Vec<String>>;

    /// Reads an input's settings object.
    async fn input_settings(&self, input_name: &str) -> ObsResult<InputSettingsResponse>;

    /// Presses a button property of an input, e.g. `refreshnocache` on a
    /// browser source.
    async fn press_properties_button(
        &self,
        input_name: &str,
        property_name: &str,
    ) -> ObsResult<()>;
}

/// Combined client trait for bootstrap wiring.
pub trait ObsClient: ObsAudioControl + ObsSourceControl {}

impl<T> ObsClient for T where T: ObsAudioControl + ObsSourceControl {}
