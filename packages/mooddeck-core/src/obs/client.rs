//! Typed OBS client over the current socket session.
//!
//! The client holds a [`SocketHandle`] rather than a socket: the
//! connection manager swaps the inner session on reconnect, and requests
//! made while no session exists fail fast with `NotConnected`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ObsError, ObsResult};
use crate::obs::socket::ObsSocket;
use crate::obs::traits::{ObsAudioControl, ObsSourceControl};
use crate::obs::types::{
    GetInputListRequest, InputInfo, InputKindListResponse, InputListResponse, InputMuteResponse,
    InputNameRequest, InputSettingsResponse, InputVolumeResponse,
    PressInputPropertiesButtonRequest, SceneListResponse, SetInputMuteRequest,
    SetInputVolumeRequest,
};

/// Shared slot for the live session; empty while disconnected.
pub type SocketHandle = Arc<RwLock<Option<Arc<ObsSocket>>>>;

/// [`ObsClient`](crate::obs::traits::ObsClient) implementation over the
/// session slot.
pub struct ObsClientImpl {
    socket: SocketHandle,
}

impl ObsClientImpl {
    /// Creates a client reading sessions from `socket`.
    pub fn new(socket: SocketHandle) -> Self {
        Self { socket }
    }

    fn session(&self) -> ObsResult<Arc<ObsSocket>> {
        self.socket.read().clone().ok_or(ObsError::NotConnected)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        request_type: &str,
        data: Option<Value>,
    ) -> ObsResult<T> {
        let value = self.session()?.request(request_type, data).await?;
        serde_json::from_value(value).map_err(|e| ObsError::Protocol(e.to_string()))
    }

    /// Issues a request whose response carries no data the bridge needs.
    async fn request_ack(&self, request_type: &str, data: Option<Value>) -> ObsResult<()> {
        self.session()?.request(request_type, data).await?;
        Ok(())
    }
}

fn encode<T: serde::Serialize>(payload: &T) -> ObsResult<Value> {
    serde_json::to_value(payload).map_err(|e| ObsError::Protocol(e.to_string()))
}

#[async_trait]
impl ObsAudioControl for ObsClientImpl {
    async fn input_volume(&self, input_name: &str) -> ObsResult<InputVolumeResponse> {
        let data = encode(&InputNameRequest {
            input_name: input_name.to_string(),
        })?;
        self.request("GetInputVolume", Some(data)).await
    }

    async fn set_input_volume_db(&self, input_name: &str, volume_db: f64) -> ObsResult<()> {
        let data = encode(&SetInputVolumeRequest {
            input_name: input_name.to_string(),
            input_volume_db: volume_db,
        })?;
        self.request_ack("SetInputVolume", Some(data)).await
    }

    async fn input_muted(&self, input_name: &str) -> ObsResult<bool> {
        let data = encode(&InputNameRequest {
            input_name: input_name.to_string(),
        })?;
        let response: InputMuteResponse = self.request("GetInputMute", Some(data)).await?;
        Ok(response.input_muted)
    }

    async fn set_input_muted(&self, input_name: &str, muted: bool) -> ObsResult<()> {
        let data = encode(&SetInputMuteRequest {
            input_name: input_name.to_string(),
            input_muted: muted,
        })?;
        self.request_ack("SetInputMute", Some(data)).await
    }
}

#[async_trait]
impl ObsSourceControl for ObsClientImpl {
    async fn list_inputs(&self, input_kind: Option<&str>) -> ObsResult<Vec<InputInfo>> {
        let data = encode(&GetInputListRequest {
            input_kind: input_kind.map(str::to_string),
        })?;
        let response: InputListResponse = self.request("GetInputList", Some(data)).await?;
        Ok(response.inputs)
    }

    async fn input_kinds(&self) -> ObsResult<Vec<String>> {
        let response: InputKindListResponse = self.request("GetInputKindList", None).await?;
        Ok(response.input_kinds)
    }

    async fn list_scenes(&self) -> ObsResult<Vec<String>> {
        let response: SceneListResponse = self.request("GetSceneList", None).await?;
        Ok(response.scenes.into_iter().map(|s| s.scene_name).collect())
    }

    async fn input_settings(&self, input_name: &str) -> ObsResult<InputSettingsResponse> {
        let data = encode(&InputNameRequest {
            input_name: input_name.to_string(),
        })?;
        self.request("GetInputSettings", Some(data)).await
    }

    async fn press_properties_button(
        &self,
        input_name: &str,
        property_name: &str,
    ) -> ObsResult<()> {
        let data = encode(&PressInputPropertiesButtonRequest {
            input_name: input_name.to_string(),
            property_name: property_name.to_string(),
        })?;
        self.request_ack("PressInputPropertiesButton", Some(data))
            .await
    }
}
