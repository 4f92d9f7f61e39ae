//! obs-websocket v5 wire protocol.
//!
//! Every frame is a JSON envelope `{"op": <code>, "d": <payload>}`. This
//! module covers the opcodes the bridge uses, the Identify handshake
//! payloads (including challenge/response authentication), and the event
//! subscription bitmask.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ObsError, ObsResult};

/// Protocol version negotiated during Identify.
pub const RPC_VERSION: u32 = 1;

/// Close code sent by the server when authentication fails.
pub const CLOSE_AUTH_FAILED: u16 = 4009;

/// Envelope opcodes.
pub mod opcode {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// EventSubscription bits for the Identify payload.
///
/// High-volume intents (bit 16 and up) are opt-in; everything else the
/// bridge needs sits in the low bits.
pub mod subscription {
    pub const GENERAL: u32 = 1 << 0;
    pub const CONFIG: u32 = 1 << 1;
    pub const SCENES: u32 = 1 << 2;
    pub const INPUTS: u32 = 1 << 3;
    /// ~20 Hz meter updates for every audio source.
    pub const INPUT_VOLUME_METERS: u32 = 1 << 16;
    pub const INPUT_ACTIVE_STATE_CHANGED: u32 = 1 << 17;

    /// The intents the bridge identifies with: source lifecycle, volume
    /// and mute changes, scene switches, and live meters.
    #[must_use]
    pub fn bridge_default() -> u32 {
        GENERAL | SCENES | INPUTS | INPUT_VOLUME_METERS | INPUT_ACTIVE_STATE_CHANGED
    }
}

/// Raw envelope as read off the wire.
#[derive(Debug, Deserialize)]
struct Envelope {
    op: u8,
    #[serde(default)]
    d: Value,
}

/// Hello payload (op 0), sent by the server on connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub rpc_version: u32,
    /// Present only when the server requires authentication.
    pub authentication: Option<AuthChallenge>,
}

/// Challenge/salt pair from the Hello payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Identify payload (op 1), sent by the client after Hello.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

/// Identified payload (op 2), confirming the handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Event payload (op 5).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
}

/// RequestStatus of a response (op 7).
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: String,
}

/// RequestResponse payload (op 7).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Value,
}

/// A decoded server-to-client message.
#[derive(Debug)]
pub enum ServerMessage {
    Hello(Hello),
    Identified(Identified),
    Event(EventPayload),
    RequestResponse(RequestResponse),
    /// An opcode the bridge doesn't consume.
    Unsupported(u8),
}

/// Decodes one text frame into a [`ServerMessage`].
pub fn decode_server_message(text: &str) -> ObsResult<ServerMessage> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ObsError::Protocol(e.to_string()))?;

    let message = match envelope.op {
        opcode::HELLO => ServerMessage::Hello(decode_payload(envelope.d)?),
        opcode::IDENTIFIED => ServerMessage::Identified(decode_payload(envelope.d)?),
        opcode::EVENT => ServerMessage::Event(decode_payload(envelope.d)?),
        opcode::REQUEST_RESPONSE => ServerMessage::RequestResponse(decode_payload(envelope.d)?),
        other => ServerMessage::Unsupported(other),
    };
    Ok(message)
}

fn decode_payload<T: serde::de::DeserializeOwned>(d: Value) -> ObsResult<T> {
    serde_json::from_value(d).map_err(|e| ObsError::Protocol(e.to_string()))
}

/// Encodes an Identify frame.
#[must_use]
pub fn encode_identify(identify: &Identify) -> String {
    json!({ "op": opcode::IDENTIFY, "d": identify }).to_string()
}

/// Encodes a Request frame. `request_data` is omitted when `None`.
#[must_use]
pub fn encode_request(request_type: &str, request_id: &str, request_data: Option<Value>) -> String {
    let mut d = serde_json::Map::new();
    d.insert("requestType".to_string(), json!(request_type));
    d.insert("requestId".to_string(), json!(request_id));
    if let Some(data) = request_data {
        d.insert("requestData".to_string(), data);
    }
    json!({ "op": opcode::REQUEST, "d": d }).to_string()
}

/// Computes the Identify authentication string.
///
/// Per protocol: `base64(sha256(base64(sha256(password + salt)) + challenge))`.
#[must_use]
pub fn build_auth_response(password: &str, salt: &str, challenge: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    let secret = STANDARD.encode(hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(challenge.as_bytes());
    STANDARD.encode(hasher.finalize())
}
