//! OBS WebSocket integration (obs-websocket protocol v5).
//!
//! This module provides:
//! - Wire protocol encoding/decoding and the Identify handshake
//! - A request/response session over one WebSocket connection
//! - Typed client traits for the rest of the bridge
//! - Connection lifecycle management with fixed-delay reconnect

pub mod client;
pub mod connection;
pub mod protocol;
pub mod retry;
pub mod socket;
pub mod traits;
pub mod types;

pub use client::{ObsClientImpl, SocketHandle};
pub use connection::ObsConnectionManager;
pub use socket::{ConnectOptions, ObsSocket};
pub use traits::{ObsAudioControl, ObsClient, ObsSourceControl};
pub use types::{InputInfo, MeterReading, ObsEvent};
