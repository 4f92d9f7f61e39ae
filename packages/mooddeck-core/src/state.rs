//! Core application state types.
//!
//! This module provides the bridge configuration and [`ObsState`], the
//! shared runtime mirror of the OBS side (connection status, audio
//! sources, overlay browser sources). Host layers wrap these in their own
//! state types.

use std::hash::Hash;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Queue capacities for the bridge's internal channels.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// Capacity of the OBS event queue feeding the audio bridge.
    pub obs_event_capacity: usize,

    /// Capacity of the volume command queue from the dispatcher.
    pub volume_command_capacity: usize,
}

impl ChannelConfig {
    /// Validates the capacity values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_capacity == 0 {
            return Err("event_capacity must be >= 1 (broadcast::channel panics on 0)".to_string());
        }
        if self.obs_event_capacity == 0 {
            return Err("obs_event_capacity must be >= 1".to_string());
        }
        if self.volume_command_capacity == 0 {
            return Err("volume_command_capacity must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            obs_event_capacity: 256,
            volume_command_capacity: 64,
        }
    }
}

/// Configuration for the MoodDeck bridge.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    // OBS connection
    /// Host of the obs-websocket server.
    pub obs_host: String,

    /// Port of the obs-websocket server.
    pub obs_port: u16,

    /// Password for the Identify handshake. Empty means "try without auth".
    pub obs_password: String,

    /// Delay before a reconnect attempt (milliseconds).
    pub reconnect_delay_ms: u64,

    /// Settle time between Identified and source discovery (milliseconds).
    pub connect_settle_ms: u64,

    /// Timeout for a single OBS request/response round trip (milliseconds).
    pub request_timeout_ms: u64,

    // Volume
    /// Smoothing factor for volume changes; lower responds faster.
    pub volume_smoothing: f64,

    // Channels
    /// Queue capacities.
    #[serde(default)]
    pub channels: ChannelConfig,
}

impl BridgeConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.obs_host.is_empty() {
            return Err("obs_host must not be empty".to_string());
        }
        if self.obs_port == 0 {
            return Err("obs_port must be >= 1".to_string());
        }
        if self.reconnect_delay_ms == 0 {
            return Err("reconnect_delay_ms must be >= 1".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be >= 1".to_string());
        }
        if !(self.volume_smoothing > 0.0 && self.volume_smoothing <= 1.0) {
            return Err("volume_smoothing must be in (0, 1]".to_string());
        }
        self.channels.validate()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            obs_host: "127.0.0.1".to_string(),
            obs_port: 4455,
            obs_password: String::new(),
            reconnect_delay_ms: 5000,
            connect_settle_ms: 1000,
            request_timeout_ms: 10_000,
            volume_smoothing: 0.1,
            channels: ChannelConfig::default(),
        }
    }
}

/// Explicit connection parameters, e.g. from a settings dialog.
///
/// Absent fields fall back to the configured values.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

impl ConnectParams {
    /// Resolves the effective host/port/password against a config.
    #[must_use]
    pub fn resolve(&self, config: &BridgeConfig) -> (String, u16, String) {
        (
            self.host.clone().unwrap_or_else(|| config.obs_host.clone()),
            self.port.unwrap_or(config.obs_port),
            self.password
                .clone()
                .unwrap_or_else(|| config.obs_password.clone()),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OBS Runtime State
// ─────────────────────────────────────────────────────────────────────────────

/// Connection status of the OBS session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No session and none pending.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Identified and serving requests.
    Connected,
    /// Session lost; a reconnect attempt is scheduled.
    Reconnecting,
    /// Authentication rejected; reconnects stop until new credentials.
    AuthFailed,
}

/// One audio source mirrored from OBS.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSourceRecord {
    /// OBS input name (unique within a collection).
    pub name: String,
    /// OBS input kind (e.g. "wasapi_output_capture").
    pub kind: String,
    /// Last known volume in dB, floored at -60.
    pub volume_db: f64,
    /// Last known mute state.
    pub muted: bool,
    /// Most recent meter magnitudes in dB as (left, right), if any
    /// arrived yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_levels_db: Option<(f64, f64)>,
    /// Most recent meter peaks in dB as (left, right).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_peak_db: Option<(f64, f64)>,
    /// When the record last changed (milliseconds since the epoch).
    pub last_update: u64,
}

impl AudioSourceRecord {
    /// Creates a record as discovery sees it, before any meters arrive.
    #[must_use]
    pub fn new(name: String, kind: String, volume_db: f64, muted: bool) -> Self {
        Self {
            name,
            kind,
            volume_db,
            muted,
            last_levels_db: None,
            last_peak_db: None,
            last_update: now_millis(),
        }
    }
}

/// One browser source found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSourceRecord {
    /// OBS input name.
    pub name: String,
    /// Configured page URL, empty when the settings fetch failed.
    pub url: String,
    /// The token that classified this source as an overlay candidate,
    /// `None` for unrelated browser sources.
    pub keyword: Option<String>,
}

impl BrowserSourceRecord {
    /// Whether this source belongs to the overlay.
    #[must_use]
    pub fn is_overlay_candidate(&self) -> bool {
        self.keyword.is_some()
    }
}

/// Runtime state mirrored from the OBS side.
///
/// # Concurrency design
///
/// - `audio_sources` uses `DashMap` for fine-grained concurrent access by
///   source name, supporting frequent per-source event updates without
///   blocking readers.
/// - `browser_sources` uses `RwLock<Vec<_>>` because it's replaced
///   atomically during discovery and always read as a whole collection.
#[derive(Debug, Default)]
pub struct ObsState {
    /// Current connection status.
    pub status: RwLock<ConnectionStatus>,
    /// Map of source name to its mirrored audio state.
    pub audio_sources: DashMap<String, AudioSourceRecord>,
    /// Overlay browser sources from the last discovery pass.
    pub browser_sources: RwLock<Vec<BrowserSourceRecord>>,
}

impl ObsState {
    /// Updates the connection status, returning the previous one.
    pub fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        std::mem::replace(&mut *self.status.write(), status)
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Replaces the mirrored audio sources with a fresh discovery result.
    pub fn sync_audio_sources(&self, sources: Vec<AudioSourceRecord>) {
        self.audio_sources.clear();
        for source in sources {
            self.audio_sources.insert(source.name.clone(), source);
        }
    }

    /// Drops all mirrored source state, e.g. when the session ends.
    pub fn clear_sources(&self) {
        self.audio_sources.clear();
        self.browser_sources.write().clear();
    }

    /// Serializes the current state to JSON.
    ///
    /// Returns a JSON object containing status, audio sources, and overlay
    /// browser sources.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "status": self.status(),
            "audioSources": dashmap_to_json(&self.audio_sources),
            "browserSources": *self.browser_sources.read(),
        })
    }
}

/// Converts a DashMap to a JSON object map.
fn dashmap_to_json<K, V>(map: &DashMap<K, V>) -> serde_json::Map<String, serde_json::Value>
where
    K: Eq + Hash + Clone + ToString,
    V: Clone + Serialize,
{
    map.iter()
        .map(|r| (r.key().to_string(), json!(r.value().clone())))
        .collect()
}
