//! Bridge between OBS audio sources and the rest of the system.
//!
//! Inbound, two forwarder loops consume the queues feeding this service:
//! decoded OBS events (meters, volume/mute changes, input lifecycle) are
//! mirrored into [`ObsState`] and re-emitted as [`AudioEvent`]s; volume
//! commands from the MIDI dispatcher are applied to OBS.
//!
//! A volume command whose target isn't a known OBS source is dropped
//! here: such targets (e.g. the player's own master volume) are served by
//! the VolumeChange event stream and applied by the host, not by OBS.
//!
//! Volume sets are not echoed back optimistically; the mirror and the
//! AudioEvent both come from the InputVolumeChanged push, so every client
//! sees the same value OBS settled on.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeResult;
use crate::events::{AudioEvent, ChannelLevels, EventEmitter};
use crate::midi::dispatcher::VolumeCommand;
use crate::obs::connection::ConnectedHook;
use crate::obs::retry::with_retry;
use crate::obs::traits::ObsClient;
use crate::obs::types::{MeterReading, ObsEvent};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::{AudioSourceRecord, ObsState};
use crate::utils::now_millis;
use crate::volume::{from_multiplier, DB_CEILING, DB_FLOOR};

/// Shared dependencies of the audio bridge.
#[derive(Clone)]
pub struct AudioBridgeDeps {
    pub client: Arc<dyn ObsClient>,
    pub state: Arc<ObsState>,
    pub emitter: Arc<dyn EventEmitter>,
}

/// Mirrors OBS audio sources and applies mixer commands.
pub struct AudioMixerBridge {
    deps: AudioBridgeDeps,
    /// Taken by the event forwarder on start.
    obs_events: Mutex<Option<mpsc::Receiver<ObsEvent>>>,
    /// Taken by the volume forwarder on start.
    volume_commands: Mutex<Option<mpsc::Receiver<VolumeCommand>>>,
    /// Sources whose meters are currently skipped (hidden in OBS or
    /// flagged by a consumer).
    hidden: DashMap<String, ()>,
    shutdown: CancellationToken,
    spawner: TokioSpawner,
}

impl AudioMixerBridge {
    /// Creates the bridge over its two inbound queues.
    pub fn new(
        deps: AudioBridgeDeps,
        obs_events: mpsc::Receiver<ObsEvent>,
        volume_commands: mpsc::Receiver<VolumeCommand>,
        shutdown: CancellationToken,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            deps,
            obs_events: Mutex::new(Some(obs_events)),
            volume_commands: Mutex::new(Some(volume_commands)),
            hidden: DashMap::new(),
            shutdown,
            spawner,
        }
    }

    /// Starts both forwarder loops. Safe to call once; repeated calls
    /// warn and do nothing.
    pub fn start_forwarders(self: &Arc<Self>) {
        self.start_event_forwarder();
        self.start_volume_forwarder();
    }

    fn start_event_forwarder(self: &Arc<Self>) {
        let Some(mut rx) = self.obs_events.lock().take() else {
            log::warn!("[AudioBridge] Event forwarder already started");
            return;
        };

        let bridge = Arc::clone(self);
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    _ = bridge.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => bridge.handle_obs_event(event).await,
                        None => break,
                    },
                }
            }
            log::debug!("[AudioBridge] Event forwarder stopped");
        });
    }

    fn start_volume_forwarder(self: &Arc<Self>) {
        let Some(mut rx) = self.volume_commands.lock().take() else {
            log::warn!("[AudioBridge] Volume forwarder already started");
            return;
        };

        let bridge = Arc::clone(self);
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    _ = bridge.shutdown.cancelled() => break,
                    command = rx.recv() => match command {
                        Some(command) => bridge.apply_volume_command(command).await,
                        None => break,
                    },
                }
            }
            log::debug!("[AudioBridge] Volume forwarder stopped");
        });
    }

    /// Rebuilds the mirrored source set from a full input scan.
    ///
    /// Every input is probed for a volume endpoint; inputs without one
    /// (scenes' nested inputs, cameras) are skipped, and a per-input probe
    /// failure skips that input only. Records for inputs that no longer
    /// exist are pruned by the wholesale replacement.
    pub async fn sync_sources(&self) -> BridgeResult<usize> {
        let inputs = with_retry("GetInputList", || self.deps.client.list_inputs(None)).await?;

        let mut records = Vec::new();
        for input in inputs {
            let volume = match self.deps.client.input_volume(&input.input_name).await {
                Ok(volume) => volume,
                Err(e) => {
                    log::debug!(
                        "[AudioBridge] Skipping '{}', no volume endpoint: {}",
                        input.input_name,
                        e
                    );
                    continue;
                }
            };
            let muted = self
                .deps
                .client
                .input_muted(&input.input_name)
                .await
                .unwrap_or(false);
            records.push(AudioSourceRecord::new(
                input.input_name,
                input.input_kind,
                volume.input_volume_db.clamp(DB_FLOOR, DB_CEILING),
                muted,
            ));
        }

        let count = records.len();
        self.deps.state.sync_audio_sources(records);
        log::info!("[AudioBridge] Synced {} audio source(s)", count);
        self.deps.emitter.emit_audio(AudioEvent::SourcesSynced {
            count,
            timestamp: now_millis(),
        });
        Ok(count)
    }

    /// Clamps to the mixer range and applies the volume remotely.
    ///
    /// Returns false on failure; the fault is logged here and does not
    /// propagate.
    pub async fn set_volume(&self, source_name: &str, volume_db: f64) -> bool {
        let db = volume_db.clamp(DB_FLOOR, DB_CEILING);
        match self.deps.client.set_input_volume_db(source_name, db).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "[AudioBridge] SetInputVolume for '{}' failed: {}",
                    source_name,
                    e
                );
                false
            }
        }
    }

    /// Reads the remote mute state and writes the inverse.
    ///
    /// Read-then-write with no atomicity: two toggles racing each other
    /// (or the OBS UI) can land on the same value. Accepted limitation;
    /// the next InputMuteStateChanged event reconciles the mirror either
    /// way. Returns the state that was written, or None on failure.
    pub async fn toggle_mute(&self, source_name: &str) -> Option<bool> {
        let muted = match self.deps.client.input_muted(source_name).await {
            Ok(muted) => muted,
            Err(e) => {
                log::warn!("[AudioBridge] GetInputMute for '{}' failed: {}", source_name, e);
                return None;
            }
        };
        match self.deps.client.set_input_muted(source_name, !muted).await {
            Ok(()) => Some(!muted),
            Err(e) => {
                log::warn!("[AudioBridge] SetInputMute for '{}' failed: {}", source_name, e);
                None
            }
        }
    }

    /// Suppresses or resumes meter forwarding for one source.
    ///
    /// Other sources are unaffected. OBS visibility changes route here;
    /// consumers may also flag sources they don't currently render.
    pub fn set_source_hidden(&self, source_name: &str, hidden: bool) {
        if hidden {
            self.hidden.insert(source_name.to_string(), ());
        } else {
            self.hidden.remove(source_name);
        }
    }

    async fn handle_obs_event(&self, event: ObsEvent) {
        match event {
            ObsEvent::VolumeMeters { inputs } => self.forward_meters(inputs),
            ObsEvent::VolumeChanged {
                input_name,
                volume_db,
            } => {
                let db = volume_db.clamp(DB_FLOOR, DB_CEILING);
                let timestamp = now_millis();
                if let Some(mut record) = self.deps.state.audio_sources.get_mut(&input_name) {
                    record.volume_db = db;
                    record.last_update = timestamp;
                }
                self.deps.emitter.emit_audio(AudioEvent::VolumeChanged {
                    source_name: input_name,
                    volume_db: db,
                    timestamp,
                });
            }
            ObsEvent::MuteChanged { input_name, muted } => {
                let timestamp = now_millis();
                if let Some(mut record) = self.deps.state.audio_sources.get_mut(&input_name) {
                    record.muted = muted;
                    record.last_update = timestamp;
                }
                self.deps.emitter.emit_audio(AudioEvent::MuteChanged {
                    source_name: input_name,
                    muted,
                    timestamp,
                });
            }
            ObsEvent::InputCreated {
                input_name,
                input_kind,
            } => self.track_created_input(input_name, input_kind).await,
            ObsEvent::InputRemoved { input_name } => {
                self.hidden.remove(&input_name);
                if self.deps.state.audio_sources.remove(&input_name).is_some() {
                    log::info!("[AudioBridge] Source '{}' removed", input_name);
                    self.deps.emitter.emit_audio(AudioEvent::SourceRemoved {
                        source_name: input_name,
                        timestamp: now_millis(),
                    });
                }
            }
            ObsEvent::ActiveStateChanged { input_name, active } => {
                self.set_source_hidden(&input_name, !active);
            }
            ObsEvent::Unhandled { event_type } => {
                log::trace!("[AudioBridge] Ignoring {} event", event_type);
            }
        }
    }

    /// Converts one meter batch to Levels events for the tracked,
    /// non-hidden sources.
    fn forward_meters(&self, inputs: Vec<MeterReading>) {
        let timestamp = now_millis();
        for reading in inputs {
            if self.hidden.contains_key(&reading.input_name) {
                continue;
            }
            let Some(mut record) = self.deps.state.audio_sources.get_mut(&reading.input_name)
            else {
                continue;
            };

            let left = from_multiplier(reading.channel_magnitude(0).unwrap_or(0.0));
            // Mono sources report one channel; mirror it
            let right = reading
                .channel_magnitude(1)
                .map(from_multiplier)
                .unwrap_or(left);
            let peak_left = from_multiplier(reading.channel_peak(0).unwrap_or(0.0));
            let peak_right = reading.channel_peak(1).map(from_multiplier).unwrap_or(peak_left);

            record.last_levels_db = Some((left, right));
            record.last_peak_db = Some((peak_left, peak_right));
            record.last_update = timestamp;
            drop(record);

            self.deps.emitter.emit_audio(AudioEvent::Levels {
                source_name: reading.input_name,
                levels: ChannelLevels { left, right },
                peak: ChannelLevels {
                    left: peak_left,
                    right: peak_right,
                },
                timestamp,
            });
        }
    }

    /// Starts tracking an input that appeared mid-session, if it's audio.
    async fn track_created_input(&self, input_name: String, input_kind: String) {
        let volume = match self.deps.client.input_volume(&input_name).await {
            Ok(volume) => volume,
            Err(e) => {
                log::debug!("[AudioBridge] Ignoring non-audio input '{}': {}", input_name, e);
                return;
            }
        };
        let muted = self
            .deps
            .client
            .input_muted(&input_name)
            .await
            .unwrap_or(false);

        let record = AudioSourceRecord::new(
            input_name.clone(),
            input_kind,
            volume.input_volume_db.clamp(DB_FLOOR, DB_CEILING),
            muted,
        );
        self.deps.state.audio_sources.insert(input_name.clone(), record);
        log::info!("[AudioBridge] Tracking new audio source '{}'", input_name);
        self.deps.emitter.emit_audio(AudioEvent::SourceAdded {
            source_name: input_name,
            timestamp: now_millis(),
        });
    }

    async fn apply_volume_command(&self, command: VolumeCommand) {
        if !self.deps.state.audio_sources.contains_key(&command.target) {
            log::trace!(
                "[AudioBridge] Volume target '{}' is not an OBS source, event-only",
                command.target
            );
            return;
        }
        self.set_volume(&command.target, command.volume_db).await;
    }
}

#[async_trait]
impl ConnectedHook for AudioMixerBridge {
    async fn on_connected(&self) {
        if let Err(e) = self.sync_sources().await {
            log::warn!("[AudioBridge] Source sync after connect failed: {}", e);
        }
    }
}
