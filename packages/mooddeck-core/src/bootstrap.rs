//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, BroadcastEventBridge, EventEmitter};
use crate::midi::device::DeviceRegistry;
use crate::midi::dispatcher::{MidiDispatcher, VolumeCommand};
use crate::midi::keyboard::KeyboardFallback;
use crate::midi::learn::LearningCoordinator;
use crate::midi::mapping::MappingStore;
use crate::obs::client::{ObsClientImpl, SocketHandle};
use crate::obs::connection::{ConnectedHook, ObsConnectionManager};
use crate::obs::traits::ObsClient;
use crate::obs::types::ObsEvent;
use crate::runtime::TokioSpawner;
use crate::services::{
    AudioBridgeDeps, AudioMixerBridge, DisplayPublisher, OverlayRefreshCoordinator, PayloadWriter,
};
use crate::state::{BridgeConfig, ObsState};
use crate::store::JsonFileMappingRepository;
use crate::volume::VolumeSmoother;

/// Container for all bootstrapped bridge services.
///
/// This struct holds all the wired services created during bootstrap.
/// Host layers (desktop app, headless server) hold onto it and route
/// their commands through the parts they need.
#[derive(Clone)]
pub struct BootstrappedBridge {
    /// Bridge configuration, shared with the connection manager.
    pub config: Arc<RwLock<BridgeConfig>>,
    /// Runtime mirror of the OBS side.
    pub obs_state: Arc<ObsState>,
    /// Typed OBS client over the shared session slot.
    pub obs_client: Arc<dyn ObsClient>,
    /// OBS session lifecycle and reconnect policy.
    pub connection: Arc<ObsConnectionManager>,
    /// Mirrors OBS audio sources and applies mixer commands.
    pub audio_bridge: Arc<AudioMixerBridge>,
    /// Discovers overlay browser sources and sweeps cache refreshes.
    pub overlay_refresh: Arc<OverlayRefreshCoordinator>,
    /// Publishes now-playing payloads with timed auto-hide.
    pub display: Arc<DisplayPublisher>,
    /// Control-key to action bindings.
    pub mappings: Arc<MappingStore>,
    /// MIDI learning sessions.
    pub learning: Arc<LearningCoordinator>,
    /// Routes decoded MIDI messages to their bound actions.
    pub dispatcher: Arc<MidiDispatcher>,
    /// Keyboard fallback input feeding the dispatcher.
    pub keyboard: Arc<KeyboardFallback>,
    /// Known MIDI ports and their open/closed state.
    pub devices: Arc<DeviceRegistry>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BridgeEvent>,
    /// Event bridge for emitting events to transports and optional
    /// external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedBridge {
    /// Returns a new receiver for the broadcast event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_bridge.subscribe()
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        // End an in-flight learning session, if any
        if self.learning.cancel() {
            log::info!("[Bootstrap] Cancelled active learning session");
        }

        // Close the OBS session and stop reconnecting
        self.connection.shutdown().await;

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all bridge services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (broadcast channel, event bridge, cancellation)
/// 2. Shared state (config, OBS mirror, session slot)
/// 3. Mapping store (loads the persisted user layer)
/// 4. MIDI pipeline (learning, dispatcher, keyboard, device registry)
/// 5. OBS services (connection manager, audio bridge, overlay refresh)
/// 6. Display publisher (depends on the overlay refresh coordinator)
///
/// The audio bridge and overlay refresh coordinator register as
/// post-connect hooks in that order, so source sync always precedes
/// browser-source discovery.
///
/// # Arguments
/// * `config` - Bridge configuration (validated here)
/// * `data_dir` - Directory for persisted bindings and the display payload
/// * `payload_writer` - Destination for now-playing payloads
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the persisted
/// mapping layer cannot be read.
pub fn bootstrap_bridge(
    config: BridgeConfig,
    data_dir: impl AsRef<Path>,
    payload_writer: Arc<dyn PayloadWriter>,
) -> BridgeResult<BootstrappedBridge> {
    config.validate().map_err(BridgeError::Configuration)?;
    let channels = config.channels.clone();
    let volume_smoothing = config.volume_smoothing;

    // Create task spawner from current runtime
    let spawner = TokioSpawner::current();

    // Create broadcast channel for real-time events to transport clients
    let (broadcast_tx, _) = broadcast::channel::<BridgeEvent>(channels.event_capacity);

    // Create the event bridge that maps domain events to broadcast transport
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));
    let emitter: Arc<dyn EventEmitter> = event_bridge.clone();

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Shared mutable state
    let config = Arc::new(RwLock::new(config));
    let obs_state = Arc::new(ObsState::default());
    let socket: SocketHandle = Arc::new(RwLock::new(None));

    // Internal queues: decoded OBS events and smoothed volume commands
    let (obs_event_tx, obs_event_rx) = mpsc::channel::<ObsEvent>(channels.obs_event_capacity);
    let (volume_tx, volume_rx) = mpsc::channel::<VolumeCommand>(channels.volume_command_capacity);

    // Mapping store over the file-backed repository
    let repository = Arc::new(JsonFileMappingRepository::new(data_dir));
    let mappings = Arc::new(MappingStore::new(repository, Arc::clone(&emitter)));
    let loaded = mappings.load()?;
    log::info!("[Bootstrap] Loaded {} user binding(s)", loaded);

    // MIDI pipeline
    let learning = Arc::new(LearningCoordinator::new(
        Arc::clone(&emitter),
        spawner.clone(),
    ));
    let dispatcher = Arc::new(MidiDispatcher::new(
        Arc::clone(&mappings),
        Arc::clone(&learning),
        Arc::new(VolumeSmoother::new(volume_smoothing)),
        Arc::clone(&emitter),
        volume_tx,
    ));
    let keyboard = Arc::new(KeyboardFallback::new(Arc::clone(&dispatcher)));
    let devices = Arc::new(DeviceRegistry::new(Arc::clone(&emitter)));

    // OBS client over the shared session slot
    let obs_client: Arc<dyn ObsClient> = Arc::new(ObsClientImpl::new(Arc::clone(&socket)));

    // Connection manager owns the slot; events flow into the audio bridge
    let connection = Arc::new(ObsConnectionManager::new(
        Arc::clone(&config),
        Arc::clone(&obs_state),
        Arc::clone(&socket),
        obs_event_tx,
        Arc::clone(&emitter),
        spawner.clone(),
    ));

    let audio_bridge = Arc::new(AudioMixerBridge::new(
        AudioBridgeDeps {
            client: Arc::clone(&obs_client),
            state: Arc::clone(&obs_state),
            emitter: Arc::clone(&emitter),
        },
        obs_event_rx,
        volume_rx,
        cancel_token.child_token(),
        spawner.clone(),
    ));
    audio_bridge.start_forwarders();

    let overlay_refresh = Arc::new(OverlayRefreshCoordinator::new(
        Arc::clone(&obs_client),
        Arc::clone(&obs_state),
        Arc::clone(&emitter),
    ));

    let display = Arc::new(DisplayPublisher::new(
        payload_writer,
        Arc::clone(&overlay_refresh),
        Arc::clone(&emitter),
        cancel_token.child_token(),
        spawner.clone(),
    ));

    // Post-connect hooks run in registration order: sources, then overlay
    connection.register_connected_hook(Arc::clone(&audio_bridge) as Arc<dyn ConnectedHook>);
    connection.register_connected_hook(Arc::clone(&overlay_refresh) as Arc<dyn ConnectedHook>);

    Ok(BootstrappedBridge {
        config,
        obs_state,
        obs_client,
        connection,
        audio_bridge,
        overlay_refresh,
        display,
        mappings,
        learning,
        dispatcher,
        keyboard,
        devices,
        broadcast_tx,
        event_bridge,
        spawner,
        cancel_token,
    })
}
