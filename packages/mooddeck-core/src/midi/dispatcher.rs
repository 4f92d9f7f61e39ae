//! Routing of decoded MIDI messages to their bound actions.
//!
//! Pipeline per frame: decode, offer to the learning coordinator (an
//! active session consumes the message), resolve the mapping key against
//! the store, then branch on the binding kind. Volume bindings translate
//! the controller value to decibels, smooth it, and queue a command for
//! the audio bridge; hotkey bindings emit an action event on press.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::{EventEmitter, MidiEvent};
use crate::midi::learn::{LearnOutcome, LearningCoordinator};
use crate::midi::mapping::{derive_mapping_key, Binding, BindingKind, MappingStore};
use crate::midi::message::{decode_frame, ControlMessage};
use crate::utils::{now_millis, round2};
use crate::volume::{to_decibel, VolumeSmoother};

/// A smoothed volume change bound for the OBS mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCommand {
    /// Mixer source name from the binding.
    pub target: String,
    /// Smoothed level in dB, within [-60, 0].
    pub volume_db: f64,
}

/// Routes decoded messages through learn, mapping and translation.
///
/// One instance serves all input ports; per-target smoothing state lives
/// in the shared [`VolumeSmoother`].
pub struct MidiDispatcher {
    store: Arc<MappingStore>,
    learning: Arc<LearningCoordinator>,
    smoother: Arc<VolumeSmoother>,
    emitter: Arc<dyn EventEmitter>,
    volume_tx: mpsc::Sender<VolumeCommand>,
}

impl MidiDispatcher {
    /// Creates a dispatcher feeding volume commands into `volume_tx`.
    pub fn new(
        store: Arc<MappingStore>,
        learning: Arc<LearningCoordinator>,
        smoother: Arc<VolumeSmoother>,
        emitter: Arc<dyn EventEmitter>,
        volume_tx: mpsc::Sender<VolumeCommand>,
    ) -> Self {
        Self {
            store,
            learning,
            smoother,
            emitter,
            volume_tx,
        }
    }

    /// Decodes a raw frame and dispatches it. Short frames are dropped by
    /// the decoder.
    pub fn handle_frame(&self, bytes: &[u8]) {
        if let Some(msg) = decode_frame(bytes, now_millis()) {
            self.handle_message(msg);
        }
    }

    /// Dispatches an already decoded message.
    ///
    /// Also the entry point for synthesized input (keyboard fallback).
    pub fn handle_message(&self, msg: ControlMessage) {
        match self.learning.observe(&msg) {
            // An active session owns the message stream
            LearnOutcome::Captured(_) | LearnOutcome::Ignored => return,
            LearnOutcome::Inactive => {}
        }

        let Some(key) = derive_mapping_key(&msg) else {
            log::debug!("[MidiDispatcher] {:?} message has no mapping key", msg.kind);
            return;
        };
        let Some(binding) = self.store.resolve(&key) else {
            log::debug!("[MidiDispatcher] No binding for key {}", key);
            return;
        };

        match binding.kind {
            BindingKind::Volume => self.dispatch_volume(&key, &binding, &msg),
            BindingKind::Hotkey => self.dispatch_hotkey(&key, &binding, &msg),
        }
    }

    fn dispatch_volume(&self, key: &str, binding: &Binding, msg: &ControlMessage) {
        let db = to_decibel(msg.value, binding.min, binding.max);
        let db = round2(self.smoother.smooth(&binding.target, db));

        match self.volume_tx.try_send(VolumeCommand {
            target: binding.target.clone(),
            volume_db: db,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => {
                log::warn!(
                    "[MidiDispatcher] Volume queue full, dropping update for {}",
                    cmd.target
                );
            }
            Err(TrySendError::Closed(cmd)) => {
                log::warn!(
                    "[MidiDispatcher] Volume queue closed, dropping update for {}",
                    cmd.target
                );
            }
        }

        self.emitter.emit_midi(MidiEvent::VolumeChange {
            target: binding.target.clone(),
            value: db,
            midi_value: msg.value,
            key: key.to_string(),
            timestamp: msg.timestamp_ms,
        });
    }

    fn dispatch_hotkey(&self, key: &str, binding: &Binding, msg: &ControlMessage) {
        // Releases (velocity/value 0) don't fire actions
        if msg.value == 0 {
            log::debug!("[MidiDispatcher] Ignoring release on hotkey key {}", key);
            return;
        }
        let Some(action) = binding.action.as_deref() else {
            log::warn!("[MidiDispatcher] Hotkey binding for {} has no action", key);
            return;
        };

        log::info!(
            "[MidiDispatcher] Hotkey {} -> {} ({})",
            key,
            action,
            binding.target
        );
        self.emitter.emit_midi(MidiEvent::HotkeyAction {
            action: action.to_string(),
            target: binding.target.clone(),
            velocity: msg.value,
            timestamp: msg.timestamp_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AudioEvent, ConnectionEvent, DisplayEvent, NoopEventEmitter};
    use crate::midi::mapping::BindingSource;
    use crate::runtime::TokioSpawner;
    use crate::store::MemoryMappingRepository;
    use parking_lot::Mutex;

    struct Recorder(Mutex<Vec<MidiEvent>>);

    impl EventEmitter for Recorder {
        fn emit_midi(&self, event: MidiEvent) {
            self.0.lock().push(event);
        }
        fn emit_connection(&self, _event: ConnectionEvent) {}
        fn emit_audio(&self, _event: AudioEvent) {}
        fn emit_display(&self, _event: DisplayEvent) {}
    }

    struct Fixture {
        dispatcher: MidiDispatcher,
        store: Arc<MappingStore>,
        learning: Arc<LearningCoordinator>,
        recorder: Arc<Recorder>,
        volume_rx: mpsc::Receiver<VolumeCommand>,
    }

    fn fixture() -> Fixture {
        fixture_with_capacity(16)
    }

    fn fixture_with_capacity(capacity: usize) -> Fixture {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let emitter: Arc<dyn EventEmitter> = recorder.clone();
        let store = Arc::new(MappingStore::new(
            Arc::new(MemoryMappingRepository::default()),
            Arc::new(NoopEventEmitter),
        ));
        let learning = Arc::new(LearningCoordinator::new(
            emitter.clone(),
            TokioSpawner::current(),
        ));
        let (volume_tx, volume_rx) = mpsc::channel(capacity);
        let dispatcher = MidiDispatcher::new(
            store.clone(),
            learning.clone(),
            Arc::new(VolumeSmoother::default()),
            emitter,
            volume_tx,
        );
        Fixture {
            dispatcher,
            store,
            learning,
            recorder,
            volume_rx,
        }
    }

    fn volume_events(recorder: &Recorder) -> Vec<(String, f64, u8)> {
        recorder
            .0
            .lock()
            .iter()
            .filter_map(|e| match e {
                MidiEvent::VolumeChange {
                    target,
                    value,
                    midi_value,
                    ..
                } => Some((target.clone(), *value, *midi_value)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn default_fader_maps_to_master_volume() {
        let mut fx = fixture();
        fx.dispatcher.handle_frame(&[0xB0, 1, 127]);

        let cmd = fx.volume_rx.recv().await.unwrap();
        assert_eq!(cmd.target, "master");
        assert!((cmd.volume_db - 0.0).abs() < 1e-9);

        let events = volume_events(&fx.recorder);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "master");
        assert_eq!(events[0].2, 127);
    }

    #[tokio::test]
    async fn midpoint_value_lands_near_minus_thirty() {
        let mut fx = fixture();
        fx.dispatcher.handle_frame(&[0xB0, 1, 64]);
        let cmd = fx.volume_rx.recv().await.unwrap();
        // 64/127 of the 60 dB window, rounded to two decimals
        assert!((cmd.volume_db - -29.76).abs() < 1e-9);
    }

    #[tokio::test]
    async fn consecutive_values_are_smoothed() {
        let mut fx = fixture();
        fx.dispatcher.handle_frame(&[0xB0, 2, 0]);
        fx.dispatcher.handle_frame(&[0xB0, 2, 127]);

        let first = fx.volume_rx.recv().await.unwrap();
        let second = fx.volume_rx.recv().await.unwrap();
        assert_eq!(first.volume_db, -60.0);
        // One smoothing step toward 0 dB at alpha 0.1
        assert!((second.volume_db - -54.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn custom_binding_range_rescales_translation() {
        let mut fx = fixture();
        let mut binding = Binding::volume("alerts");
        binding.min = 0;
        binding.max = 100;
        fx.store.set_binding("5", binding).unwrap();

        fx.dispatcher.handle_frame(&[0xB0, 5, 50]);
        let cmd = fx.volume_rx.recv().await.unwrap();
        assert_eq!(cmd.target, "alerts");
        assert!((cmd.volume_db - -30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hotkey_press_emits_action() {
        let mut fx = fixture();
        fx.dispatcher.handle_frame(&[0xB0, 16, 127]);

        assert!(fx.volume_rx.try_recv().is_err());
        let events = fx.recorder.0.lock();
        assert!(matches!(
            events.last().unwrap(),
            MidiEvent::HotkeyAction { action, target, velocity: 127, .. }
                if action == "play_pause" && target == "player"
        ));
    }

    #[tokio::test]
    async fn hotkey_release_is_ignored() {
        let fx = fixture();
        fx.dispatcher.handle_frame(&[0xB0, 16, 0]);
        assert!(fx.recorder.0.lock().is_empty());
    }

    #[tokio::test]
    async fn hotkey_without_action_is_skipped() {
        let fx = fixture();
        let binding = Binding {
            kind: BindingKind::Hotkey,
            target: "player".into(),
            action: None,
            min: 0,
            max: 127,
            source: BindingSource::User,
        };
        fx.store.set_binding("20", binding).unwrap();
        fx.dispatcher.handle_frame(&[0xB0, 20, 127]);
        assert!(fx.recorder.0.lock().is_empty());
    }

    #[tokio::test]
    async fn unbound_note_key_is_ignored() {
        let mut fx = fixture();
        // note_18 never hits the numeric "18" default
        fx.dispatcher.handle_frame(&[0x90, 18, 127]);
        assert!(fx.volume_rx.try_recv().is_err());
        assert!(fx.recorder.0.lock().is_empty());
    }

    #[tokio::test]
    async fn short_frames_are_dropped() {
        let mut fx = fixture();
        fx.dispatcher.handle_frame(&[0xB0]);
        fx.dispatcher.handle_frame(&[]);
        assert!(fx.volume_rx.try_recv().is_err());
        assert!(fx.recorder.0.lock().is_empty());
    }

    #[tokio::test]
    async fn active_learning_session_consumes_messages() {
        let mut fx = fixture();
        fx.learning.start("music volume").unwrap();
        fx.dispatcher.handle_frame(&[0xB0, 1, 127]);

        assert!(fx.volume_rx.try_recv().is_err());
        assert!(!fx.learning.is_active());
        let events = fx.recorder.0.lock();
        assert!(!events
            .iter()
            .any(|e| matches!(e, MidiEvent::VolumeChange { .. })));
    }

    #[tokio::test]
    async fn learned_key_routes_after_binding() {
        let mut fx = fixture();
        fx.learning.start("alerts volume").unwrap();
        // Captured by the session, so no volume output yet
        fx.dispatcher.handle_frame(&[0xB0, 7, 3]);
        assert!(!fx.learning.is_active());
        assert!(fx.volume_rx.try_recv().is_err());

        // The host reacts to the Completed event by binding the key
        fx.store.set_binding("7", Binding::volume("alerts")).unwrap();
        fx.dispatcher.handle_frame(&[0xB0, 7, 127]);

        let cmd = fx.volume_rx.recv().await.unwrap();
        assert_eq!(cmd.target, "alerts");
        assert_eq!(volume_events(&fx.recorder).len(), 1);
    }

    #[tokio::test]
    async fn full_volume_queue_drops_but_still_emits() {
        let mut fx = fixture_with_capacity(1);
        fx.dispatcher.handle_frame(&[0xB0, 1, 10]);
        fx.dispatcher.handle_frame(&[0xB0, 1, 20]);

        // Only the first command fits the queue
        assert!(fx.volume_rx.try_recv().is_ok());
        assert!(fx.volume_rx.try_recv().is_err());
        // Both dispatches still produced events
        assert_eq!(volume_events(&fx.recorder).len(), 2);
    }
}
