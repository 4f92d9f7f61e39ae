//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transport
//! implementations.

use super::{AudioEvent, ConnectionEvent, DisplayEvent, MidiEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to consumers (broadcast channel,
/// desktop frontend, etc.).
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.emitter.emit_audio(AudioEvent::SourcesSynced { .. });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a MIDI pipeline event.
    fn emit_midi(&self, event: MidiEvent);

    /// Emits an OBS connection lifecycle event.
    fn emit_connection(&self, event: ConnectionEvent);

    /// Emits an audio source event.
    fn emit_audio(&self, event: AudioEvent);

    /// Emits a display/overlay event.
    fn emit_display(&self, event: DisplayEvent);
}

/// No-op emitter for headless use or testing.
///
/// Events are silently discarded. Useful when the bridge runs without a
/// frontend and event delivery happens via the broadcast channel only.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_midi(&self, _event: MidiEvent) {
        // No-op
    }

    fn emit_connection(&self, _event: ConnectionEvent) {
        // No-op
    }

    fn emit_audio(&self, _event: AudioEvent) {
        // No-op
    }

    fn emit_display(&self, _event: DisplayEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Useful for debugging event flow
/// or in development environments.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_midi(&self, event: MidiEvent) {
        tracing::debug!(?event, "midi_event");
    }

    fn emit_connection(&self, event: ConnectionEvent) {
        tracing::debug!(?event, "connection_event");
    }

    fn emit_audio(&self, event: AudioEvent) {
        tracing::debug!(?event, "audio_event");
    }

    fn emit_display(&self, event: DisplayEvent) {
        tracing::debug!(?event, "display_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        midi_count: AtomicUsize,
        audio_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                midi_count: AtomicUsize::new(0),
                audio_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_midi(&self, _event: MidiEvent) {
            self.midi_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_connection(&self, _event: ConnectionEvent) {}

        fn emit_audio(&self, _event: AudioEvent) {
            self.audio_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_display(&self, _event: DisplayEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_midi(MidiEvent::MappingChanged {
            key: "7".into(),
            removed: false,
            timestamp: 0,
        });
        emitter.emit_midi(MidiEvent::MappingChanged {
            key: "7".into(),
            removed: true,
            timestamp: 0,
        });
        emitter.emit_audio(AudioEvent::SourcesSynced {
            count: 3,
            timestamp: 0,
        });

        assert_eq!(emitter.midi_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.audio_count.load(Ordering::SeqCst), 1);
    }
}
