//! Now-playing display payload publishing.
//!
//! The overlay renderer consumes a single JSON payload describing the
//! current song and mood. Publishing supersedes the previous payload
//! wholesale; the monotonically increasing timestamp is the consumer's
//! de-duplication key. Unless the settings pin the display, an auto-hide
//! timer rewrites the payload with `showDisplay: false` after the
//! configured duration. At most one timer is live; a new publish cancels
//! a pending one first. A timer that already fired still hides the
//! payload it captured, which the next publish immediately supersedes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::events::{DisplayEvent, EventEmitter};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::overlay_refresh::OverlayRefreshCoordinator;
use crate::utils::now_millis;

/// File name of the payload, relative to the data directory.
pub const DISPLAY_FILE: &str = "mood_display.json";

fn default_display_duration() -> u64 {
    8000
}

/// The currently playing song as the host describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongDescriptor {
    /// Stable identifier; drives refresh de-duplication.
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// Cover art reference the overlay renderer understands.
    #[serde(default)]
    pub cover: Option<String>,
}

/// The active mood's visual parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodDescriptor {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub pulse_speed: f64,
    #[serde(default)]
    pub intensity: f64,
}

/// Display behavior settings supplied by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySettings {
    /// Pins the display; no auto-hide timer is armed.
    #[serde(default)]
    pub always_show: bool,
    /// Auto-hide delay in milliseconds.
    #[serde(default = "default_display_duration")]
    pub display_duration: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            always_show: false,
            display_duration: default_display_duration(),
        }
    }
}

/// The payload the overlay renderer polls or watches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPayload {
    pub song: SongDescriptor,
    pub mood: MoodDescriptor,
    pub settings: DisplaySettings,
    pub show_display: bool,
    /// Milliseconds since the epoch; strictly supersedes lower values.
    pub timestamp: u64,
}

/// Writes payloads to wherever the overlay reads them.
#[async_trait]
pub trait PayloadWriter: Send + Sync {
    /// Returns false on failure; implementations log the fault.
    async fn write(&self, payload: &DisplayPayload) -> bool;
}

/// Default writer: a JSON file next to the other bridge data.
pub struct JsonFilePayloadWriter {
    path: PathBuf,
}

impl JsonFilePayloadWriter {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(DISPLAY_FILE),
        }
    }

    /// The payload path, e.g. for pointing a browser source at it.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, payload: &DisplayPayload) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(payload)?;
        // Write-then-rename keeps a watching renderer from reading a
        // half-written payload
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[async_trait]
impl PayloadWriter for JsonFilePayloadWriter {
    async fn write(&self, payload: &DisplayPayload) -> bool {
        match self.write_file(payload) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "[DisplayPublisher] Failed to write {}: {}",
                    self.path.display(),
                    e
                );
                false
            }
        }
    }
}

/// Publishes display payloads with timed auto-hide.
pub struct DisplayPublisher {
    writer: Arc<dyn PayloadWriter>,
    refresher: Arc<OverlayRefreshCoordinator>,
    emitter: Arc<dyn EventEmitter>,
    /// Replaced wholesale on each publish to cancel a pending auto-hide.
    hide_timer: RwLock<CancellationToken>,
    shutdown: CancellationToken,
    spawner: TokioSpawner,
}

impl DisplayPublisher {
    pub fn new(
        writer: Arc<dyn PayloadWriter>,
        refresher: Arc<OverlayRefreshCoordinator>,
        emitter: Arc<dyn EventEmitter>,
        shutdown: CancellationToken,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            writer,
            refresher,
            emitter,
            hide_timer: RwLock::new(CancellationToken::new()),
            shutdown,
            spawner,
        }
    }

    /// Publishes the current song/mood to the overlay.
    ///
    /// A song without an id is refused. On a successful write this emits
    /// Published, runs the per-song refresh sweep, and arms the auto-hide
    /// timer unless the settings pin the display. Returns whether the
    /// payload was written.
    pub async fn publish(
        self: &Arc<Self>,
        song: SongDescriptor,
        mood: MoodDescriptor,
        settings: DisplaySettings,
    ) -> bool {
        if song.id.is_empty() {
            log::warn!("[DisplayPublisher] Ignoring publish without a song id");
            return false;
        }

        // One live timer max: retire the pending one before anything else
        let hide_token = {
            let mut guard = self.hide_timer.write();
            guard.cancel();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let payload = DisplayPayload {
            song,
            mood,
            settings,
            show_display: true,
            timestamp: now_millis(),
        };
        if !self.writer.write(&payload).await {
            log::warn!(
                "[DisplayPublisher] Payload write failed for song {}",
                payload.song.id
            );
            return false;
        }

        log::info!(
            "[DisplayPublisher] Published '{}' by '{}'",
            payload.song.title,
            payload.song.artist
        );
        self.emitter.emit_display(DisplayEvent::Published {
            song_id: payload.song.id.clone(),
            timestamp: payload.timestamp,
        });
        self.refresher.refresh_for_song(&payload.song.id).await;

        if !payload.settings.always_show {
            self.arm_auto_hide(payload, hide_token);
        }
        true
    }

    fn arm_auto_hide(self: &Arc<Self>, payload: DisplayPayload, token: CancellationToken) {
        let publisher = Arc::clone(self);
        let delay = Duration::from_millis(payload.settings.display_duration);
        self.spawner.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = publisher.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            publisher.hide(payload).await;
        });
    }

    /// Rewrites the captured payload with the display turned off.
    async fn hide(&self, mut payload: DisplayPayload) {
        payload.show_display = false;
        payload.timestamp = now_millis();
        if self.writer.write(&payload).await {
            log::debug!(
                "[DisplayPublisher] Auto-hid display for song {}",
                payload.song.id
            );
            self.emitter.emit_display(DisplayEvent::Hidden {
                song_id: payload.song.id,
                timestamp: payload.timestamp,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ObsError, ObsResult};
    use crate::events::{AudioEvent, ConnectionEvent, MidiEvent};
    use crate::obs::traits::{ObsAudioControl, ObsSourceControl};
    use crate::obs::types::{InputInfo, InputSettingsResponse, InputVolumeResponse};
    use crate::state::ObsState;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Recorder(Mutex<Vec<DisplayEvent>>);

    impl Recorder {
        fn published(&self) -> usize {
            self.0
                .lock()
                .iter()
                .filter(|e| matches!(e, DisplayEvent::Published { .. }))
                .count()
        }

        fn hidden(&self) -> usize {
            self.0
                .lock()
                .iter()
                .filter(|e| matches!(e, DisplayEvent::Hidden { .. }))
                .count()
        }

        fn sweeps(&self) -> usize {
            self.0
                .lock()
                .iter()
                .filter(|e| matches!(e, DisplayEvent::OverlayRefreshed { .. }))
                .count()
        }
    }

    impl EventEmitter for Recorder {
        fn emit_midi(&self, _event: MidiEvent) {}
        fn emit_connection(&self, _event: ConnectionEvent) {}
        fn emit_audio(&self, _event: AudioEvent) {}
        fn emit_display(&self, event: DisplayEvent) {
            self.0.lock().push(event);
        }
    }

    struct MemoryWriter {
        writes: Mutex<Vec<DisplayPayload>>,
        fail: AtomicBool,
    }

    impl MemoryWriter {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PayloadWriter for MemoryWriter {
        async fn write(&self, payload: &DisplayPayload) -> bool {
            if self.fail.load(Ordering::SeqCst) {
                return false;
            }
            self.writes.lock().push(payload.clone());
            true
        }
    }

    /// The publisher's sweeps go through a coordinator with no sources.
    struct StubObs;

    #[async_trait]
    impl ObsAudioControl for StubObs {
        async fn input_volume(&self, _input_name: &str) -> ObsResult<InputVolumeResponse> {
            Err(ObsError::NotConnected)
        }
        async fn set_input_volume_db(&self, _input_name: &str, _volume_db: f64) -> ObsResult<()> {
            Err(ObsError::NotConnected)
        }
        async fn input_muted(&self, _input_name: &str) -> ObsResult<bool> {
            Err(ObsError::NotConnected)
        }
        async fn set_input_muted(&self, _input_name: &str, _muted: bool) -> ObsResult<()> {
            Err(ObsError::NotConnected)
        }
    }

    #[async_trait]
    impl ObsSourceControl for StubObs {
        async fn list_inputs(&self, _input_kind: Option<&str>) -> ObsResult<Vec<InputInfo>> {
            Err(ObsError::NotConnected)
        }
        async fn input_kinds(&self) -> ObsResult<Vec<String>> {
            Err(ObsError::NotConnected)
        }
        async fn list_scenes(&self) -> ObsResult<Vec<String>> {
            Err(ObsError::NotConnected)
        }
        async fn input_settings(&self, _input_name: &str) -> ObsResult<InputSettingsResponse> {
            Err(ObsError::NotConnected)
        }
        async fn press_properties_button(
            &self,
            _input_name: &str,
            _property_name: &str,
        ) -> ObsResult<()> {
            Err(ObsError::NotConnected)
        }
    }

    struct Fixture {
        publisher: Arc<DisplayPublisher>,
        writer: Arc<MemoryWriter>,
        recorder: Arc<Recorder>,
        shutdown: CancellationToken,
    }

    fn fixture() -> Fixture {
        let writer = Arc::new(MemoryWriter::new());
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let refresher = Arc::new(OverlayRefreshCoordinator::new(
            Arc::new(StubObs),
            Arc::new(ObsState::default()),
            recorder.clone(),
        ));
        let shutdown = CancellationToken::new();
        let publisher = Arc::new(DisplayPublisher::new(
            writer.clone(),
            refresher,
            recorder.clone(),
            shutdown.clone(),
            TokioSpawner::current(),
        ));
        Fixture {
            publisher,
            writer,
            recorder,
            shutdown,
        }
    }

    fn song(id: &str) -> SongDescriptor {
        SongDescriptor {
            id: id.to_string(),
            title: "Neon Rain".to_string(),
            artist: "Midnight Drive".to_string(),
            album: "City Lights".to_string(),
            cover: Some("covers/neon_rain.png".to_string()),
        }
    }

    fn mood() -> MoodDescriptor {
        MoodDescriptor {
            name: "chill".to_string(),
            color: "#3355ff".to_string(),
            pulse_speed: 0.5,
            intensity: 0.7,
        }
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn publish_writes_then_auto_hides_after_the_duration() {
        let f = fixture();

        assert!(
            f.publisher
                .publish(song("song-a"), mood(), DisplaySettings::default())
                .await
        );
        {
            let writes = f.writer.writes.lock();
            assert_eq!(writes.len(), 1);
            assert!(writes[0].show_display);
            assert_eq!(writes[0].song.id, "song-a");
        }

        sleep_ms(7999).await;
        assert_eq!(f.writer.writes.lock().len(), 1);

        sleep_ms(2).await;
        let writes = f.writer.writes.lock();
        assert_eq!(writes.len(), 2);
        assert!(!writes[1].show_display);
        assert!(writes[1].timestamp >= writes[0].timestamp);
        assert_eq!(f.recorder.published(), 1);
        assert_eq!(f.recorder.hidden(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn republish_resets_the_auto_hide_timer() {
        let f = fixture();

        f.publisher
            .publish(song("song-a"), mood(), DisplaySettings::default())
            .await;
        sleep_ms(5000).await;
        f.publisher
            .publish(song("song-a"), mood(), DisplaySettings::default())
            .await;

        // The first timer would have fired at t=8000
        sleep_ms(5000).await;
        assert_eq!(f.recorder.hidden(), 0);

        // The second one fires 8000ms after the republish
        sleep_ms(3100).await;
        assert_eq!(f.recorder.hidden(), 1);
        assert_eq!(f.writer.writes.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pinned_display_never_hides() {
        let f = fixture();
        let settings = DisplaySettings {
            always_show: true,
            ..DisplaySettings::default()
        };

        f.publisher.publish(song("song-a"), mood(), settings).await;
        sleep_ms(20_000).await;

        assert_eq!(f.writer.writes.lock().len(), 1);
        assert_eq!(f.recorder.hidden(), 0);
    }

    #[tokio::test]
    async fn empty_song_id_is_refused() {
        let f = fixture();

        assert!(
            !f.publisher
                .publish(song(""), mood(), DisplaySettings::default())
                .await
        );
        assert!(f.writer.writes.lock().is_empty());
        assert!(f.recorder.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_emits_nothing_and_arms_no_timer() {
        let f = fixture();
        f.writer.fail.store(true, Ordering::SeqCst);

        assert!(
            !f.publisher
                .publish(song("song-a"), mood(), DisplaySettings::default())
                .await
        );
        sleep_ms(9000).await;

        assert!(f.recorder.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_sweeps_deduplicate_per_song() {
        let f = fixture();

        f.publisher
            .publish(song("song-a"), mood(), DisplaySettings::default())
            .await;
        f.publisher
            .publish(song("song-a"), mood(), DisplaySettings::default())
            .await;
        assert_eq!(f.recorder.sweeps(), 1);

        f.publisher
            .publish(song("song-b"), mood(), DisplaySettings::default())
            .await;
        assert_eq!(f.recorder.sweeps(), 2);
        assert_eq!(f.recorder.published(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_auto_hide() {
        let f = fixture();

        f.publisher
            .publish(song("song-a"), mood(), DisplaySettings::default())
            .await;
        f.shutdown.cancel();
        sleep_ms(9000).await;

        assert_eq!(f.writer.writes.lock().len(), 1);
        assert_eq!(f.recorder.hidden(), 0);
    }

    #[tokio::test]
    async fn file_writer_round_trips_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonFilePayloadWriter::new(dir.path());
        let payload = DisplayPayload {
            song: song("song-a"),
            mood: mood(),
            settings: DisplaySettings::default(),
            show_display: true,
            timestamp: 1_700_000_000_000,
        };

        assert!(writer.write(&payload).await);
        let raw = std::fs::read_to_string(writer.path()).unwrap();
        let read: DisplayPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(read, payload);
        assert!(raw.contains("\"showDisplay\": true"));
        assert!(raw.contains("\"displayDuration\": 8000"));
        // No temp file left behind
        assert!(!dir.path().join("mood_display.json.tmp").exists());
    }
}
