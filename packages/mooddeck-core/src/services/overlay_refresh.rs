//! Browser-source discovery and cache-busting refresh.
//!
//! The overlay renderer runs inside OBS browser sources; after a song
//! change those sources must reload so cached artwork doesn't linger.
//! Discovery classifies browser sources by keyword, the refresh sweep
//! presses their reload button, and a per-song dedup keeps repeated
//! publishes of the same song from flickering the overlay.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BridgeResult;
use crate::events::{DisplayEvent, EventEmitter};
use crate::obs::connection::ConnectedHook;
use crate::obs::retry::with_retry;
use crate::obs::traits::ObsClient;
use crate::state::{BrowserSourceRecord, ObsState};
use crate::utils::now_millis;

/// Name/URL tokens that mark a browser source as part of the overlay.
const OVERLAY_KEYWORDS: [&str; 3] = ["mood", "music", "song"];

/// The packaged overlay page; a URL referencing it is always a candidate.
const OVERLAY_FILE: &str = "mooddeck_overlay.html";

/// The properties button that forces a cache-busting reload.
const REFRESH_BUTTON: &str = "refreshnocache";

/// Finds overlay browser sources and refreshes them once per song.
pub struct OverlayRefreshCoordinator {
    client: Arc<dyn ObsClient>,
    state: Arc<ObsState>,
    emitter: Arc<dyn EventEmitter>,
    /// Song id of the last sweep; repeats for it are suppressed.
    last_refreshed: Mutex<Option<String>>,
}

impl OverlayRefreshCoordinator {
    pub fn new(
        client: Arc<dyn ObsClient>,
        state: Arc<ObsState>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            client,
            state,
            emitter,
            last_refreshed: Mutex::new(None),
        }
    }

    /// Rebuilds the browser source list from a fresh scan.
    ///
    /// The whole list is replaced on every call; there is no incremental
    /// merge. A failed settings fetch leaves the URL empty and classifies
    /// that source by name alone. Returns the number of overlay
    /// candidates found.
    pub async fn discover(&self) -> BridgeResult<usize> {
        let kinds = with_retry("GetInputKindList", || self.client.input_kinds()).await?;
        let Some(browser_kind) = kinds.into_iter().find(|k| k.contains("browser")) else {
            log::info!("[OverlayRefresh] No browser source kind on this OBS install");
            *self.state.browser_sources.write() = Vec::new();
            return Ok(0);
        };

        let inputs = with_retry("GetInputList", || {
            self.client.list_inputs(Some(&browser_kind))
        })
        .await?;

        let mut records = Vec::new();
        for input in inputs {
            let url = match self.client.input_settings(&input.input_name).await {
                Ok(settings) => settings
                    .input_settings
                    .get("url")
                    .and_then(|url| url.as_str())
                    .unwrap_or_default()
                    .to_string(),
                Err(e) => {
                    log::debug!(
                        "[OverlayRefresh] No settings for '{}', classifying by name: {}",
                        input.input_name,
                        e
                    );
                    String::new()
                }
            };
            records.push(BrowserSourceRecord {
                keyword: classify(&input.input_name, &url),
                name: input.input_name,
                url,
            });
        }

        let candidates = records.iter().filter(|r| r.is_overlay_candidate()).count();
        log::info!(
            "[OverlayRefresh] Found {} browser source(s), {} overlay candidate(s)",
            records.len(),
            candidates
        );
        *self.state.browser_sources.write() = records;
        Ok(candidates)
    }

    /// Presses the cache-busting reload on browser sources.
    ///
    /// With `overlay_only` the sweep is limited to classified candidates.
    /// Individual failures are logged and skipped. Returns how many
    /// sources actually reloaded.
    pub async fn refresh(&self, overlay_only: bool) -> usize {
        let sources: Vec<BrowserSourceRecord> = self
            .state
            .browser_sources
            .read()
            .iter()
            .filter(|r| !overlay_only || r.is_overlay_candidate())
            .cloned()
            .collect();
        if sources.is_empty() {
            log::debug!("[OverlayRefresh] No browser sources to refresh");
            return 0;
        }

        let mut refreshed = 0;
        for source in sources {
            match self
                .client
                .press_properties_button(&source.name, REFRESH_BUTTON)
                .await
            {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    log::warn!("[OverlayRefresh] Refresh of '{}' failed: {}", source.name, e);
                }
            }
        }
        log::debug!("[OverlayRefresh] Refreshed {} source(s)", refreshed);
        refreshed
    }

    /// Runs at most one candidate sweep per song change.
    ///
    /// The id is recorded before the sweep so concurrent repeats for the
    /// same song coalesce instead of queueing. Returns true when at least
    /// one source reloaded.
    pub async fn refresh_for_song(&self, song_id: &str) -> bool {
        if song_id.is_empty() {
            log::debug!("[OverlayRefresh] Ignoring refresh for empty song id");
            return false;
        }
        {
            let mut last = self.last_refreshed.lock();
            if last.as_deref() == Some(song_id) {
                log::debug!("[OverlayRefresh] Already refreshed for song {}", song_id);
                return false;
            }
            *last = Some(song_id.to_string());
        }

        let refreshed = self.refresh(true).await;
        self.emitter.emit_display(DisplayEvent::OverlayRefreshed {
            song_id: song_id.to_string(),
            refreshed,
            timestamp: now_millis(),
        });
        refreshed > 0
    }
}

#[async_trait]
impl ConnectedHook for OverlayRefreshCoordinator {
    async fn on_connected(&self) {
        if let Err(e) = self.discover().await {
            log::warn!("[OverlayRefresh] Browser source discovery failed: {}", e);
        }
    }
}

/// Returns the token that classifies a source as an overlay candidate.
fn classify(name: &str, url: &str) -> Option<String> {
    let name = name.to_lowercase();
    let url = url.to_lowercase();
    for keyword in OVERLAY_KEYWORDS {
        if name.contains(keyword) || url.contains(keyword) {
            return Some(keyword.to_string());
        }
    }
    if url.contains(OVERLAY_FILE) {
        return Some(OVERLAY_FILE.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ObsError, ObsResult};
    use crate::events::{AudioEvent, ConnectionEvent, MidiEvent};
    use crate::obs::traits::{ObsAudioControl, ObsSourceControl};
    use crate::obs::types::{InputInfo, InputSettingsResponse, InputVolumeResponse};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    struct Recorder(Mutex<Vec<DisplayEvent>>);

    impl EventEmitter for Recorder {
        fn emit_midi(&self, _event: MidiEvent) {}
        fn emit_connection(&self, _event: ConnectionEvent) {}
        fn emit_audio(&self, _event: AudioEvent) {}
        fn emit_display(&self, event: DisplayEvent) {
            self.0.lock().push(event);
        }
    }

    /// Scripted OBS exposing browser sources with fixed settings URLs.
    struct MockObs {
        kinds: Vec<String>,
        inputs: Vec<InputInfo>,
        urls: HashMap<String, String>,
        failing: HashSet<String>,
        presses: Mutex<Vec<String>>,
    }

    impl MockObs {
        fn browser(sources: &[(&str, &str)]) -> Self {
            Self {
                kinds: vec!["ffmpeg_source".to_string(), "browser_source".to_string()],
                inputs: sources
                    .iter()
                    .map(|(name, _)| InputInfo {
                        input_name: name.to_string(),
                        input_kind: "browser_source".to_string(),
                    })
                    .collect(),
                urls: sources
                    .iter()
                    .map(|(name, url)| (name.to_string(), url.to_string()))
                    .collect(),
                failing: HashSet::new(),
                presses: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ObsAudioControl for MockObs {
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
    impl ObsSourceControl for MockObs {
        async fn list_inputs(&self, input_kind: Option<&str>) -> ObsResult<Vec<InputInfo>> {
            Ok(self
                .inputs
                .iter()
                .filter(|i| input_kind.map_or(true, |kind| i.input_kind == kind))
                .cloned()
                .collect())
        }

        async fn input_kinds(&self) -> ObsResult<Vec<String>> {
            Ok(self.kinds.clone())
        }

        async fn list_scenes(&self) -> ObsResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn input_settings(&self, input_name: &str) -> ObsResult<InputSettingsResponse> {
            Ok(InputSettingsResponse {
                input_settings: json!({"url": self.urls.get(input_name).cloned().unwrap_or_default()}),
                input_kind: "browser_source".to_string(),
            })
        }

        async fn press_properties_button(
            &self,
            input_name: &str,
            property_name: &str,
        ) -> ObsResult<()> {
            assert_eq!(property_name, "refreshnocache");
            if self.failing.contains(input_name) {
                return Err(ObsError::RequestFailed {
                    request_type: "PressInputPropertiesButton".to_string(),
                    code: 600,
                    comment: "source is broken".to_string(),
                });
            }
            self.presses.lock().push(input_name.to_string());
            Ok(())
        }
    }

    struct Fixture {
        coordinator: OverlayRefreshCoordinator,
        mock: Arc<MockObs>,
        recorder: Arc<Recorder>,
        state: Arc<ObsState>,
    }

    fn fixture(mock: MockObs) -> Fixture {
        let mock = Arc::new(mock);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let state = Arc::new(ObsState::default());
        let coordinator =
            OverlayRefreshCoordinator::new(mock.clone(), state.clone(), recorder.clone());
        Fixture {
            coordinator,
            mock,
            recorder,
            state,
        }
    }

    #[test]
    fn classification_matches_name_url_and_overlay_file() {
        assert_eq!(classify("Mood Overlay", ""), Some("mood".to_string()));
        assert_eq!(classify("MUSIC Display", ""), Some("music".to_string()));
        assert_eq!(
            classify("Widget", "https://host/now_song.html"),
            Some("song".to_string())
        );
        assert_eq!(
            classify("Player", "file:///overlays/mooddeck_overlay.html?v=2"),
            Some("mooddeck_overlay.html".to_string())
        );
        assert_eq!(classify("Chat", "https://chat.example"), None);
    }

    #[tokio::test]
    async fn discover_classifies_and_replaces_the_source_list() {
        let f = fixture(MockObs::browser(&[
            ("Mood Overlay", ""),
            ("Chat", "https://chat.example"),
            ("Widget", "https://host/music_bar"),
        ]));
        // Leftover from an earlier session
        f.state.browser_sources.write().push(BrowserSourceRecord {
            name: "Stale".into(),
            url: String::new(),
            keyword: None,
        });

        let candidates = f.coordinator.discover().await.unwrap();

        assert_eq!(candidates, 2);
        let sources = f.state.browser_sources.read();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].keyword.as_deref(), Some("mood"));
        assert_eq!(sources[0].url, "");
        assert_eq!(sources[1].keyword, None);
        // The URL is kept even for sources that are not candidates
        assert_eq!(sources[1].url, "https://chat.example");
        assert_eq!(sources[2].keyword.as_deref(), Some("music"));
        assert_eq!(sources[2].url, "https://host/music_bar");
    }

    #[tokio::test]
    async fn discover_handles_missing_browser_kind() {
        let mut mock = MockObs::browser(&[]);
        mock.kinds = vec!["ffmpeg_source".to_string()];
        let f = fixture(mock);
        f.state.browser_sources.write().push(BrowserSourceRecord {
            name: "Stale".into(),
            url: String::new(),
            keyword: Some("mood".into()),
        });

        assert_eq!(f.coordinator.discover().await.unwrap(), 0);
        assert!(f.state.browser_sources.read().is_empty());
    }

    #[tokio::test]
    async fn refresh_for_song_sweeps_once_per_song() {
        let f = fixture(MockObs::browser(&[
            ("Mood Overlay", ""),
            ("Chat", "https://chat.example"),
        ]));
        f.coordinator.discover().await.unwrap();

        assert!(f.coordinator.refresh_for_song("song-a").await);
        assert!(!f.coordinator.refresh_for_song("song-a").await);
        assert_eq!(f.mock.presses.lock().len(), 1);

        assert!(f.coordinator.refresh_for_song("song-b").await);
        assert_eq!(f.mock.presses.lock().len(), 2);
        // Only the candidate is swept, never the chat source
        assert!(f.mock.presses.lock().iter().all(|p| p == "Mood Overlay"));

        let events = f.recorder.0.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            DisplayEvent::OverlayRefreshed { song_id, refreshed: 1, .. } if song_id == "song-a"
        ));
    }

    #[tokio::test]
    async fn empty_song_id_never_sweeps() {
        let f = fixture(MockObs::browser(&[("Mood Overlay", "")]));
        f.coordinator.discover().await.unwrap();

        assert!(!f.coordinator.refresh_for_song("").await);
        assert!(f.mock.presses.lock().is_empty());
        assert!(f.recorder.0.lock().is_empty());
    }

    #[tokio::test]
    async fn refresh_continues_past_individual_failures() {
        let mut mock = MockObs::browser(&[("Mood Overlay", ""), ("Song Ticker", "")]);
        mock.failing.insert("Mood Overlay".to_string());
        let f = fixture(mock);
        f.coordinator.discover().await.unwrap();

        assert!(f.coordinator.refresh_for_song("song-a").await);
        assert_eq!(*f.mock.presses.lock(), ["Song Ticker"]);
        assert!(matches!(
            f.recorder.0.lock().last().unwrap(),
            DisplayEvent::OverlayRefreshed { refreshed: 1, .. }
        ));
    }

    #[tokio::test]
    async fn full_refresh_includes_unclassified_sources() {
        let f = fixture(MockObs::browser(&[
            ("Mood Overlay", ""),
            ("Chat", "https://chat.example"),
        ]));
        f.coordinator.discover().await.unwrap();

        assert_eq!(f.coordinator.refresh(false).await, 2);
        assert_eq!(f.mock.presses.lock().len(), 2);
    }
}
