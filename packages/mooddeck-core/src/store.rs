//! Persistence for user MIDI bindings.
//!
//! The user layer of the mapping table is stored as a single JSON object
//! (key → binding) in the app data directory. Writes replace the whole
//! file atomically (temp file + rename); partial updates are never
//! written. A process-wide lock serializes file operations so concurrent
//! set/remove calls cannot interleave load-modify-save cycles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::BridgeResult;
use crate::midi::mapping::Binding;

const MAPPINGS_FILE: &str = "midi_mappings.json";

/// Global mutex to serialize all mapping file operations.
static STORE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn store_lock() -> &'static Mutex<()> {
    STORE_LOCK.get_or_init(|| Mutex::new(()))
}

/// Storage backend for the user binding layer.
///
/// The whole layer is loaded and saved as one unit; implementations do not
/// support partial updates.
pub trait MappingRepository: Send + Sync {
    /// Loads all persisted user bindings.
    fn load(&self) -> BridgeResult<HashMap<String, Binding>>;
    /// Replaces the persisted user bindings with `bindings`.
    fn save(&self, bindings: &HashMap<String, Binding>) -> BridgeResult<()>;
}

/// File-backed repository under the app data directory.
pub struct JsonFileMappingRepository {
    path: PathBuf,
}

impl JsonFileMappingRepository {
    /// Creates a repository storing bindings in `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(MAPPINGS_FILE),
        }
    }

    /// Full path of the mappings file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MappingRepository for JsonFileMappingRepository {
    /// Returns the empty layer if the file doesn't exist or is invalid.
    ///
    /// A corrupt file is logged and treated as empty rather than blocking
    /// startup; the next save rewrites it.
    fn load(&self) -> BridgeResult<HashMap<String, Binding>> {
        let _guard = store_lock().lock();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return Ok(HashMap::new()),
        };
        match serde_json::from_str(&contents) {
            Ok(bindings) => Ok(bindings),
            Err(e) => {
                log::warn!(
                    "[MappingRepository] Ignoring unreadable mappings file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Uses atomic write (temp file + rename) to prevent corruption on crash.
    /// Creates the directory if it doesn't exist.
    fn save(&self, bindings: &HashMap<String, Binding>) -> BridgeResult<()> {
        let _guard = store_lock().lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(bindings)?;

        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// In-memory repository for tests and headless runs.
#[derive(Default)]
pub struct MemoryMappingRepository {
    bindings: Mutex<HashMap<String, Binding>>,
}

impl MappingRepository for MemoryMappingRepository {
    fn load(&self) -> BridgeResult<HashMap<String, Binding>> {
        Ok(self.bindings.lock().clone())
    }

    fn save(&self, bindings: &HashMap<String, Binding>) -> BridgeResult<()> {
        *self.bindings.lock() = bindings.clone();
        Ok(())
    }
}
