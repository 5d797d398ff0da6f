//! Versioned calibration state shared between runs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{calibrate, CalibrationFrame, CalibrationResult, ReferenceObject};
use crate::error::{VolumeError, VolumeResult};

/// What gets written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCalibration {
    /// Bumped on every replace or reset.
    pub version: u64,
    pub result: CalibrationResult,
}

/// Backing storage for a [`CalibrationStore`].
pub trait CalibrationPersistence: Send + Sync {
    /// The saved state, or `None` when nothing was saved.
    fn load(&self) -> VolumeResult<Option<StoredCalibration>>;

    fn save(&self, stored: &StoredCalibration) -> VolumeResult<()>;

    fn clear(&self) -> VolumeResult<()>;
}

/// Keeps the state in memory only.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    slot: Mutex<Option<StoredCalibration>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationPersistence for MemoryPersistence {
    fn load(&self) -> VolumeResult<Option<StoredCalibration>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, stored: &StoredCalibration) -> VolumeResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(stored.clone());
        Ok(())
    }

    fn clear(&self) -> VolumeResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// A pretty-printed JSON file. Writes go through a sibling temp file and a
/// rename so a crash never leaves a half-written state behind.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CalibrationPersistence for JsonFilePersistence {
    fn load(&self) -> VolumeResult<Option<StoredCalibration>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VolumeError::persistence_read(&self.path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| VolumeError::persistence_format(&self.path, e.to_string()))
    }

    fn save(&self, stored: &StoredCalibration) -> VolumeResult<()> {
        let json = serde_json::to_string_pretty(stored)
            .map_err(|e| VolumeError::persistence_format(&self.path, e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| VolumeError::persistence_write(parent, e))?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, json).map_err(|e| VolumeError::persistence_write(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| VolumeError::persistence_write(&self.path, e))?;
        debug!(path = %self.path.display(), version = stored.version, "Calibration saved");
        Ok(())
    }

    fn clear(&self) -> VolumeResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VolumeError::persistence_write(&self.path, e)),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    version: u64,
    current: Option<CalibrationResult>,
}

/// Cloneable handle to the current calibration.
///
/// Loaded once at startup, replaced by each successful calibration and
/// cleared only by an explicit [`reset`](Self::reset). Clones share state.
#[derive(Clone)]
pub struct CalibrationStore {
    state: Arc<RwLock<StoreState>>,
    persistence: Arc<dyn CalibrationPersistence>,
}

impl std::fmt::Debug for CalibrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CalibrationStore")
            .field("version", &state.version)
            .field("current", &state.current)
            .finish_non_exhaustive()
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CalibrationStore {
    /// Empty store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::default(),
            persistence: Arc::new(MemoryPersistence::new()),
        }
    }

    /// Open a store, reading whatever `persistence` holds.
    pub fn load(persistence: Arc<dyn CalibrationPersistence>) -> VolumeResult<Self> {
        let state = match persistence.load()? {
            Some(stored) => {
                info!(
                    version = stored.version,
                    reference = %stored.result.reference_id,
                    "Loaded calibration"
                );
                StoreState {
                    version: stored.version,
                    current: Some(stored.result),
                }
            }
            None => StoreState::default(),
        };
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            persistence,
        })
    }

    /// Shorthand for a JSON file store.
    pub fn open(path: impl Into<PathBuf>) -> VolumeResult<Self> {
        Self::load(Arc::new(JsonFilePersistence::new(path)))
    }

    pub fn current(&self) -> Option<CalibrationResult> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).version
    }

    /// The current calibration if it may be applied to a scan captured at
    /// `captured_at_ms`.
    pub fn applicable_for(&self, captured_at_ms: u64) -> Option<CalibrationResult> {
        self.current()
            .filter(|c| c.applies_to_capture(captured_at_ms))
    }

    /// Overwrite the current calibration and persist it. Returns the new
    /// version. On a persistence error the in-memory state is unchanged.
    pub fn replace(&self, result: CalibrationResult) -> VolumeResult<u64> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let stored = StoredCalibration {
            version: state.version + 1,
            result,
        };
        self.persistence.save(&stored)?;
        info!(
            version = stored.version,
            scale_factor = stored.result.scale_factor,
            "Calibration replaced"
        );
        state.version = stored.version;
        state.current = Some(stored.result);
        Ok(state.version)
    }

    /// Forget the current calibration.
    pub fn reset(&self) -> VolumeResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.persistence.clear()?;
        state.version += 1;
        state.current = None;
        info!(version = state.version, "Calibration reset");
        Ok(())
    }

    /// Run [`calibrate`] and store the result on success. A failed run
    /// leaves the stored state untouched.
    pub fn calibrate(
        &self,
        reference: &ReferenceObject,
        frames: &[CalibrationFrame],
    ) -> VolumeResult<CalibrationResult> {
        let result = calibrate(reference, frames)?;
        self.replace(result.clone())?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::{bar, frame};
    use crate::calibration::{calibrate_at, CaptureAngle};

    fn result_at(timestamp_ms: u64) -> CalibrationResult {
        calibrate_at(
            &bar(),
            &[
                frame(0.95, CaptureAngle::Frontal),
                frame(1.0, CaptureAngle::Left),
            ],
            timestamp_ms,
        )
        .unwrap()
    }

    #[test]
    fn test_replace_and_reset() {
        let store = CalibrationStore::in_memory();
        assert!(store.current().is_none());
        assert_eq!(store.replace(result_at(100)).unwrap(), 1);
        assert_eq!(store.current().unwrap().timestamp_ms, 100);

        let clone = store.clone();
        clone.replace(result_at(200)).unwrap();
        assert_eq!(store.version(), 2);
        assert_eq!(store.current().unwrap().timestamp_ms, 200);

        store.reset().unwrap();
        assert!(clone.current().is_none());
        assert_eq!(clone.version(), 3);
    }

    #[test]
    fn test_applicable_for() {
        let store = CalibrationStore::in_memory();
        store.replace(result_at(1_000)).unwrap();
        assert!(store.applicable_for(999).is_none());
        assert!(store.applicable_for(1_000).is_none());
        assert!(store.applicable_for(2_000).is_some());
    }

    #[test]
    fn test_failed_calibration_keeps_state() {
        let store = CalibrationStore::in_memory();
        store.replace(result_at(5)).unwrap();
        let err = store
            .calibrate(&bar(), &[frame(1.5, CaptureAngle::Frontal)])
            .unwrap_err();
        assert!(matches!(err, VolumeError::Calibration(_)));
        assert_eq!(store.version(), 1);
        assert_eq!(store.current().unwrap().timestamp_ms, 5);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("calibration.json");

        let store = CalibrationStore::open(&path).unwrap();
        assert!(store.current().is_none());
        store.replace(result_at(77)).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("nested").join("calibration.json.tmp").exists());

        let reopened = CalibrationStore::open(&path).unwrap();
        assert_eq!(reopened.version(), 1);
        assert_eq!(reopened.current(), Some(result_at(77)));

        reopened.reset().unwrap();
        assert!(!path.exists());
        assert!(CalibrationStore::open(&path).unwrap().current().is_none());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, "{ not json").unwrap();
        let err = CalibrationStore::open(&path).unwrap_err();
        assert!(matches!(err, VolumeError::PersistenceFormat { .. }));
    }
}
