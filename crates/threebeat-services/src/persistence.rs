//! JSON file snapshot store

use std::fs;
use std::path::{Path, PathBuf};

use threebeat_core::{SequencerState, SnapshotStore, StoreError};
use tracing::debug;

const APP_DIR: &str = "threebeat";
const STATE_FILE: &str = "state.json";

/// Keeps the whole sequencer state as pretty-printed JSON in one file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/threebeat/state.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR).join(STATE_FILE))
    }

    pub fn at_default_location() -> Result<Self, StoreError> {
        Self::default_path()
            .map(Self::new)
            .ok_or_else(|| StoreError::Unavailable("no data directory on this platform".into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<SequencerState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&text)?;
        debug!(path = %self.path.display(), "Snapshot loaded");
        Ok(Some(state))
    }

    fn save(&mut self, state: &SequencerState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use threebeat_core::PatternModel;

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");
        let mut store = JsonFileStore::new(&path);
        let mut state = SequencerState::default();
        state.bpm = 98;
        store.save(&state).unwrap();
        assert!(path.exists());
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_persisted_format_uses_sequencer_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = JsonFileStore::new(&path);
        store.save(&SequencerState::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["sequencers"].is_array());
        assert!(json["barMultiplier"].is_number());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_model_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut model = PatternModel::new(SequencerState::default())
            .with_store(Box::new(JsonFileStore::new(&path)));
        model.toggle_step("sequencer2", 1);
        model.set_tempo(150);

        let mut restored = PatternModel::new(SequencerState::default())
            .with_store(Box::new(JsonFileStore::new(&path)));
        restored.load_from_store();
        assert_eq!(restored.state().bpm, 150);
        assert_eq!(restored.state().voices[1].pattern, vec![false, true, false]);
    }
}
