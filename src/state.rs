//! State persistence (C7): atomic save/load/resume of the action queue and
//! the cloned-SHA snapshot (spec.md §6 "Persisted state").
//!
//! Unlike the teacher's `plan_store.rs` (whose `save_plan` writes via a
//! plain `fs::write` despite its own doc comment claiming atomicity), this
//! writes a tempfile in the same directory and renames it into place, so a
//! crash mid-write never leaves a half-written state file behind.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action::Action;

pub const STATE_FILE_NAME: &str = ".gic-state.json";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Everything that survives a restart (spec.md §6 "Contents").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedState {
    pub actions: Vec<Action>,
    pub current_action: i64,
    pub interrupted: bool,
    pub origin2cloned: HashMap<String, String>,
}

/// Abstracts over where/how state is persisted, mirroring the teacher's
/// `PlanStore` trait.
pub trait StateStore {
    fn load(&self) -> Result<Option<SavedState>, StateError>;
    fn save(&self, state: &SavedState) -> Result<(), StateError>;
    fn clear(&self) -> Result<(), StateError>;
}

/// Filesystem-backed state store using a single `.gic-state.json` file in
/// the launch directory.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE_NAME),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<SavedState>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) => return Err(StateError::Io(e)),
        };
        match serde_json::from_str(&text) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // spec.md §7: state-file corruption is reported, never fatal.
                log::warn!("ignoring corrupt state file {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }

    fn save(&self, state: &SavedState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StateError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut origin2cloned = HashMap::new();
        origin2cloned.insert("aaa".to_string(), "bbb".to_string());

        let state = SavedState {
            actions: vec![Action::Interrupt { reason: "paused".into() }],
            current_action: 3,
            interrupted: true,
            origin2cloned,
        };

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.current_action, 3);
        assert!(loaded.interrupted);
        assert_eq!(loaded.origin2cloned.get("aaa"), Some(&"bbb".to_string()));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn missing_file_reports_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_no_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), b"not json").unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }
}
