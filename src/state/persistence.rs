//! State Persistence Backends
//!
//! This module provides the storage backends for applied state:
//! - JSON file (default; written atomically through a temp file + rename)
//! - In-memory (for testing)

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use super::{AppliedState, StateError, StateResult, STATE_VERSION};

/// Trait for state persistence implementations
pub trait StatePersistence: Send + Sync {
    /// Load the stored state, if any.
    fn load(&self) -> StateResult<Option<AppliedState>>;

    /// Replace the stored state.
    fn save(&self, state: &AppliedState) -> StateResult<()>;

    /// Human-readable location, for messages.
    fn location(&self) -> String;
}

// ============================================================================
// JSON Persistence Backend
// ============================================================================

/// JSON file-based persistence backend
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatePersistence for JsonStateFile {
    fn load(&self) -> StateResult<Option<AppliedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&self.path)?;
        let state: AppliedState = serde_json::from_reader(BufReader::new(file))?;
        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }
        debug!(path = %self.path.display(), serial = state.serial, "loaded state");
        Ok(Some(state))
    }

    fn save(&self, state: &AppliedState) -> StateResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StateError::Persistence(format!("{}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), serial = state.serial, "saved state");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// In-Memory Persistence Backend (for testing)
// ============================================================================

/// In-memory persistence backend
#[derive(Debug, Default)]
pub struct MemoryState {
    state: RwLock<Option<AppliedState>>,
    saves: RwLock<usize>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with an existing state.
    pub fn with_state(state: AppliedState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
            saves: RwLock::new(0),
        }
    }

    /// Snapshot of the stored state.
    pub fn snapshot(&self) -> Option<AppliedState> {
        self.state.read().clone()
    }

    /// Number of saves performed.
    pub fn save_count(&self) -> usize {
        *self.saves.read()
    }
}

impl StatePersistence for MemoryState {
    fn load(&self) -> StateResult<Option<AppliedState>> {
        Ok(self.state.read().clone())
    }

    fn save(&self, state: &AppliedState) -> StateResult<()> {
        *self.state.write() = Some(state.clone());
        *self.saves.write() += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_persistence() {
        let persistence = MemoryState::new();
        assert!(persistence.load().unwrap().is_none());

        let state = AppliedState::new();
        persistence.save(&state).unwrap();

        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded.lineage, state.lineage);
        assert_eq!(persistence.save_count(), 1);
    }

    #[test]
    fn test_json_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("vulnstack.tfstate.json");
        let persistence = JsonStateFile::new(&path);

        assert!(persistence.load().unwrap().is_none());

        let mut state = AppliedState::new();
        state.bump_serial();
        state.outputs.insert("db_connection_command".into(), "psql".into());
        persistence.save(&state).unwrap();

        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded, state);

        // No temp files are left next to the state.
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_newer_version_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        let mut state = AppliedState::new();
        state.version = STATE_VERSION + 1;
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let err = JsonStateFile::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonStateFile::new(&path).load(),
            Err(StateError::Serialization(_))
        ));
    }
}
