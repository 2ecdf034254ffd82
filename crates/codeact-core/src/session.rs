//! Caller-owned variable store carried across evaluations.
//!
//! A [`SessionState`] seeds a snippet's globals before it runs and is
//! replaced by the portable globals after a successful run, so names the
//! snippet deleted or rebound to something unportable are dropped. Failed
//! runs leave it untouched. It serialises to JSON so a host can keep it between processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persisted variables, by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    variables: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }

    pub fn clear(&mut self) {
        self.variables.clear();
    }

    /// Take the portable globals of a finished run. Names missing from
    /// `globals` are removed.
    pub fn replace(&mut self, globals: BTreeMap<String, Value>) {
        self.variables = globals;
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a session file. A missing file is an empty session.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(SessionError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_replace_overwrites_and_drops() {
        let mut state = SessionState::new();
        state.insert("a", Value::Int(1));
        state.insert("b", Value::Int(2));
        state.replace(BTreeMap::from([("b".to_string(), Value::Int(20))]));
        assert_eq!(state.get("a"), None);
        assert_eq!(state.get("b"), Some(&Value::Int(20)));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut state = SessionState::new();
        state.insert("names", Value::List(vec![Value::from("x"), Value::None]));
        state.save(&path).unwrap();

        let loaded = SessionState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_missing_file_is_empty_session() {
        let dir = tempdir().unwrap();
        let state = SessionState::load(&dir.path().join("absent.json")).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SessionState::load(&path),
            Err(SessionError::Serde(_))
        ));
    }
}
