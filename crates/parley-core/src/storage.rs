//! Key/value persistence for client-side state.
//!
//! Each key is a JSON file inside one directory. The store is cheap to clone
//! and is shared by the session store, the model registry and the auth holder.

use crate::error::{ParleyError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const KEY_SESSIONS: &str = "chat_sessions";
pub const KEY_CURRENT_SESSION: &str = "current_session_id";
pub const KEY_MODELS_CACHE: &str = "models_cache";
pub const KEY_SELECTED_MODEL: &str = "selected_model";
pub const KEY_AUTH_SESSION: &str = "auth_session";
pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_MODEL_CONFIG: &str = "model_config";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads a value. Missing keys are `None`; unreadable blobs are logged and
    /// treated as missing so a corrupt cache never blocks start-up.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable local store entry");
                Ok(None)
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key)?;
        let content = serde_json::to_string(value)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear_keys(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ParleyError::Storage {
                key: key.to_string(),
                message: "invalid key".to_string(),
            });
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("state")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_dir, store) = store();
        let value: Option<String> = store.get(KEY_AUTH_TOKEN).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_set_get_remove() {
        let (_dir, store) = store();
        store.set(KEY_SELECTED_MODEL, "gpt-4o").unwrap();
        assert_eq!(store.get::<String>(KEY_SELECTED_MODEL).unwrap().as_deref(), Some("gpt-4o"));

        store.remove(KEY_SELECTED_MODEL).unwrap();
        assert!(store.get::<String>(KEY_SELECTED_MODEL).unwrap().is_none());
        // removing twice is fine
        store.remove(KEY_SELECTED_MODEL).unwrap();
    }

    #[test]
    fn test_corrupt_entry_is_treated_as_missing() {
        let (_dir, store) = store();
        fs::write(store.root().join("models_cache.json"), "{not json").unwrap();
        let value: Option<Vec<String>> = store.get(KEY_MODELS_CACHE).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let (_dir, store) = store();
        assert!(matches!(
            store.set("../escape", &1),
            Err(ParleyError::Storage { .. })
        ));
    }

    #[test]
    fn test_clear_keys() {
        let (_dir, store) = store();
        store.set(KEY_AUTH_TOKEN, "t").unwrap();
        store.set(KEY_MODEL_CONFIG, &serde_json::json!({"a": 1})).unwrap();
        store.clear_keys(&[KEY_AUTH_TOKEN, KEY_MODEL_CONFIG]).unwrap();
        assert!(store.get::<String>(KEY_AUTH_TOKEN).unwrap().is_none());
        assert!(store.get::<serde_json::Value>(KEY_MODEL_CONFIG).unwrap().is_none());
    }
}
