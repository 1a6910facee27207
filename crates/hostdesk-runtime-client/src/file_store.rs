use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hostdesk_client_core::{KeyValueStore, StorageError};

/// Key/value store backed by one JSON object file, rewritten on every change.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(error) => {
                return Err(StorageError::Read {
                    key: key.to_string(),
                    message: format!("{}: {error}", self.path.display()),
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|error| StorageError::Read {
            key: key.to_string(),
            message: format!("{}: {error}", self.path.display()),
        })
    }

    fn save(&self, key: &str, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let write_error = |message: String| StorageError::Write {
            key: key.to_string(),
            message,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|error| write_error(format!("{}: {error}", parent.display())))?;
            }
        }
        let encoded = serde_json::to_vec_pretty(items).map_err(|error| StorageError::Encode {
            key: key.to_string(),
            message: error.to_string(),
        })?;
        std::fs::write(&self.path, encoded)
            .map_err(|error| write_error(format!("{}: {error}", self.path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|error| write_error(format!("{}: {error}", self.path.display())))?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load(key)?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.load(key)?;
        items.insert(key.to_string(), value.to_string());
        self.save(key, &items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.load(key)?;
        if items.remove(key).is_none() {
            return Ok(());
        }
        self.save(key, &items)
    }
}
