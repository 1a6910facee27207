use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read `{key}`: {message}")]
    Read { key: String, message: String },
    #[error("failed to write `{key}`: {message}")]
    Write { key: String, message: String },
    #[error("failed to encode `{key}`: {message}")]
    Encode { key: String, message: String },
}

/// String key/value persistence shared by the session store and navigation hints.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Rc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RefCell<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

/// Small values that carry context from one screen to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationHint {
    EditUserId,
    EditGroupId,
    GroupName,
    ForceChangePass,
}

impl NavigationHint {
    pub const ALL: [Self; 4] = [
        Self::EditUserId,
        Self::EditGroupId,
        Self::GroupName,
        Self::ForceChangePass,
    ];

    #[must_use]
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::EditUserId => "editUserId",
            Self::EditGroupId => "editGroupId",
            Self::GroupName => "groupName",
            Self::ForceChangePass => "ForceChangePass",
        }
    }
}

pub struct NavigationHints {
    storage: Rc<dyn KeyValueStore>,
}

impl NavigationHints {
    pub fn new(storage: Rc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Read failures are logged and reported as a missing hint.
    pub fn get(&self, hint: NavigationHint) -> Option<String> {
        match self.storage.get_item(hint.storage_key()) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(error = %error, key = hint.storage_key(), "navigation hint read failed");
                None
            }
        }
    }

    pub fn set(&self, hint: NavigationHint, value: &str) -> Result<(), StorageError> {
        self.storage.set_item(hint.storage_key(), value)
    }

    pub fn remove(&self, hint: NavigationHint) -> Result<(), StorageError> {
        self.storage.remove_item(hint.storage_key())
    }

    /// Set after a password change is requested for the signed-in user.
    pub fn force_change_pass(&self) -> bool {
        self.get(NavigationHint::ForceChangePass)
            .is_some_and(|value| value == "true")
    }

    pub fn clear_all(&self) -> Result<(), StorageError> {
        for hint in NavigationHint::ALL {
            self.remove(hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Read {
                key: key.to_string(),
                message: "quota".to_string(),
            })
        }

        fn set_item(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Write {
                key: key.to_string(),
                message: "quota".to_string(),
            })
        }

        fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("detached".to_string()))
        }
    }

    #[test]
    fn memory_store_overwrites_and_removes() {
        let store = MemoryStore::new();
        store.set_item("a", "1").expect("set");
        store.set_item("a", "2").expect("overwrite");
        assert_eq!(store.get_item("a").expect("get"), Some("2".to_string()));
        store.remove_item("a").expect("remove");
        store.remove_item("a").expect("remove twice");
        assert!(store.is_empty());
    }

    #[test]
    fn hints_use_fixed_keys_in_shared_storage() {
        let storage = Rc::new(MemoryStore::new());
        let hints = NavigationHints::new(storage.clone());
        hints.set(NavigationHint::EditUserId, "42").expect("set");
        hints
            .set(NavigationHint::ForceChangePass, "true")
            .expect("set");

        assert_eq!(
            storage.get_item("editUserId").expect("get"),
            Some("42".to_string())
        );
        assert!(hints.force_change_pass());

        hints.clear_all().expect("clear");
        assert_eq!(hints.get(NavigationHint::EditUserId), None);
        assert!(!hints.force_change_pass());
    }

    #[test]
    fn unreadable_hint_is_reported_missing() {
        let hints = NavigationHints::new(Rc::new(BrokenStore));
        assert_eq!(hints.get(NavigationHint::GroupName), None);
        assert!(hints.set(NavigationHint::GroupName, "ops").is_err());
    }
}
