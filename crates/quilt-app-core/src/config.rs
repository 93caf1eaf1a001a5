// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted settings: a byte-store port with JSON documents layered on top.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Where settings documents live. Keys are logical names such as `gateway`.
pub trait SettingsStore {
    /// Bytes stored under `key`, or `None` when nothing was written yet.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError>;
    /// Replace the bytes stored under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError>;
}

impl<S: SettingsStore + ?Sized> SettingsStore for &S {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError> {
        (**self).write(key, bytes)
    }
}

/// Failures reading or writing a settings document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The backing store could not be read or written.
    #[error("settings `{key}`: {source}")]
    Io {
        /// Document key.
        key: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The stored document is not valid JSON for the requested type.
    #[error("settings `{key}` are malformed: {source}")]
    Malformed {
        /// Document key.
        key: String,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
    /// No location is available to keep settings in.
    #[error("no settings location: {0}")]
    Unavailable(String),
}

/// Typed access to the JSON documents of a [`SettingsStore`].
pub struct Settings<S> {
    store: S,
}

impl<S: SettingsStore> Settings<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The document under `key`; an absent or empty document reads as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.store.read(key)? {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| ConfigError::Malformed { key: key.to_owned(), source }),
            _ => Ok(None),
        }
    }

    /// Write `value` as the document under `key`.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| ConfigError::Malformed { key: key.to_owned(), source })?;
        self.store.write(key, &bytes)
    }

    /// The document under `key`, seeding the store with `T::default()` when absent.
    ///
    /// A failed seed is logged and the defaults are still returned.
    pub fn get_or_seed<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = T::default();
        match self.put(key, &value) {
            Ok(()) => debug!(key, "seeded default settings"),
            Err(err) => warn!(key, error = %err, "could not seed default settings"),
        }
        Ok(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::settings::GatewaySettings;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        docs: RefCell<HashMap<String, Vec<u8>>>,
        read_only: bool,
    }

    impl SettingsStore for MemoryStore {
        fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
            Ok(self.docs.borrow().get(key).cloned())
        }

        fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError> {
            if self.read_only {
                return Err(ConfigError::Io {
                    key: key.to_owned(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            self.docs.borrow_mut().insert(key.to_owned(), bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn absent_and_empty_documents_read_as_none() {
        let store = MemoryStore::default();
        assert!(Settings::new(&store).get::<GatewaySettings>("gateway").unwrap().is_none());
        store.write("gateway", b"").unwrap();
        assert!(Settings::new(&store).get::<GatewaySettings>("gateway").unwrap().is_none());
    }

    #[test]
    fn first_read_seeds_defaults() {
        let store = MemoryStore::default();
        let first: GatewaySettings = Settings::new(&store).get_or_seed("gateway").unwrap();
        assert_eq!(first, GatewaySettings::default());
        assert!(store.docs.borrow().contains_key("gateway"));
    }

    #[test]
    fn read_only_store_still_yields_defaults() {
        let store = MemoryStore { read_only: true, ..MemoryStore::default() };
        let settings: GatewaySettings = Settings::new(&store).get_or_seed("gateway").unwrap();
        assert_eq!(settings, GatewaySettings::default());
        assert!(store.docs.borrow().is_empty());
    }

    #[test]
    fn stored_scope_wins_over_defaults() {
        let store = MemoryStore::default();
        let settings = Settings::new(&store);
        let mut custom = GatewaySettings::default();
        custom.scope = "staging".into();
        settings.put("gateway", &custom).unwrap();
        let loaded: GatewaySettings = settings.get_or_seed("gateway").unwrap();
        assert_eq!(loaded.scope, "staging");
    }

    #[test]
    fn malformed_documents_name_their_key() {
        let store = MemoryStore::default();
        store.write("gateway", b"{ not json").unwrap();
        let err = Settings::new(&store).get_or_seed::<GatewaySettings>("gateway").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { ref key, .. } if key == "gateway"));
    }
}
