// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings documents kept as `<key>.json` files in a directory.

use directories::ProjectDirs;
use quilt_app_core::config::{ConfigError, SettingsStore};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A [`SettingsStore`] backed by one directory.
pub struct SettingsDir {
    root: PathBuf,
}

impl SettingsDir {
    /// The platform config directory for Quilt (e.g. `~/.config/quilt`).
    pub fn platform() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("dev", "flyingrobots", "Quilt")
            .ok_or_else(|| ConfigError::Unavailable("no home directory".into()))?;
        Self::at(dirs.config_dir())
    }

    /// `root`, created when missing.
    pub fn at(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| ConfigError::Io { key: root.display().to_string(), source })?;
        Ok(Self { root })
    }

    /// Directory holding the documents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl SettingsStore for SettingsDir {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        match fs::read(self.file(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::Io { key: key.to_owned(), source }),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError> {
        fs::write(self.file(key), bytes).map_err(|source| ConfigError::Io { key: key.to_owned(), source })
    }
}
