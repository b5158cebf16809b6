use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::write_atomic;

const REGISTRY_FILE: &str = "handles.toml";

/// Registry entry holding the linked board file.
pub const BOARD_FILE_ENTRY: &str = "board-file";

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("failed to write handle registry: {0}")]
    Write(String),
}

/// Capability to read and write one user-selected file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied(String),
    /// The file behind the handle no longer exists.
    Stale,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    /// Asks again for read/write access; grants may be withdrawn between
    /// sessions, so a stored handle is never trusted blindly.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn request_permission(&self) -> Permission {
        let result = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await;
        match result {
            Ok(_) => Permission::Granted,
            Err(err) if err.kind() == ErrorKind::NotFound => Permission::Stale,
            Err(err) => Permission::Denied(err.to_string()),
        }
    }

    pub async fn read(&self) -> std::io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    handles: BTreeMap<String, FileHandle>,
}

/// Remembers linked files across sessions (the handle, not the content).
#[derive(Debug, Clone)]
pub struct HandleRegistry {
    path: PathBuf,
}

impl HandleRegistry {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(REGISTRY_FILE),
        }
    }

    fn load(&self) -> Result<RegistryFile, HandleError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, registry: &RegistryFile) -> Result<(), HandleError> {
        let text = toml::to_string(registry)?;
        write_atomic(&self.path, &text).map_err(|err| HandleError::Write(format!("{err:#}")))
    }

    pub fn stored(&self) -> Result<Option<FileHandle>, HandleError> {
        Ok(self.load()?.handles.remove(BOARD_FILE_ENTRY))
    }

    #[tracing::instrument(skip(self, handle), fields(path = %handle.path.display()))]
    pub fn remember(&self, handle: &FileHandle) -> Result<(), HandleError> {
        let mut registry = self.load()?;
        registry
            .handles
            .insert(BOARD_FILE_ENTRY.to_string(), handle.clone());
        self.save(&registry)?;
        info!(name = %handle.name, "remembered linked file");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn forget(&self) -> Result<(), HandleError> {
        let mut registry = self.load()?;
        if registry.handles.remove(BOARD_FILE_ENTRY).is_some() {
            self.save(&registry)?;
            info!("forgot linked file");
        }
        Ok(())
    }

    /// Re-establishes the stored link when permission is granted again.
    /// Every failure means "no link", never an error.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self) -> Option<FileHandle> {
        let handle = match self.stored() {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!("no linked file to restore");
                return None;
            }
            Err(err) => {
                debug!(error = %err, "handle registry unreadable; running without linked file");
                return None;
            }
        };

        match handle.request_permission().await {
            Permission::Granted => {
                info!(name = %handle.name, "restored linked file");
                Some(handle)
            }
            Permission::Denied(reason) => {
                debug!(name = %handle.name, reason = %reason, "permission denied; running without linked file");
                None
            }
            Permission::Stale => {
                debug!(name = %handle.name, "linked file is gone; running without it");
                None
            }
        }
    }
}
