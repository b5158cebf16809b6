use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Key the board lives under in the local cache.
pub const BOARD_KEY: &str = "kanban-data";

/// Directory-backed key/value store; one file per key, replaced atomically.
#[derive(Debug, Clone)]
pub struct LocalCache {
    pub data_dir: PathBuf,
}

impl LocalCache {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened local cache");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        validate_key(key)?;
        Ok(self.data_dir.join(format!("{key}.json")))
    }

    #[tracing::instrument(skip(self))]
    pub fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(file = %path.display(), bytes = text.len(), "cache hit");
                Ok(Some(text))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(file = %path.display(), "cache miss");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    pub fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value).with_context(|| format!("failed to save {key}"))
    }
}

fn validate_key(key: &str) -> anyhow::Result<()> {
    if key.is_empty()
        || !key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(anyhow!("invalid cache key {key:?} (must match [a-z0-9-]+)"));
    }
    Ok(())
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// see either the old file or the new one.
#[tracing::instrument(skip(contents), fields(bytes = contents.len()))]
pub fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), "writing atomically");

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
