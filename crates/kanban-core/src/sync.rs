//! Keeps the board durable in two places: the local cache, written on every
//! change before control returns, and an optional linked file, written after
//! a quiet period so bursts of edits collapse into one write.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{BOARD_KEY, LocalCache, write_atomic};
use crate::format::{self, FormatError};
use crate::handle::{FileHandle, HandleError, HandleRegistry, Permission};
use crate::sort::SortRule;
use crate::store::BoardState;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no file linked")]
    NoFileLinked,
    #[error("permission denied for {name}: {reason}")]
    PermissionDenied { name: String, reason: String },
    #[error("{0} no longer exists")]
    Stale(String),
    #[error("failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{name} does not contain a board: {source}")]
    Format {
        name: String,
        #[source]
        source: FormatError,
    },
    #[error("failed to write {name}: {reason}")]
    Write { name: String, reason: String },
    #[error("local cache: {0:#}")]
    Cache(anyhow::Error),
    #[error(transparent)]
    Registry(#[from] HandleError),
}

/// What the file indicator shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    NoFileLinked,
    Linked { name: String },
    Unsaved { name: String },
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFileLinked => f.write_str("No file linked"),
            Self::Linked { name } => write!(f, "✓ {name}"),
            Self::Unsaved { name } => write!(f, "● {name} (unsaved)"),
        }
    }
}

/// Where the startup board came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Cache,
    LinkedFile,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub state: BoardState,
    pub source: LoadSource,
    /// Non-fatal problem worth telling the user about.
    pub notice: Option<String>,
}

#[derive(Debug, Default)]
struct Shared {
    dirty: bool,
    /// Bumped on every change; a write only clears `dirty` if nothing newer
    /// arrived while it was in flight.
    generation: u64,
    last_error: Option<String>,
    file_writes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Waiting,
    Fired,
    Cancelled,
}

/// The single debounced write that may be outstanding.
#[derive(Debug)]
struct PendingWrite {
    slot: Arc<Mutex<SlotState>>,
    text: String,
    generation: u64,
    task: JoinHandle<()>,
}

impl PendingWrite {
    /// Stops the timer if it has not fired yet. A write already under way
    /// is left to finish.
    fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if *slot == SlotState::Waiting {
            *slot = SlotState::Cancelled;
            self.task.abort();
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub struct Synchronizer {
    cache: LocalCache,
    registry: HandleRegistry,
    handle: Option<FileHandle>,
    debounce: Duration,
    shared: Arc<Mutex<Shared>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    pending: Option<PendingWrite>,
}

impl Synchronizer {
    pub fn new(cache: LocalCache, registry: HandleRegistry, debounce: Duration) -> Self {
        Self {
            cache,
            registry,
            handle: None,
            debounce,
            shared: Arc::new(Mutex::new(Shared::default())),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            pending: None,
        }
    }

    pub fn handle(&self) -> Option<&FileHandle> {
        self.handle.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.lock().dirty
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Completed writes to the linked file in this session.
    pub fn file_writes(&self) -> u64 {
        self.shared.lock().file_writes
    }

    pub fn status(&self) -> FileStatus {
        match &self.handle {
            None => FileStatus::NoFileLinked,
            Some(handle) if self.is_dirty() => FileStatus::Unsaved {
                name: handle.name.clone(),
            },
            Some(handle) => FileStatus::Linked {
                name: handle.name.clone(),
            },
        }
    }

    /// Startup load: the local cache wins; a restored linked file is only
    /// read when the cache is empty.
    #[tracing::instrument(skip(self, default_rules))]
    pub async fn startup(&mut self, default_rules: &[SortRule]) -> LoadOutcome {
        self.handle = self.registry.restore().await;

        let cached = match self.cache.get(BOARD_KEY) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "local cache unreadable");
                return empty_outcome(default_rules, Some(format!("Could not read saved board: {err:#}")));
            }
        };

        if let Some(text) = cached {
            return match format::decode(&text, default_rules) {
                Ok(state) => {
                    info!(tasks = state.tasks.len(), "loaded board from local cache");
                    LoadOutcome {
                        state,
                        source: LoadSource::Cache,
                        notice: None,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "cached board is malformed; starting empty");
                    empty_outcome(default_rules, Some(format!("Saved board was unreadable: {err}")))
                }
            };
        }

        let Some(handle) = self.handle.clone() else {
            debug!("nothing cached and no linked file; starting empty");
            return empty_outcome(default_rules, None);
        };

        match read_board(&handle, default_rules).await {
            Ok(state) => {
                info!(name = %handle.name, tasks = state.tasks.len(), "loaded board from linked file");
                if let Err(err) = self.write_cache(&state) {
                    warn!(error = %err, "failed to seed local cache");
                }
                LoadOutcome {
                    state,
                    source: LoadSource::LinkedFile,
                    notice: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "linked file unusable at startup; starting empty");
                empty_outcome(default_rules, Some(err.to_string()))
            }
        }
    }

    fn write_cache(&self, state: &BoardState) -> Result<String, SyncError> {
        let text = format::encode(state).map_err(|err| SyncError::Cache(err.into()))?;
        self.cache.set(BOARD_KEY, &text).map_err(SyncError::Cache)?;
        Ok(text)
    }

    /// Records a change: the cache is written now, the linked file after the
    /// debounce delay. Returns the cache error, if any; the debounced write
    /// is scheduled regardless.
    #[tracing::instrument(skip_all)]
    pub fn mark_dirty(&mut self, state: &BoardState) -> Result<(), SyncError> {
        let generation = {
            let mut shared = self.shared.lock();
            shared.dirty = true;
            shared.generation += 1;
            shared.generation
        };

        let (text, cache_result) = match self.write_cache(state) {
            Ok(text) => (Some(text), Ok(())),
            Err(err) => (None, Err(err)),
        };

        if self.handle.is_some() {
            let text = match text {
                Some(text) => Some(text),
                None => format::encode(state).ok(),
            };
            if let Some(text) = text {
                self.schedule(text, generation);
            }
        }

        cache_result
    }

    fn schedule(&mut self, text: String, generation: u64) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        if let Some(previous) = self.pending.take()
            && previous.cancel()
        {
            debug!(superseded = previous.generation, "debounce restarted");
        }

        let slot = Arc::new(Mutex::new(SlotState::Waiting));
        let delay = self.debounce;
        let task = {
            let slot = Arc::clone(&slot);
            let text = text.clone();
            let shared = Arc::clone(&self.shared);
            let write_lock = Arc::clone(&self.write_lock);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut state = slot.lock();
                    if *state != SlotState::Waiting {
                        return;
                    }
                    *state = SlotState::Fired;
                }
                debug!(generation, "debounce elapsed; writing linked file");
                // Failures are recorded in `shared` for the status indicator.
                let _ = write_file(&handle, text, generation, &shared, &write_lock).await;
            })
        };

        self.pending = Some(PendingWrite {
            slot,
            text,
            generation,
            task,
        });
    }

    /// Waits for an outstanding debounced write, running it immediately if
    /// its timer has not fired yet.
    #[tracing::instrument(skip(self))]
    pub async fn flush(&mut self) -> Result<(), SyncError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        if pending.cancel() {
            let Some(handle) = self.handle.clone() else {
                return Ok(());
            };
            return write_file(&handle, pending.text, pending.generation, &self.shared, &self.write_lock)
                .await;
        }
        if let Err(err) = pending.task.await {
            warn!(error = %err, "debounced write task ended abnormally");
        }
        match self.last_error() {
            Some(reason) if self.is_dirty() => Err(SyncError::Write {
                name: self.handle.as_ref().map(|h| h.name.clone()).unwrap_or_default(),
                reason,
            }),
            _ => Ok(()),
        }
    }

    /// Explicit save: skips the debounce and writes the linked file now.
    #[tracing::instrument(skip_all)]
    pub async fn save_now(&mut self, state: &BoardState) -> Result<(), SyncError> {
        let Some(handle) = self.handle.clone() else {
            return Err(SyncError::NoFileLinked);
        };
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        let text = format::encode(state).map_err(|err| SyncError::Write {
            name: handle.name.clone(),
            reason: err.to_string(),
        })?;
        let generation = self.shared.lock().generation;
        write_file(&handle, text, generation, &self.shared, &self.write_lock).await
    }

    /// Links `handle` as the board file and writes the board into it.
    #[tracing::instrument(skip(self, state), fields(path = %handle.path.display()))]
    pub async fn save_as(&mut self, state: &BoardState, handle: FileHandle) -> Result<(), SyncError> {
        self.link(handle)?;
        self.save_now(state).await
    }

    /// Links an existing file and returns its board, which replaces the
    /// in-memory one. Nothing is linked if the file cannot be used. A cache
    /// failure after a successful read is reported as a notice; the file
    /// stays the source of truth.
    #[tracing::instrument(skip(self, current_rules), fields(path = %handle.path.display()))]
    pub async fn open(
        &mut self,
        handle: FileHandle,
        current_rules: &[SortRule],
    ) -> Result<LoadOutcome, SyncError> {
        match handle.request_permission().await {
            Permission::Granted => {}
            Permission::Denied(reason) => {
                return Err(SyncError::PermissionDenied {
                    name: handle.name,
                    reason,
                });
            }
            Permission::Stale => return Err(SyncError::Stale(handle.name)),
        }

        let state = read_board(&handle, current_rules).await?;
        self.link(handle)?;
        let notice = match self.write_cache(&state) {
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "opened file not copied to the local cache");
                Some(err.to_string())
            }
        };
        {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            shared.dirty = false;
            shared.last_error = None;
        }
        Ok(LoadOutcome {
            state,
            source: LoadSource::LinkedFile,
            notice,
        })
    }

    /// Forgets the linked file; the file itself is left alone.
    #[tracing::instrument(skip(self))]
    pub fn unlink(&mut self) -> Result<(), SyncError> {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        self.registry.forget()?;
        if let Some(handle) = self.handle.take() {
            info!(name = %handle.name, "unlinked file");
        }
        self.shared.lock().last_error = None;
        Ok(())
    }

    fn link(&mut self, handle: FileHandle) -> Result<(), SyncError> {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        self.registry.remember(&handle)?;
        self.shared.lock().last_error = None;
        self.handle = Some(handle);
        Ok(())
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take()
            && pending.cancel()
        {
            warn!(generation = pending.generation, "dropping unflushed linked-file write");
        }
    }
}

fn empty_outcome(default_rules: &[SortRule], notice: Option<String>) -> LoadOutcome {
    LoadOutcome {
        state: BoardState {
            tasks: vec![],
            sort_rules: default_rules.to_vec(),
        },
        source: LoadSource::Empty,
        notice,
    }
}

async fn read_board(handle: &FileHandle, current_rules: &[SortRule]) -> Result<BoardState, SyncError> {
    let text = handle.read().await.map_err(|source| SyncError::Read {
        name: handle.name.clone(),
        source,
    })?;
    format::decode(&text, current_rules).map_err(|source| SyncError::Format {
        name: handle.name.clone(),
        source,
    })
}

/// Writes one snapshot. Writes are serialized, so an older snapshot can never
/// land after a newer one.
async fn write_file(
    handle: &FileHandle,
    text: String,
    generation: u64,
    shared: &Mutex<Shared>,
    write_lock: &tokio::sync::Mutex<()>,
) -> Result<(), SyncError> {
    let _guard = write_lock.lock().await;
    let path = handle.path.clone();
    let result = match tokio::task::spawn_blocking(move || write_atomic(&path, &text)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(err) => Err(format!("write task failed: {err}")),
    };

    let mut shared = shared.lock();
    match result {
        Ok(()) => {
            shared.file_writes += 1;
            shared.last_error = None;
            if shared.generation == generation {
                shared.dirty = false;
            }
            debug!(name = %handle.name, generation, "linked file written");
            Ok(())
        }
        Err(reason) => {
            warn!(name = %handle.name, reason = %reason, "linked file write failed");
            shared.last_error = Some(reason.clone());
            Err(SyncError::Write {
                name: handle.name.clone(),
                reason,
            })
        }
    }
}
