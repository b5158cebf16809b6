//! The controller the outside world talks to. It owns the board, the
//! persistence channels and the view settings, and makes sure every
//! mutation reaches the synchronizer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cache::LocalCache;
use crate::column::ColumnId;
use crate::filter::{ViewSettings, filter_by_tags, filter_recent};
use crate::handle::{FileHandle, HandleRegistry};
use crate::sort::{SortRule, default_rules, sort_summary, sort_tasks};
use crate::store::{BoardError, BoardState, TaskStore};
use crate::sync::{FileStatus, LoadSource, SyncError, Synchronizer};
use crate::task::{Task, TaskFields, TaskPatch};

/// Tasks of one column in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleColumn<'a> {
    pub tasks: Vec<&'a Task>,
    /// Terminal-column tasks hidden by the recency window.
    pub suppressed: usize,
}

#[derive(Debug)]
pub struct Board {
    store: TaskStore,
    sync: Synchronizer,
    view: ViewSettings,
    source: LoadSource,
    notices: Vec<String>,
}

impl Board {
    /// Opens the board kept under `data_dir`, restoring any linked file.
    #[tracing::instrument(skip(view))]
    pub async fn load(data_dir: &Path, debounce: Duration, view: ViewSettings) -> anyhow::Result<Self> {
        let cache = LocalCache::open(data_dir)?;
        let registry = HandleRegistry::open(data_dir);
        Ok(Self::start(Synchronizer::new(cache, registry, debounce), view).await)
    }

    pub async fn start(mut sync: Synchronizer, view: ViewSettings) -> Self {
        let outcome = sync.startup(&default_rules()).await;
        info!(source = ?outcome.source, tasks = outcome.state.tasks.len(), "board ready");
        Self {
            store: TaskStore::new(outcome.state),
            sync,
            view,
            source: outcome.source,
            notices: outcome.notice.into_iter().collect(),
        }
    }

    pub fn state(&self) -> &BoardState {
        self.store.state()
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.tasks()
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.store.find_by_id(id)
    }

    /// Resolves a full id or a unique prefix of one.
    pub fn resolve_id(&self, id_or_prefix: &str) -> Result<String, BoardError> {
        if let Some(task) = self.store.find_by_id(id_or_prefix) {
            return Ok(task.id.clone());
        }
        let mut matches = self
            .store
            .tasks()
            .iter()
            .filter(|task| !id_or_prefix.is_empty() && task.id.starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id.clone()),
            (Some(_), Some(_)) => Err(BoardError::InvalidInput(format!(
                "id prefix {id_or_prefix:?} is ambiguous"
            ))),
            _ => Err(BoardError::NotFound(id_or_prefix.to_string())),
        }
    }

    pub fn source(&self) -> LoadSource {
        self.source
    }

    pub fn view(&self) -> &ViewSettings {
        &self.view
    }

    /// Non-fatal problems collected since the last call.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn persist(&mut self) {
        if let Err(err) = self.sync.mark_dirty(self.store.state()) {
            warn!(error = %err, "change kept in memory only");
            self.notices.push(err.to_string());
        }
    }

    pub fn create(&mut self, fields: TaskFields, now: DateTime<Utc>) -> Result<Task, BoardError> {
        let task = self.store.create(fields, now)?.clone();
        self.persist();
        Ok(task)
    }

    pub fn update(&mut self, id: &str, patch: TaskPatch, now: DateTime<Utc>) -> Result<Task, BoardError> {
        let task = self.store.update(id, patch, now)?.clone();
        self.persist();
        Ok(task)
    }

    /// Result of a drop onto `to`.
    pub fn move_task(&mut self, id: &str, to: ColumnId, now: DateTime<Utc>) -> Result<Task, BoardError> {
        let task = self.store.move_task(id, to, now)?.clone();
        self.persist();
        Ok(task)
    }

    pub fn delete(&mut self, id: &str) -> Result<Task, BoardError> {
        let task = self.store.delete(id)?;
        self.persist();
        Ok(task)
    }

    pub fn set_sort_rules(&mut self, rules: Vec<SortRule>) {
        self.store.set_sort_rules(rules);
        self.persist();
    }

    pub fn sort_rules(&self) -> &[SortRule] {
        self.store.sort_rules()
    }

    pub fn sort_summary(&self) -> Option<String> {
        sort_summary(self.store.sort_rules())
    }

    pub fn set_tag_filter(&mut self, column: ColumnId, tags: BTreeSet<String>) {
        self.view.set_tag_filter(column, tags);
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.view.set_show_all(show_all);
    }

    pub fn all_tags(&self) -> Vec<(String, usize)> {
        self.store.all_tags()
    }

    #[tracing::instrument(skip(self, now))]
    pub fn visible_tasks(&self, column: ColumnId, now: DateTime<Utc>) -> VisibleColumn<'_> {
        let in_column: Vec<&Task> = self.store.tasks_in(column).collect();
        let no_filter = BTreeSet::new();
        let active = self.view.tag_filter(column).unwrap_or(&no_filter);

        let tasks = if column.is_auto_sorted() {
            filter_by_tags(sort_tasks(in_column, self.store.sort_rules()), active)
        } else {
            let mut tasks = filter_by_tags(in_column, active);
            tasks.sort_by_key(|task| task.order);
            tasks
        };

        if column.is_terminal() {
            let outcome = filter_recent(tasks, self.view.recency, now);
            VisibleColumn {
                tasks: outcome.tasks,
                suppressed: outcome.suppressed,
            }
        } else {
            VisibleColumn {
                tasks,
                suppressed: 0,
            }
        }
    }

    pub fn status(&self) -> FileStatus {
        self.sync.status()
    }

    pub fn is_dirty(&self) -> bool {
        self.sync.is_dirty()
    }

    pub fn last_error(&self) -> Option<String> {
        self.sync.last_error()
    }

    pub fn linked_path(&self) -> Option<PathBuf> {
        self.sync.handle().map(|handle| handle.path.clone())
    }

    pub fn file_writes(&self) -> u64 {
        self.sync.file_writes()
    }

    pub async fn save(&mut self) -> Result<(), SyncError> {
        self.sync.save_now(self.store.state()).await
    }

    pub async fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<(), SyncError> {
        let handle = FileHandle::new(path);
        self.sync.save_as(self.store.state(), handle).await
    }

    /// Links an existing board file and replaces the in-memory board with
    /// its content. The current board is untouched when that fails.
    #[tracing::instrument(skip(self, path))]
    pub async fn open_file(&mut self, path: impl Into<PathBuf>) -> Result<(), SyncError> {
        if let Err(err) = self.sync.flush().await {
            warn!(error = %err, "pending write to previous file failed");
        }
        let handle = FileHandle::new(path);
        let outcome = self.sync.open(handle, self.store.sort_rules()).await?;
        self.store.replace(outcome.state);
        self.source = outcome.source;
        self.notices.extend(outcome.notice);
        Ok(())
    }

    pub fn unlink(&mut self) -> Result<(), SyncError> {
        self.sync.unlink()
    }

    pub async fn flush(&mut self) -> Result<(), SyncError> {
        self.sync.flush().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::sort::SortField;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, day, 8, 0, 0).single().expect("valid time")
    }

    async fn fresh() -> (tempfile::TempDir, Board) {
        let temp = tempdir().expect("tempdir");
        let board = Board::load(temp.path(), Duration::from_millis(500), ViewSettings::default())
            .await
            .expect("load board");
        (temp, board)
    }

    #[tokio::test]
    async fn manual_columns_follow_order_not_rules() {
        let (_temp, mut board) = fresh().await;
        let mut first = TaskFields::new("zeta", ColumnId::Review);
        first.priority = crate::task::Priority::Low;
        board.create(first, at(1)).unwrap();
        board.create(TaskFields::new("alpha", ColumnId::Review), at(2)).unwrap();
        board.set_sort_rules(vec![SortRule::asc(SortField::Title)]);

        let titles: Vec<_> = board
            .visible_tasks(ColumnId::Review, at(3))
            .tasks
            .iter()
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(titles, ["zeta", "alpha"]);

        let titles: Vec<_> = {
            board.create(TaskFields::new("mid", ColumnId::Backlog), at(3)).unwrap();
            board.create(TaskFields::new("apple", ColumnId::Backlog), at(3)).unwrap();
            board
                .visible_tasks(ColumnId::Backlog, at(3))
                .tasks
                .iter()
                .map(|t| t.title.clone())
                .collect()
        };
        assert_eq!(titles, ["apple", "mid"]);
    }

    #[tokio::test]
    async fn tag_filter_is_per_column_and_clearable() {
        let (_temp, mut board) = fresh().await;
        let mut tagged = TaskFields::new("tagged", ColumnId::Backlog);
        tagged.tags = vec!["ui".to_string(), "api".to_string()];
        board.create(tagged, at(1)).unwrap();
        board.create(TaskFields::new("plain", ColumnId::Backlog), at(1)).unwrap();

        let only_ui: BTreeSet<String> = ["ui".to_string()].into_iter().collect();
        board.set_tag_filter(ColumnId::Backlog, only_ui.clone());
        assert_eq!(board.visible_tasks(ColumnId::Backlog, at(2)).tasks.len(), 1);
        board.set_tag_filter(ColumnId::Review, only_ui);
        assert_eq!(board.visible_tasks(ColumnId::Backlog, at(2)).tasks.len(), 1);

        board.set_tag_filter(ColumnId::Backlog, BTreeSet::new());
        assert_eq!(board.visible_tasks(ColumnId::Backlog, at(2)).tasks.len(), 2);
    }

    #[tokio::test]
    async fn id_prefixes_resolve_when_unique() {
        let (_temp, mut board) = fresh().await;
        let task = board.create(TaskFields::new("t", ColumnId::Backlog), at(1)).unwrap();
        assert_eq!(board.resolve_id(&task.id[..6]).unwrap(), task.id);
        assert!(matches!(board.resolve_id("zzzz-none"), Err(BoardError::NotFound(_))));
        assert!(matches!(board.resolve_id(""), Err(BoardError::NotFound(_))));
    }

    #[tokio::test]
    async fn save_without_link_needs_save_as() {
        let (_temp, mut board) = fresh().await;
        assert!(matches!(board.save().await, Err(SyncError::NoFileLinked)));
        assert_eq!(board.status(), FileStatus::NoFileLinked);
    }
}
