use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::column::ColumnId;
use crate::sort::{SortRule, default_rules};
use crate::task::{
    Task, TaskFields, TaskPatch, new_task_id, normalize_desc, normalize_tags, validate_title,
};
use crate::transition::{Transition, append_order, apply_move};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("invalid task input: {0}")]
    InvalidInput(String),
    #[error("task not found: {0}")]
    NotFound(String),
}

/// Everything that is persisted: the tasks plus the backlog sort rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    pub tasks: Vec<Task>,
    pub sort_rules: Vec<SortRule>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            tasks: vec![],
            sort_rules: default_rules(),
        }
    }
}

/// Owns the board and the mutation primitives over it.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    state: BoardState,
}

impl TaskStore {
    pub fn new(state: BoardState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn tasks(&self) -> &[Task] {
        &self.state.tasks
    }

    pub fn sort_rules(&self) -> &[SortRule] {
        &self.state.sort_rules
    }

    /// Swaps in a freshly loaded board.
    pub fn replace(&mut self, state: BoardState) {
        info!(tasks = state.tasks.len(), rules = state.sort_rules.len(), "replacing board state");
        self.state = state;
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Task> {
        self.state.tasks.iter().find(|task| task.id == id)
    }

    fn position(&self, id: &str) -> Result<usize, BoardError> {
        self.state
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| BoardError::NotFound(id.to_string()))
    }

    pub fn tasks_in(&self, column: ColumnId) -> impl Iterator<Item = &Task> {
        self.state.tasks.iter().filter(move |task| task.status == column)
    }

    #[tracing::instrument(skip(self, fields, now), fields(status = %fields.status))]
    pub fn create(&mut self, fields: TaskFields, now: DateTime<Utc>) -> Result<&Task, BoardError> {
        let title = validate_title(&fields.title)?;

        let mut id = new_task_id();
        while self.find_by_id(&id).is_some() {
            id = new_task_id();
        }

        let transition = Transition::create(fields.status);
        let task = Task {
            id,
            title,
            desc: normalize_desc(fields.desc),
            priority: fields.priority,
            effort: fields.effort,
            due: fields.due,
            status: fields.status,
            order: append_order(&self.state.tasks, fields.status, None),
            tags: normalize_tags(fields.tags),
            created: now,
            completed_at: transition.completed_at(None, now),
        };

        debug!(id = %task.id, order = task.order, "task created");
        self.state.tasks.push(task);
        let idx = self.state.tasks.len() - 1;
        Ok(&self.state.tasks[idx])
    }

    /// Applies `patch`; `completed_at` is re-derived on every call so edits
    /// inside the terminal column keep their stamp.
    #[tracing::instrument(skip(self, patch, now))]
    pub fn update(
        &mut self,
        id: &str,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<&Task, BoardError> {
        let idx = self.position(id)?;
        let title = patch.title.as_deref().map(validate_title).transpose()?;

        let from = self.state.tasks[idx].status;
        let to = patch.status.unwrap_or(from);
        let order = (to != from && to.is_manually_ordered())
            .then(|| append_order(&self.state.tasks, to, Some(id)));

        let task = &mut self.state.tasks[idx];
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(desc) = patch.desc {
            task.desc = normalize_desc(desc);
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(effort) = patch.effort {
            task.effort = effort;
        }
        if let Some(due) = patch.due {
            task.due = due;
        }
        if let Some(tags) = patch.tags {
            task.tags = normalize_tags(tags);
        }
        if let Some(order) = order {
            task.order = order;
        }
        task.status = to;
        task.completed_at = Transition::between(from, to).completed_at(task.completed_at, now);

        debug!(id = %task.id, from = %from, to = %to, "task updated");
        Ok(&self.state.tasks[idx])
    }

    #[tracing::instrument(skip(self, now))]
    pub fn move_task(
        &mut self,
        id: &str,
        to: ColumnId,
        now: DateTime<Utc>,
    ) -> Result<&Task, BoardError> {
        let idx = self.position(id)?;
        apply_move(&mut self.state.tasks, idx, to, now);
        Ok(&self.state.tasks[idx])
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> Result<Task, BoardError> {
        let idx = self.position(id)?;
        let task = self.state.tasks.remove(idx);
        debug!(id = %task.id, "task deleted");
        Ok(task)
    }

    pub fn set_sort_rules(&mut self, rules: Vec<SortRule>) {
        debug!(rules = ?rules, "sort rules changed");
        self.state.sort_rules = rules;
    }

    /// Every tag on the board with its use count, most used first.
    pub fn all_tags(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for task in &self.state.tasks {
            for tag in &task.tags {
                *counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }
        let mut tags: Vec<_> = counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        tags
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::task::Priority;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).single().expect("valid time")
    }

    fn fields(title: &str, status: ColumnId) -> TaskFields {
        TaskFields::new(title, status)
    }

    #[test]
    fn create_appends_and_stamps() {
        let mut store = TaskStore::default();
        store.create(fields("one", ColumnId::Review), at(1)).unwrap();
        let second = store.create(fields("two", ColumnId::Review), at(2)).unwrap();
        assert_eq!(second.order, 1);
        assert_eq!(second.created, at(2));
        assert_eq!(second.completed_at, None);

        let done = store.create(fields("three", ColumnId::Done), at(3)).unwrap();
        assert_eq!(done.order, 0);
        assert_eq!(done.completed_at, Some(at(3)));
    }

    #[test]
    fn create_rejects_blank_title_without_side_effects() {
        let mut store = TaskStore::default();
        let err = store.create(fields("  ", ColumnId::Backlog), at(1)).unwrap_err();
        assert!(matches!(err, BoardError::InvalidInput(_)));
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn create_normalizes_text_fields() {
        let mut store = TaskStore::default();
        let mut input = fields("  title ", ColumnId::Backlog);
        input.desc = Some("   ".to_string());
        input.tags = vec!["a".to_string(), " a".to_string(), String::new()];
        let task = store.create(input, at(1)).unwrap();
        assert_eq!(task.title, "title");
        assert_eq!(task.desc, None);
        assert_eq!(task.tags.len(), 1);
    }

    #[test]
    fn editing_inside_done_keeps_completion() {
        let mut store = TaskStore::default();
        let id = store.create(fields("t", ColumnId::InProgress), at(1)).unwrap().id.clone();
        store.move_task(&id, ColumnId::Done, at(2)).unwrap();

        let patch = TaskPatch {
            priority: Some(Priority::High),
            ..TaskPatch::default()
        };
        let task = store.update(&id, patch, at(5)).unwrap();
        assert_eq!(task.completed_at, Some(at(2)));
    }

    #[test]
    fn update_status_drives_completion_and_order() {
        let mut store = TaskStore::default();
        store.create(fields("x", ColumnId::Review), at(1)).unwrap();
        let id = store.create(fields("t", ColumnId::Backlog), at(1)).unwrap().id.clone();

        let to_done = TaskPatch {
            status: Some(ColumnId::Done),
            ..TaskPatch::default()
        };
        assert_eq!(store.update(&id, to_done, at(3)).unwrap().completed_at, Some(at(3)));

        let to_review = TaskPatch {
            status: Some(ColumnId::Review),
            ..TaskPatch::default()
        };
        let task = store.update(&id, to_review, at(4)).unwrap();
        assert_eq!(task.completed_at, None);
        assert_eq!(task.order, 1);
    }

    #[test]
    fn update_rejects_blank_title_and_changes_nothing() {
        let mut store = TaskStore::default();
        let id = store.create(fields("keep", ColumnId::Backlog), at(1)).unwrap().id.clone();
        let patch = TaskPatch {
            title: Some(" ".to_string()),
            priority: Some(Priority::Low),
            ..TaskPatch::default()
        };
        assert!(store.update(&id, patch, at(2)).is_err());
        let task = store.find_by_id(&id).unwrap();
        assert_eq!(task.title, "keep");
        assert_eq!(task.priority, Priority::None);
    }

    #[test]
    fn unknown_ids_report_not_found() {
        let mut store = TaskStore::default();
        assert_eq!(
            store.delete("nope").unwrap_err(),
            BoardError::NotFound("nope".to_string())
        );
        assert!(store.move_task("nope", ColumnId::Done, at(1)).is_err());
        assert!(store.update("nope", TaskPatch::default(), at(1)).is_err());
    }

    #[test]
    fn delete_removes_only_that_task() {
        let mut store = TaskStore::default();
        let id = store.create(fields("a", ColumnId::Backlog), at(1)).unwrap().id.clone();
        store.create(fields("b", ColumnId::Backlog), at(1)).unwrap();
        let removed = store.delete(&id).unwrap();
        assert_eq!(removed.title, "a");
        assert_eq!(store.tasks().len(), 1);
        assert!(store.find_by_id(&id).is_none());
    }

    #[test]
    fn tag_counts_rank_by_use() {
        let mut store = TaskStore::default();
        let mut a = fields("a", ColumnId::Backlog);
        a.tags = vec!["ui".to_string(), "api".to_string()];
        let mut b = fields("b", ColumnId::Review);
        b.tags = vec!["ui".to_string()];
        store.create(a, at(1)).unwrap();
        store.create(b, at(1)).unwrap();
        assert_eq!(
            store.all_tags(),
            vec![("ui".to_string(), 2), ("api".to_string(), 1)]
        );
    }
}
