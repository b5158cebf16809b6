use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::column::ColumnId;
use crate::task::Task;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Keeps tasks carrying every tag in `active`. An empty set keeps all.
pub fn filter_by_tags<'a>(tasks: Vec<&'a Task>, active: &BTreeSet<String>) -> Vec<&'a Task> {
    if active.is_empty() {
        return tasks;
    }
    tasks.into_iter().filter(|task| task.has_tags(active)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindow {
    pub days: u32,
    pub show_all: bool,
}

impl Default for RecencyWindow {
    fn default() -> Self {
        Self {
            days: DEFAULT_WINDOW_DAYS,
            show_all: false,
        }
    }
}

impl RecencyWindow {
    /// Oldest instant still inside the window, or `None` when the window
    /// reaches past the representable range and so covers everything.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(Duration::days(i64::from(self.days)))
    }

    pub fn is_recent(&self, task: &Task, now: DateTime<Utc>) -> bool {
        self.cutoff(now)
            .is_none_or(|cutoff| task.completed_or_created() >= cutoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecencyOutcome<'a> {
    pub tasks: Vec<&'a Task>,
    pub suppressed: usize,
}

/// Hides tasks finished (or, lacking a stamp, created) before the window,
/// reporting how many were hidden.
pub fn filter_recent<'a>(
    tasks: Vec<&'a Task>,
    window: RecencyWindow,
    now: DateTime<Utc>,
) -> RecencyOutcome<'a> {
    if window.show_all {
        return RecencyOutcome {
            tasks,
            suppressed: 0,
        };
    }

    let before = tasks.len();
    let kept: Vec<&Task> = tasks
        .into_iter()
        .filter(|task| window.is_recent(task, now))
        .collect();
    let suppressed = before - kept.len();
    trace!(kept = kept.len(), suppressed, days = window.days, "applied recency window");
    RecencyOutcome {
        tasks: kept,
        suppressed,
    }
}

/// Display-only filter settings; never persisted with the board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSettings {
    tag_filters: BTreeMap<ColumnId, BTreeSet<String>>,
    pub recency: RecencyWindow,
}

impl ViewSettings {
    pub fn with_recency(recency: RecencyWindow) -> Self {
        Self {
            tag_filters: BTreeMap::new(),
            recency,
        }
    }

    pub fn tag_filter(&self, column: ColumnId) -> Option<&BTreeSet<String>> {
        self.tag_filters.get(&column)
    }

    /// Replaces the active tags for `column`; an empty set clears it.
    pub fn set_tag_filter(&mut self, column: ColumnId, tags: BTreeSet<String>) {
        if tags.is_empty() {
            self.tag_filters.remove(&column);
        } else {
            self.tag_filters.insert(column, tags);
        }
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.recency.show_all = show_all;
    }
}
