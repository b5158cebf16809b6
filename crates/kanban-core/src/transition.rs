//! Status, order and completion rules applied when a task enters a column.
//!
//! Any column may follow any other; the board imposes no workflow order.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::column::ColumnId;
use crate::task::Task;

/// A task entering `to`; `from` is `None` for a task being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<ColumnId>,
    pub to: ColumnId,
}

impl Transition {
    pub fn create(to: ColumnId) -> Self {
        Self { from: None, to }
    }

    pub fn between(from: ColumnId, to: ColumnId) -> Self {
        Self {
            from: Some(from),
            to,
        }
    }

    pub fn enters_terminal(&self) -> bool {
        self.to.is_terminal() && self.from.is_none_or(|from| !from.is_terminal())
    }

    /// Completion timestamp after the transition.
    ///
    /// Entering the terminal column stamps `now`; staying in it keeps the
    /// existing stamp; any other destination clears it.
    pub fn completed_at(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !self.to.is_terminal() {
            return None;
        }
        if self.enters_terminal() {
            Some(now)
        } else {
            previous.or(Some(now))
        }
    }
}

/// Position at the end of `column`, ignoring the task `exclude` itself.
pub fn append_order(tasks: &[Task], column: ColumnId, exclude: Option<&str>) -> u32 {
    let count = tasks
        .iter()
        .filter(|task| task.status == column)
        .filter(|task| exclude != Some(task.id.as_str()))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Moves `tasks[idx]` to `to`: sets status, completion and, for manually
/// ordered columns, appends it at the end of the destination.
pub fn apply_move(tasks: &mut [Task], idx: usize, to: ColumnId, now: DateTime<Utc>) {
    let order = to
        .is_manually_ordered()
        .then(|| append_order(tasks, to, Some(tasks[idx].id.as_str())));

    let task = &mut tasks[idx];
    let transition = Transition::between(task.status, to);
    task.status = to;
    task.completed_at = transition.completed_at(task.completed_at, now);
    if let Some(order) = order {
        task.order = order;
    }

    debug!(
        id = %task.id,
        from = ?transition.from,
        to = %to,
        order = task.order,
        completed = task.completed_at.is_some(),
        "applied move"
    );
}
