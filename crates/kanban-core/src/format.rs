//! On-disk shape of the board, shared by the local cache and linked files.
//!
//! Current encoding is `{"tasks": [...], "sortRules": [...]}`. A bare task
//! array is the legacy shape; it is still read, never written.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::column::TERMINAL;
use crate::sort::SortRule;
use crate::store::BoardState;
use crate::task::{Task, new_task_id};

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("invalid board JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a board object or a task list, found {0}")]
    UnexpectedShape(&'static str),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBoard {
    #[serde(default)]
    tasks: Option<Vec<Task>>,
    #[serde(default)]
    sort_rules: Option<Vec<Value>>,
}

/// Pretty JSON with two-space indentation; equal boards encode to equal bytes.
pub fn encode(state: &BoardState) -> Result<String, FormatError> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Decodes either shape. `current_rules` fill in when the content carries
/// none, which is always the case for the legacy shape.
#[tracing::instrument(skip_all, fields(bytes = text.len()))]
pub fn decode(text: &str, current_rules: &[SortRule]) -> Result<BoardState, FormatError> {
    let value: Value = serde_json::from_str(text)?;
    let mut state = match value {
        Value::Array(_) => {
            let tasks: Vec<Task> = serde_json::from_value(value)?;
            debug!(tasks = tasks.len(), "upgrading legacy task list");
            BoardState {
                tasks,
                sort_rules: current_rules.to_vec(),
            }
        }
        Value::Object(_) => {
            let raw: RawBoard = serde_json::from_value(value)?;
            BoardState {
                tasks: raw.tasks.unwrap_or_default(),
                sort_rules: match raw.sort_rules {
                    Some(rules) => parse_rules(rules),
                    None => current_rules.to_vec(),
                },
            }
        }
        Value::Null => return Err(FormatError::UnexpectedShape("null")),
        Value::Bool(_) => return Err(FormatError::UnexpectedShape("a boolean")),
        Value::Number(_) => return Err(FormatError::UnexpectedShape("a number")),
        Value::String(_) => return Err(FormatError::UnexpectedShape("a string")),
    };

    normalize(&mut state);
    Ok(state)
}

fn parse_rules(raw: Vec<Value>) -> Vec<SortRule> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<SortRule>(value.clone()) {
            Ok(rule) => Some(rule),
            Err(err) => {
                warn!(rule = %value, error = %err, "dropping unrecognized sort rule");
                None
            }
        })
        .collect()
}

/// Restores the task invariants on content that may have been hand-edited.
fn normalize(state: &mut BoardState) {
    let mut seen = HashSet::new();
    for task in &mut state.tasks {
        if !seen.insert(task.id.clone()) || task.id.trim().is_empty() {
            let fresh = new_task_id();
            warn!(old = %task.id, new = %fresh, "reassigning duplicate task id");
            task.id = fresh.clone();
            seen.insert(fresh);
        }

        task.tags = task
            .tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(ToString::to_string)
            .collect();

        if task.status == TERMINAL {
            if task.completed_at.is_none() {
                task.completed_at = Some(task.created);
            }
        } else {
            task.completed_at = None;
        }
    }
}
