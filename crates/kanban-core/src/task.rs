use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::column::ColumnId;
use crate::datetime::{due_date, epoch_millis};
use crate::store::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::None,
    ];

    /// Sort key: lower rank sorts first under ascending order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::None => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "none" | "" => Ok(Self::None),
            other => Err(anyhow!(
                "unknown priority '{other}': use critical, high, medium, low, none"
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Unknown labels from hand-edited files rank like an absent priority.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|text| text.parse().ok())
            .unwrap_or_default())
    }
}

/// Size bucket on a fixed ordinal scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Effort {
    Xs,
    S,
    M,
    L,
    Xl,
}

impl Effort {
    pub const ALL: [Effort; 5] = [Self::Xs, Self::S, Self::M, Self::L, Self::Xl];

    pub fn ordinal(self) -> u8 {
        match self {
            Self::Xs => 0,
            Self::S => 1,
            Self::M => 2,
            Self::L => 3,
            Self::Xl => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xs => "XS",
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::Xl => "XL",
        }
    }
}

impl FromStr for Effort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "XS" => Ok(Self::Xs),
            "S" => Ok(Self::S),
            "M" => Ok(Self::M),
            "L" => Ok(Self::L),
            "XL" => Ok(Self::Xl),
            other => Err(anyhow!("unknown effort '{other}': use XS, S, M, L, XL")),
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Effort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// An empty or unknown effort label is treated as no effort at all.
fn lenient_effort<'de, D>(deserializer: D) -> Result<Option<Effort>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|text| text.parse().ok()))
}

fn epoch_zero() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_effort"
    )]
    pub effort: Option<Effort>,

    #[serde(default, with = "due_date")]
    pub due: Option<NaiveDate>,

    pub status: ColumnId,

    #[serde(default)]
    pub order: u32,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default = "epoch_zero", with = "epoch_millis")]
    pub created: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "epoch_millis::option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(title: String, status: ColumnId, now: DateTime<Utc>) -> Self {
        Self {
            id: new_task_id(),
            title,
            desc: None,
            priority: Priority::default(),
            effort: None,
            due: None,
            status,
            order: 0,
            tags: BTreeSet::new(),
            created: now,
            completed_at: None,
        }
    }

    pub fn has_tags(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }

    /// Moment the recency filter measures from.
    pub fn completed_or_created(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created)
    }
}

pub fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Field values supplied when a task is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields {
    pub title: String,
    pub desc: Option<String>,
    pub priority: Priority,
    pub effort: Option<Effort>,
    pub due: Option<NaiveDate>,
    pub status: ColumnId,
    pub tags: Vec<String>,
}

impl TaskFields {
    pub fn new(title: impl Into<String>, status: ColumnId) -> Self {
        Self {
            title: title.into(),
            desc: None,
            priority: Priority::None,
            effort: None,
            due: None,
            status,
            tags: vec![],
        }
    }

    /// Values the add-task form starts from.
    pub fn form_defaults(status: ColumnId) -> Self {
        Self {
            priority: Priority::Medium,
            effort: Some(Effort::M),
            ..Self::new(String::new(), status)
        }
    }
}

/// Partial update; `None` leaves a field unchanged, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub desc: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub effort: Option<Option<Effort>>,
    pub due: Option<Option<NaiveDate>>,
    pub status: Option<ColumnId>,
    pub tags: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub fn validate_title(raw: &str) -> Result<String, BoardError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(BoardError::InvalidInput("task title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

pub fn normalize_desc(raw: Option<String>) -> Option<String> {
    raw.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Trims every label, drops empties and duplicates.
pub fn normalize_tags<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Splits the comma-separated tag field of the task form.
pub fn parse_tag_list(raw: &str) -> BTreeSet<String> {
    normalize_tags(raw.split(','))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranks_follow_severity() {
        let ranks: Vec<u8> = Priority::ALL.iter().map(|p| p.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn effort_parses_case_insensitively() {
        assert_eq!("xl".parse::<Effort>().unwrap(), Effort::Xl);
        assert_eq!(Effort::Xs.to_string(), "XS");
        assert!("XXL".parse::<Effort>().is_err());
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = parse_tag_list(" ui, api ,,ui, API ");
        let expected: Vec<&str> = vec!["API", "api", "ui"];
        assert_eq!(tags.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn blank_title_is_rejected() {
        assert!(validate_title("   ").is_err());
        assert_eq!(validate_title("  Ship it ").unwrap(), "Ship it");
    }

    #[test]
    fn lenient_fields_tolerate_hand_edits() {
        let raw = r#"{"id":"a","title":"t","priority":"urgent","effort":"","status":"review","created":5}"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.priority, Priority::None);
        assert_eq!(task.effort, None);
        assert_eq!(task.order, 0);
        assert_eq!(task.created.timestamp_millis(), 5);
        assert!(task.tags.is_empty());
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let task = Task::new("t".to_string(), ColumnId::Backlog, now);
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("completedAt").is_none());
        assert!(json.get("desc").is_none());
        assert!(json["due"].is_null());
        assert_eq!(json["created"], 1_700_000_000_000_i64);
        assert_eq!(json["status"], "backlog");
    }
}
