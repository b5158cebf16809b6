use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Workflow stage a task lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnId {
    Backlog,
    InProgress,
    Review,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,
    pub title: &'static str,
    pub color: &'static str,
}

/// Display order of the board.
pub const COLUMNS: [Column; 4] = [
    Column {
        id: ColumnId::Backlog,
        title: "Backlog",
        color: "col-backlog",
    },
    Column {
        id: ColumnId::InProgress,
        title: "In Progress",
        color: "col-progress",
    },
    Column {
        id: ColumnId::Review,
        title: "Review",
        color: "col-review",
    },
    Column {
        id: ColumnId::Done,
        title: "Done",
        color: "col-done",
    },
];

/// The column ordered by the sort rules instead of by hand.
pub const AUTO_SORTED: ColumnId = ColumnId::Backlog;

/// Entering or leaving this column drives `completed_at`.
pub const TERMINAL: ColumnId = ColumnId::Done;

impl ColumnId {
    pub const ALL: [ColumnId; 4] = [
        Self::Backlog,
        Self::InProgress,
        Self::Review,
        Self::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    pub fn column(self) -> &'static Column {
        match self {
            Self::Backlog => &COLUMNS[0],
            Self::InProgress => &COLUMNS[1],
            Self::Review => &COLUMNS[2],
            Self::Done => &COLUMNS[3],
        }
    }

    pub fn title(self) -> &'static str {
        self.column().title
    }

    pub fn is_auto_sorted(self) -> bool {
        self == AUTO_SORTED
    }

    pub fn is_manually_ordered(self) -> bool {
        !self.is_auto_sorted()
    }

    pub fn is_terminal(self) -> bool {
        self == TERMINAL
    }
}

impl FromStr for ColumnId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "backlog" => Ok(Self::Backlog),
            "in-progress" | "progress" | "doing" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            other => Err(anyhow!(
                "unknown column '{other}': use backlog, in-progress, review, done"
            )),
        }
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_ids() {
        for id in ColumnId::ALL {
            assert_eq!(id.column().id, id);
        }
        assert_eq!(COLUMNS.iter().filter(|c| c.id.is_terminal()).count(), 1);
        assert_eq!(COLUMNS.iter().filter(|c| c.id.is_auto_sorted()).count(), 1);
    }

    #[test]
    fn parses_loose_spellings() {
        assert_eq!("In Progress".parse::<ColumnId>().unwrap(), ColumnId::InProgress);
        assert_eq!("in_progress".parse::<ColumnId>().unwrap(), ColumnId::InProgress);
        assert_eq!("DONE".parse::<ColumnId>().unwrap(), ColumnId::Done);
        assert!("archive".parse::<ColumnId>().is_err());
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&ColumnId::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }
}
