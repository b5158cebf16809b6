use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use deunicode::deunicode;
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Ordinal given to a task without effort; larger than every bucket.
const EFFORT_ABSENT: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Priority,
    Due,
    Effort,
    Created,
    Title,
}

impl SortField {
    pub const ALL: [SortField; 5] = [
        Self::Priority,
        Self::Due,
        Self::Effort,
        Self::Created,
        Self::Title,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Due => "due",
            Self::Effort => "effort",
            Self::Created => "created",
            Self::Title => "title",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Priority => "Priority",
            Self::Due => "Due Date",
            Self::Effort => "Effort (smallest first)",
            Self::Created => "Date Created",
            Self::Title => "Title (A-Z)",
        }
    }
}

impl FromStr for SortField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "due" => Ok(Self::Due),
            "effort" => Ok(Self::Effort),
            "created" => Ok(Self::Created),
            "title" => Ok(Self::Title),
            other => Err(anyhow!(
                "unknown sort field '{other}': use priority, due, effort, created, title"
            )),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "+" => Ok(Self::Asc),
            "desc" | "-" => Ok(Self::Desc),
            other => Err(anyhow!("unknown sort direction '{other}': use asc or desc")),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortRule {
    pub field: SortField,
    #[serde(rename = "dir")]
    pub direction: SortDirection,
}

impl SortRule {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    pub fn asc(field: SortField) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: SortField) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

/// Parses `field`, `field:dir`, `field+` or `field-`.
impl FromStr for SortRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let (field, direction) = if let Some((field, dir)) = token.split_once(':') {
            (field, dir.parse()?)
        } else if let Some(field) = token.strip_suffix('-') {
            (field, SortDirection::Desc)
        } else if let Some(field) = token.strip_suffix('+') {
            (field, SortDirection::Asc)
        } else {
            (token, SortDirection::Asc)
        };
        Ok(Self::new(field.parse()?, direction))
    }
}

impl fmt::Display for SortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.direction)
    }
}

/// Rules a fresh board starts with.
pub fn default_rules() -> Vec<SortRule> {
    vec![SortRule::asc(SortField::Priority), SortRule::asc(SortField::Due)]
}

/// Header text for the auto-sorted column, e.g. "Priority → Due Date".
pub fn sort_summary(rules: &[SortRule]) -> Option<String> {
    if rules.is_empty() {
        return None;
    }
    Some(
        rules
            .iter()
            .map(|rule| rule.field.label())
            .collect::<Vec<_>>()
            .join(" → "),
    )
}

/// Orders `tasks` by `rules`; ties keep their incoming order.
/// An empty rule list returns the input untouched.
#[tracing::instrument(skip_all, fields(tasks = tasks.len(), rules = rules.len()))]
pub fn sort_tasks<'a>(mut tasks: Vec<&'a Task>, rules: &[SortRule]) -> Vec<&'a Task> {
    if rules.is_empty() {
        return tasks;
    }
    tasks.sort_by(|a, b| compare_tasks(a, b, rules));
    tasks
}

pub fn compare_tasks(a: &Task, b: &Task, rules: &[SortRule]) -> Ordering {
    for rule in rules {
        let ordering = compare_on_rule(a, b, *rule);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_on_rule(a: &Task, b: &Task, rule: SortRule) -> Ordering {
    let directed = |ordering: Ordering| match rule.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    };

    match rule.field {
        SortField::Priority => directed(a.priority.rank().cmp(&b.priority.rank())),
        SortField::Due => directed(due_key(a).cmp(&due_key(b))),
        SortField::Effort => match (a.effort, b.effort) {
            (Some(x), Some(y)) => directed(x.ordinal().cmp(&y.ordinal())),
            (None, None) => Ordering::Equal,
            // Missing effort stays at the bottom whichever way the rule points.
            (None, Some(_)) => EFFORT_ABSENT.cmp(&0),
            (Some(_), None) => 0.cmp(&EFFORT_ABSENT),
        },
        SortField::Created => directed(a.created.cmp(&b.created)),
        SortField::Title => directed(compare_titles(&a.title, &b.title)),
    }
}

fn due_key(task: &Task) -> NaiveDate {
    task.due.unwrap_or(NaiveDate::MAX)
}

fn compare_titles(a: &str, b: &str) -> Ordering {
    let fold = |s: &str| deunicode(s).to_lowercase();
    fold(a)
        .cmp(&fold(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::column::ColumnId;
    use crate::task::{Effort, Priority, Task};

    fn task(id: &str) -> Task {
        let mut task = Task::new(id.to_string(), ColumnId::Backlog, DateTime::<Utc>::UNIX_EPOCH);
        task.id = id.to_string();
        task
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    fn scenario_tasks() -> Vec<Task> {
        let mut t1 = task("T1");
        t1.due = Some(date("2024-01-10"));
        t1.priority = Priority::High;
        let mut t2 = task("T2");
        t2.due = Some(date("2024-01-05"));
        t2.priority = Priority::Low;
        vec![t1, t2]
    }

    #[test]
    fn due_ascending_puts_earlier_date_first() {
        let tasks = scenario_tasks();
        let sorted = sort_tasks(tasks.iter().collect(), &[SortRule::asc(SortField::Due)]);
        assert_eq!(ids(&sorted), vec!["T2", "T1"]);
    }

    #[test]
    fn priority_outranks_due_when_listed_first() {
        let tasks = scenario_tasks();
        let rules = [SortRule::asc(SortField::Priority), SortRule::asc(SortField::Due)];
        let sorted = sort_tasks(tasks.iter().collect(), &rules);
        assert_eq!(ids(&sorted), vec!["T1", "T2"]);
    }

    #[test]
    fn empty_rules_keep_insertion_order() {
        let tasks = vec![task("c"), task("a"), task("b")];
        let sorted = sort_tasks(tasks.iter().collect(), &[]);
        assert_eq!(ids(&sorted), vec!["c", "a", "b"]);
    }

    #[test]
    fn descending_flips_priority() {
        let tasks = scenario_tasks();
        let sorted = sort_tasks(tasks.iter().collect(), &[SortRule::desc(SortField::Priority)]);
        assert_eq!(ids(&sorted), vec!["T2", "T1"]);
    }

    #[test]
    fn missing_effort_sorts_last_in_both_directions() {
        let mut small = task("small");
        small.effort = Some(Effort::Xs);
        let mut large = task("large");
        large.effort = Some(Effort::Xl);
        let none = task("none");
        let tasks = vec![none, large, small];

        let asc = sort_tasks(tasks.iter().collect(), &[SortRule::asc(SortField::Effort)]);
        assert_eq!(ids(&asc), vec!["small", "large", "none"]);

        // Deliberate asymmetry: only present efforts flip under desc.
        let desc = sort_tasks(tasks.iter().collect(), &[SortRule::desc(SortField::Effort)]);
        assert_eq!(ids(&desc), vec!["large", "small", "none"]);
    }

    #[test]
    fn titles_compare_without_case_or_accents() {
        let mut a = task("a");
        a.title = "écrire".to_string();
        let mut b = task("b");
        b.title = "Deploy".to_string();
        let mut c = task("c");
        c.title = "apply".to_string();
        let tasks = vec![a, b, c];
        let sorted = sort_tasks(tasks.iter().collect(), &[SortRule::asc(SortField::Title)]);
        assert_eq!(ids(&sorted), vec!["c", "b", "a"]);
    }

    #[test]
    fn created_orders_by_timestamp() {
        let mut old = task("old");
        old.created = DateTime::from_timestamp_millis(1_000).expect("valid");
        let mut new = task("new");
        new.created = DateTime::from_timestamp_millis(2_000).expect("valid");
        let tasks = vec![new, old];
        let sorted = sort_tasks(tasks.iter().collect(), &[SortRule::asc(SortField::Created)]);
        assert_eq!(ids(&sorted), vec!["old", "new"]);
    }

    #[test]
    fn parses_rule_spellings() {
        assert_eq!("due".parse::<SortRule>().unwrap(), SortRule::asc(SortField::Due));
        assert_eq!("effort-".parse::<SortRule>().unwrap(), SortRule::desc(SortField::Effort));
        assert_eq!("title:desc".parse::<SortRule>().unwrap(), SortRule::desc(SortField::Title));
        assert!("size".parse::<SortRule>().is_err());
        assert!("due:sideways".parse::<SortRule>().is_err());
    }

    #[test]
    fn summary_joins_labels() {
        assert_eq!(sort_summary(&default_rules()).as_deref(), Some("Priority → Due Date"));
        assert_eq!(sort_summary(&[]), None);
    }

    #[test]
    fn rule_serializes_with_dir_key() {
        let json = serde_json::to_string(&SortRule::desc(SortField::Due)).unwrap();
        assert_eq!(json, r#"{"field":"due","dir":"desc"}"#);
    }

    fn arb_task() -> impl Strategy<Value = (u8, Option<u8>, Option<u16>)> {
        (0u8..5, proptest::option::of(0u8..5), proptest::option::of(0u16..60))
    }

    fn arb_rule() -> impl Strategy<Value = SortRule> {
        (0usize..5, any::<bool>()).prop_map(|(field, desc)| {
            let field = SortField::ALL[field];
            if desc { SortRule::desc(field) } else { SortRule::asc(field) }
        })
    }

    fn build(seeds: &[(u8, Option<u8>, Option<u16>)]) -> Vec<Task> {
        seeds
            .iter()
            .enumerate()
            .map(|(idx, (pri, effort, due))| {
                let mut t = task(&format!("t{idx}"));
                t.priority = Priority::ALL[usize::from(*pri)];
                t.effort = effort.map(|e| Effort::ALL[usize::from(e)]);
                t.due = due.map(|d| date("2024-01-01") + chrono::Days::new(u64::from(d)));
                t
            })
            .collect()
    }

    proptest! {
        #[test]
        fn sorting_is_stable_and_idempotent(
            seeds in proptest::collection::vec(arb_task(), 0..24),
            rules in proptest::collection::vec(arb_rule(), 1..4),
        ) {
            let tasks = build(&seeds);
            let once = sort_tasks(tasks.iter().collect(), &rules);
            let twice = sort_tasks(once.clone(), &rules);
            prop_assert_eq!(ids(&once), ids(&twice));

            // Equal keys keep their original relative order.
            for pair in once.windows(2) {
                if compare_tasks(pair[0], pair[1], &rules) == Ordering::Equal {
                    let a: usize = pair[0].id[1..].parse().unwrap();
                    let b: usize = pair[1].id[1..].parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }

        #[test]
        fn undated_tasks_follow_dated_ones(seeds in proptest::collection::vec(arb_task(), 0..24)) {
            let tasks = build(&seeds);
            let sorted = sort_tasks(tasks.iter().collect(), &[SortRule::asc(SortField::Due)]);
            let first_undated = sorted.iter().position(|t| t.due.is_none()).unwrap_or(sorted.len());
            prop_assert!(sorted[first_undated..].iter().all(|t| t.due.is_none()));
        }
    }
}
