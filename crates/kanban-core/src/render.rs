use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::board::{Board, VisibleColumn};
use crate::column::{Column, ColumnId};
use crate::config::Config;
use crate::datetime::{DueBadge, due_badge, today_in};
use crate::sort::SortRule;
use crate::sync::FileStatus;
use crate::task::{Priority, Task};

/// Characters of the id shown in listings; any unique prefix is accepted back.
pub const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color,
            tz: cfg.timezone()?,
        })
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        today_in(self.tz, now)
    }

    #[tracing::instrument(skip_all, fields(column = %column.id))]
    pub fn write_column<W: Write>(
        &self,
        out: &mut W,
        column: &Column,
        visible: &VisibleColumn<'_>,
        sort_summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut header = format!("{} ({})", column.title, visible.tasks.len());
        if column.id.is_auto_sorted() {
            match sort_summary {
                Some(summary) => header.push_str(&format!("  sorted by {summary}")),
                None => header.push_str("  unsorted"),
            }
        }
        writeln!(out, "{}", self.paint(&header, column_code(column)))?;

        if visible.tasks.is_empty() {
            writeln!(out, "  (empty)")?;
        } else {
            let today = self.today(now);
            let headers: Vec<String> = ["ID", "Pri", "Effort", "Due", "Title", "Tags"]
                .into_iter()
                .map(ToString::to_string)
                .collect();
            let rows: Vec<Vec<String>> = visible
                .tasks
                .iter()
                .map(|task| self.task_row(task, today))
                .collect();
            write_table(&mut *out, headers, rows)?;
        }

        if visible.suppressed > 0 {
            writeln!(
                out,
                "  {} older completed task(s) hidden; use --all to show them",
                visible.suppressed
            )?;
        }
        Ok(())
    }

    fn task_row(&self, task: &Task, today: NaiveDate) -> Vec<String> {
        let due = match task.due {
            Some(due) => {
                let badge = due_badge(due, today);
                let code = match badge {
                    DueBadge::Overdue(_) => "31",
                    _ if badge.is_urgent() => "33",
                    _ => "0",
                };
                self.paint(&badge.label(), code)
            }
            None => String::new(),
        };
        let priority = match task.priority {
            Priority::None => String::new(),
            other => self.paint(other.as_str(), priority_code(other)),
        };
        vec![
            self.paint(short_id(&task.id), "33"),
            priority,
            task.effort.map(|e| e.to_string()).unwrap_or_default(),
            due,
            task.title.clone(),
            task.tags
                .iter()
                .map(|tag| format!("#{tag}"))
                .collect::<Vec<_>>()
                .join(" "),
        ]
    }

    pub fn print_board(&self, board: &Board, columns: &[ColumnId], now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let summary = board.sort_summary();
        for (idx, id) in columns.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let visible = board.visible_tasks(*id, now);
            self.write_column(&mut out, id.column(), &visible, summary.as_deref(), now)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(id = %task.id))]
    pub fn write_task_info<W: Write>(&self, out: &mut W, task: &Task, now: DateTime<Utc>) -> anyhow::Result<()> {
        writeln!(out, "id         {}", task.id)?;
        writeln!(out, "title      {}", task.title)?;
        writeln!(out, "column     {}", task.status.title())?;
        writeln!(out, "priority   {}", task.priority)?;
        if let Some(effort) = task.effort {
            writeln!(out, "effort     {effort}")?;
        }
        if let Some(due) = task.due {
            let badge = due_badge(due, self.today(now));
            writeln!(out, "due        {} ({})", due.format("%Y-%m-%d"), badge.label())?;
        }
        if !task.tags.is_empty() {
            let tags: Vec<&str> = task.tags.iter().map(String::as_str).collect();
            writeln!(out, "tags       {}", tags.join(", "))?;
        }
        writeln!(out, "created    {}", self.timestamp(task.created))?;
        if let Some(completed) = task.completed_at {
            writeln!(out, "completed  {}", self.timestamp(completed))?;
        }
        if let Some(desc) = &task.desc {
            writeln!(out)?;
            for line in desc.lines() {
                writeln!(out, "  {line}")?;
            }
        }
        Ok(())
    }

    pub fn print_task_info(&self, task: &Task, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_task_info(&mut io::stdout().lock(), task, now)
    }

    pub fn print_tags(&self, tags: &[(String, usize)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tags.is_empty() {
            writeln!(out, "No tags.")?;
            return Ok(());
        }
        let rows = tags
            .iter()
            .map(|(tag, count)| vec![tag.clone(), count.to_string()])
            .collect();
        write_table(&mut out, vec!["Tag".to_string(), "Count".to_string()], rows)
    }

    pub fn print_sort_rules(&self, rules: &[SortRule]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if rules.is_empty() {
            writeln!(out, "No sort rules; backlog keeps insertion order.")?;
            return Ok(());
        }
        for (idx, rule) in rules.iter().enumerate() {
            writeln!(out, "{}. {} ({})", idx + 1, rule.field.label(), rule.direction)?;
        }
        Ok(())
    }

    pub fn print_status(&self, status: &FileStatus, last_error: Option<&str>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let code = match status {
            FileStatus::NoFileLinked => "2",
            FileStatus::Linked { .. } => "32",
            FileStatus::Unsaved { .. } => "33",
        };
        writeln!(out, "{}", self.paint(&status.to_string(), code))?;
        if let Some(reason) = last_error {
            writeln!(out, "{}", self.paint(&format!("last write failed: {reason}"), "31"))?;
        }
        Ok(())
    }

    fn timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz).format("%Y-%m-%d %H:%M").to_string()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || code == "0" {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn column_code(column: &Column) -> &'static str {
    match column.color {
        "col-backlog" => "1;34",
        "col-progress" => "1;33",
        "col-review" => "1;35",
        "col-done" => "1;32",
        _ => "1",
    }
}

fn priority_code(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "1;31",
        Priority::High => "31",
        Priority::Medium => "33",
        Priority::Low => "36",
        Priority::None => "0",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    write!(writer, " ")?;
    for idx in 0..column_count {
        write!(writer, " {:width$}", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    write!(writer, " ")?;
    for width in &widths {
        write!(writer, " {:-<width$}", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        write!(writer, " ")?;
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, " {}{}", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
