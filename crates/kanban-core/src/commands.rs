use std::path::PathBuf;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::board::Board;
use crate::cli::{AddArgs, Command, EditArgs, FieldArgs, ShowArgs, SortAction};
use crate::column::ColumnId;
use crate::datetime::parse_due;
use crate::render::{Renderer, short_id};
use crate::sort::SortRule;
use crate::sync::SyncError;
use crate::task::{TaskFields, TaskPatch, parse_tag_list};

#[instrument(skip(board, renderer, command, now))]
pub async fn dispatch(
    board: &mut Board,
    renderer: &Renderer,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    let result = match command {
        Command::Add(args) => cmd_add(board, renderer, args, now),
        Command::Edit(args) => cmd_edit(board, renderer, args, now),
        Command::Move { id, column } => cmd_move(board, &id, column, now),
        Command::Delete { id } => cmd_delete(board, &id),
        Command::Show(args) => cmd_show(board, renderer, args, now),
        Command::Info { id } => {
            let id = board.resolve_id(&id)?;
            let task = board.find(&id).ok_or_else(|| anyhow!("task {id} vanished"))?;
            renderer.print_task_info(task, now)
        }
        Command::Tags => renderer.print_tags(&board.all_tags()),
        Command::Sort { action } => cmd_sort(board, renderer, action.unwrap_or(SortAction::List)),
        Command::Open { path } => {
            board
                .open_file(&path)
                .await
                .with_context(|| format!("cannot open {}", path.display()))?;
            println!("Loaded {} task(s) from {}.", board.tasks().len(), path.display());
            Ok(())
        }
        Command::Save { path } => cmd_save(board, path).await,
        Command::SaveAs { path } => {
            board
                .save_as(&path)
                .await
                .with_context(|| format!("cannot save to {}", path.display()))?;
            println!("Linked and saved {}.", path.display());
            Ok(())
        }
        Command::Unlink => {
            board.unlink()?;
            println!("Unlinked; the board is kept in the local cache only.");
            Ok(())
        }
        Command::Status => renderer.print_status(&board.status(), board.last_error().as_deref()),
    };

    for notice in board.take_notices() {
        warn!(notice = %notice, "board notice");
        eprintln!("note: {notice}");
    }

    result
}

fn collect_tags(raw: &[String]) -> Vec<String> {
    raw.iter().flat_map(|entry| parse_tag_list(entry)).collect()
}

fn parse_due_arg(raw: Option<&str>, today: NaiveDate) -> anyhow::Result<Option<NaiveDate>> {
    raw.map(|expr| parse_due(expr, today)).transpose()
}

/// Starts from the add-form defaults and layers the given flags on top.
pub fn build_fields(args: AddArgs, today: NaiveDate) -> anyhow::Result<TaskFields> {
    let FieldArgs {
        desc,
        priority,
        effort,
        due,
        tags,
    } = args.fields;

    let mut fields = TaskFields::form_defaults(args.column);
    fields.title = args.title.join(" ");
    fields.desc = desc;
    if let Some(priority) = priority {
        fields.priority = priority;
    }
    if effort.is_some() {
        fields.effort = effort;
    }
    fields.due = parse_due_arg(due.as_deref(), today)?;
    fields.tags = collect_tags(&tags);
    Ok(fields)
}

pub fn build_patch(args: &EditArgs, today: NaiveDate) -> anyhow::Result<TaskPatch> {
    let fields = &args.fields;
    let mut patch = TaskPatch {
        title: args.title.clone(),
        priority: fields.priority,
        status: args.column,
        ..TaskPatch::default()
    };

    if args.clear_desc {
        patch.desc = Some(None);
    } else if let Some(desc) = &fields.desc {
        patch.desc = Some(Some(desc.clone()));
    }

    if args.clear_effort {
        patch.effort = Some(None);
    } else if let Some(effort) = fields.effort {
        patch.effort = Some(Some(effort));
    }

    if args.clear_due {
        patch.due = Some(None);
    } else if let Some(due) = parse_due_arg(fields.due.as_deref(), today)? {
        patch.due = Some(Some(due));
    }

    if args.clear_tags {
        patch.tags = Some(Vec::new());
    } else if !fields.tags.is_empty() {
        patch.tags = Some(collect_tags(&fields.tags));
    }

    Ok(patch)
}

/// Saves to the linked file; with nothing linked, `path` is linked first.
#[instrument(skip(board))]
async fn cmd_save(board: &mut Board, path: Option<PathBuf>) -> anyhow::Result<()> {
    match board.save().await {
        Ok(()) => {
            println!("Saved.");
            Ok(())
        }
        Err(SyncError::NoFileLinked) => {
            let path = path.ok_or_else(|| anyhow!("no file linked; pass a path to save to"))?;
            board
                .save_as(&path)
                .await
                .with_context(|| format!("cannot save to {}", path.display()))?;
            println!("Linked and saved {}.", path.display());
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[instrument(skip(board, renderer, args, now))]
fn cmd_add(board: &mut Board, renderer: &Renderer, args: AddArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");
    let fields = build_fields(args, renderer.today(now))?;
    let task = board.create(fields, now)?;
    println!("Created task {} in {}.", short_id(&task.id), task.status.title());
    Ok(())
}

#[instrument(skip(board, renderer, args, now))]
fn cmd_edit(board: &mut Board, renderer: &Renderer, args: EditArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command edit");
    let id = board.resolve_id(&args.id)?;
    let patch = build_patch(&args, renderer.today(now))?;
    if patch.is_empty() {
        return Err(anyhow!("nothing to change; pass at least one field flag"));
    }
    let task = board.update(&id, patch, now)?;
    println!("Modified task {}.", short_id(&task.id));
    Ok(())
}

#[instrument(skip(board, now))]
fn cmd_move(board: &mut Board, id: &str, column: ColumnId, now: DateTime<Utc>) -> anyhow::Result<()> {
    let id = board.resolve_id(id)?;
    let task = board.move_task(&id, column, now)?;
    println!("Moved task {} to {}.", short_id(&task.id), column.title());
    Ok(())
}

#[instrument(skip(board))]
fn cmd_delete(board: &mut Board, id: &str) -> anyhow::Result<()> {
    let id = board.resolve_id(id)?;
    let task = board.delete(&id)?;
    println!("Deleted task {} ({}).", short_id(&task.id), task.title);
    Ok(())
}

#[instrument(skip(board, renderer, args, now))]
fn cmd_show(board: &mut Board, renderer: &Renderer, args: ShowArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    let columns: Vec<ColumnId> = match args.column {
        Some(column) => vec![column],
        None => ColumnId::ALL.to_vec(),
    };

    let active = parse_tag_list(&args.tags.join(","));
    if !active.is_empty() {
        for column in &columns {
            board.set_tag_filter(*column, active.clone());
        }
    }
    if args.all {
        board.set_show_all(true);
    }

    renderer.print_board(board, &columns, now)
}

/// Applies a `sort` subcommand to the current rules.
pub fn apply_sort_action(rules: &[SortRule], action: &SortAction) -> anyhow::Result<Option<Vec<SortRule>>> {
    let mut next = rules.to_vec();
    match action {
        SortAction::List => return Ok(None),
        SortAction::Add { field, direction } => next.push(SortRule::new(*field, *direction)),
        SortAction::Remove { position } => {
            if *position == 0 || *position > next.len() {
                return Err(anyhow!(
                    "no sort rule at position {position}; there are {}",
                    next.len()
                ));
            }
            next.remove(position - 1);
        }
        SortAction::Set { rules } => next = rules.clone(),
        SortAction::Clear => next.clear(),
    }
    Ok(Some(next))
}

fn cmd_sort(board: &mut Board, renderer: &Renderer, action: SortAction) -> anyhow::Result<()> {
    if let Some(rules) = apply_sort_action(board.sort_rules(), &action)? {
        board.set_sort_rules(rules);
    }
    renderer.print_sort_rules(board.sort_rules())
}
